//! One residual memory layer: project → wrap → scan → read out → normalize
//! → skip.
//!
//! A layer owns exactly its own parameters: the input projection into the
//! recurrent width, its operator instance, the read-out projection back to
//! the recurrent width, and the layer-norm scale/shift. The skip connection
//! adds the layer's (projected) input to the normalized read-out, so stacked
//! layers all speak the recurrent width and gradients have a linear path
//! through the depth.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algebra::MemoryAlgebra;
use crate::error::{ConfigError, NumericError};
use crate::scan::{scan, ScanMode};
use crate::tensor::{affine_f32, layer_norm_f32, xavier_init};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryLayer<A> {
    input_size: usize,
    recurrent_size: usize,
    in_w: Vec<f32>,
    in_b: Vec<f32>,
    op: A,
    out_w: Vec<f32>,
    out_b: Vec<f32>,
    ln_gamma: Vec<f32>,
    ln_beta: Vec<f32>,
}

impl<A: MemoryAlgebra> MemoryLayer<A> {
    /// The operator must consume exactly `recurrent_size` features; that is
    /// checked here so a mis-built operator fails at construction, not at
    /// the first forward pass. `layer_index` names this layer's position in
    /// the stack when the check fails.
    pub fn new(
        op: A,
        input_size: usize,
        recurrent_size: usize,
        layer_index: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, ConfigError> {
        if input_size == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "input_size",
                got: input_size,
            });
        }
        if op.in_len() != recurrent_size {
            return Err(ConfigError::LayerShapeMismatch {
                layer: layer_index,
                expected: op.in_len(),
                got: recurrent_size,
            });
        }
        let rec = recurrent_size;
        let out_len = op.out_len();
        Ok(MemoryLayer {
            input_size,
            recurrent_size: rec,
            in_w: xavier_init(rng, rec, input_size),
            in_b: vec![0.0f32; rec],
            op,
            out_w: xavier_init(rng, rec, out_len),
            out_b: vec![0.0f32; rec],
            ln_gamma: vec![1.0f32; rec],
            ln_beta: vec![0.0f32; rec],
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn recurrent_size(&self) -> usize {
        self.recurrent_size
    }

    pub fn op(&self) -> &A {
        &self.op
    }

    /// Project one raw timestep into the recurrent width.
    pub fn project_input(&self, x: &[f32], u: &mut [f32]) {
        affine_f32(&self.in_w, &self.in_b, x, u, self.recurrent_size, self.input_size);
    }

    /// Read-out → projection → norm → skip for one prefix state.
    fn emit(&self, state: &A::State, u: &[f32], out: &mut [f32]) {
        let rec = self.recurrent_size;
        let mut y = vec![0.0f32; self.op.out_len()];
        self.op.read_out(state, &mut y);
        let mut proj = vec![0.0f32; rec];
        affine_f32(&self.out_w, &self.out_b, &y, &mut proj, rec, self.op.out_len());
        let mut normed = vec![0.0f32; rec];
        layer_norm_f32(&proj, &self.ln_gamma, &self.ln_beta, &mut normed);
        for i in 0..rec {
            out[i] = normed[i] + u[i];
        }
    }
}

impl<A: MemoryAlgebra + Sync> MemoryLayer<A> {
    /// Full-sequence forward for one sequence.
    ///
    /// `x` is [seq_len, input_size]; returns [seq_len, recurrent_size].
    /// `layer_index` only labels numeric errors.
    pub fn forward_sequence(
        &self,
        x: &[f32],
        seq_len: usize,
        starts: Option<&[bool]>,
        mode: ScanMode,
        layer_index: usize,
    ) -> Result<Vec<f32>, NumericError> {
        debug_assert_eq!(x.len(), seq_len * self.input_size);
        let rec = self.recurrent_size;

        let mut u = vec![0.0f32; seq_len * rec];
        let mut elems = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x_t = &x[t * self.input_size..(t + 1) * self.input_size];
            let u_t = &mut u[t * rec..(t + 1) * rec];
            affine_f32(&self.in_w, &self.in_b, x_t, u_t, rec, self.input_size);
            elems.push(self.op.wrap(u_t));
        }

        let states = scan(&self.op, elems, starts, mode);

        let mut h = vec![0.0f32; seq_len * rec];
        for t in 0..seq_len {
            let u_t = &u[t * rec..(t + 1) * rec];
            let h_t = &mut h[t * rec..(t + 1) * rec];
            self.emit(&states[t], u_t, h_t);
            if h_t.iter().any(|v| !v.is_finite()) {
                return Err(NumericError::NonFinite {
                    layer: layer_index,
                    timestep: t,
                });
            }
        }
        Ok(h)
    }

    /// One online timestep: wrap the projected input, advance the carry,
    /// emit. Agrees with `forward_sequence` in sequential mode position by
    /// position.
    pub fn step_online(
        &self,
        carry: &mut crate::scan::OnlineState<A>,
        x: &[f32],
        layer_index: usize,
        timestep: usize,
    ) -> Result<Vec<f32>, NumericError> {
        let rec = self.recurrent_size;
        let mut u = vec![0.0f32; rec];
        self.project_input(x, &mut u);
        let elem = self.op.wrap(&u);
        let state = carry.step(&self.op, elem).clone();
        let mut h = vec![0.0f32; rec];
        self.emit(&state, &u, &mut h);
        if h.iter().any(|v| !v.is_finite()) {
            return Err(NumericError::NonFinite {
                layer: layer_index,
                timestep,
            });
        }
        Ok(h)
    }
}

impl<A: MemoryAlgebra> MemoryLayer<A> {
    /// Parameter buffers in flattening order: input projection, operator
    /// parameters, read-out projection, layer norm.
    pub fn param_views(&self) -> Vec<&[f32]> {
        let mut v: Vec<&[f32]> = vec![&self.in_w, &self.in_b];
        v.extend(self.op.param_views());
        v.push(&self.out_w);
        v.push(&self.out_b);
        v.push(&self.ln_gamma);
        v.push(&self.ln_beta);
        v
    }

    pub fn param_views_mut(&mut self) -> Vec<&mut [f32]> {
        let mut v: Vec<&mut [f32]> = vec![&mut self.in_w, &mut self.in_b];
        v.extend(self.op.param_views_mut());
        v.push(&mut self.out_w);
        v.push(&mut self.out_b);
        v.push(&mut self.ln_gamma);
        v.push(&mut self.ln_beta);
        v
    }

    pub fn num_params(&self) -> usize {
        self.param_views().iter().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::LinearRecurrence;
    use crate::scan::OnlineState;
    use crate::tensor::fill_uniform;
    use rand::SeedableRng;

    fn make_layer(rng: &mut ChaCha8Rng) -> MemoryLayer<LinearRecurrence> {
        let op = LinearRecurrence::new(6, rng).unwrap();
        MemoryLayer::new(op, 4, 6, 0, rng).unwrap()
    }

    #[test]
    fn test_forward_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let layer = make_layer(&mut rng);
        let mut x = vec![0.0f32; 9 * 4];
        fill_uniform(&mut rng, &mut x, 1.0);
        let h = layer
            .forward_sequence(&x, 9, None, ScanMode::Parallel, 0)
            .unwrap();
        assert_eq!(h.len(), 9 * 6);
    }

    #[test]
    fn test_online_matches_sequential_forward() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let layer = make_layer(&mut rng);
        let seq_len = 12;
        let mut x = vec![0.0f32; seq_len * 4];
        fill_uniform(&mut rng, &mut x, 1.0);

        let h = layer
            .forward_sequence(&x, seq_len, None, ScanMode::Sequential, 0)
            .unwrap();

        let mut carry = OnlineState::new();
        for t in 0..seq_len {
            let h_t = layer
                .step_online(&mut carry, &x[t * 4..(t + 1) * 4], 0, t)
                .unwrap();
            for i in 0..6 {
                assert!((h_t[i] - h[t * 6 + i]).abs() < 1e-5, "t={t} i={i}");
            }
        }
    }

    #[test]
    fn test_operator_width_mismatch_names_the_layer() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let op = LinearRecurrence::new(6, &mut rng).unwrap();
        let err = MemoryLayer::new(op, 4, 8, 3, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::LayerShapeMismatch {
                layer: 3,
                expected: 6,
                got: 8,
            }
        ));
    }
}
