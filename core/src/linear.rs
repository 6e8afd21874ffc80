//! Linear recurrence operator: an exponential-memory linear RNN.
//!
//! Per token:
//!   g_t = sigmoid(W_g x_t + b_g)          (per-dimension decay)
//!   u_t = (1 - g_t) ∘ (W_v x_t)           (gated write)
//!   h_t = g_t ∘ h_{t-1} + u_t
//!
//! The recurrence is linear in h, so one timestep is the element
//! (decay, value) under (a1, b1) ⊕ (a2, b2) = (a1 ∘ a2, a2 ∘ b1 + b2):
//! the right operand's decay shrinks everything accumulated to its left.
//! Identity is (1, 0).

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algebra::{MemoryAlgebra, MonoidAlgebra};
use crate::error::ConfigError;
use crate::tensor::{affine_f32, sigmoid_f32, xavier_init};

/// Shared state shape for decay-style linear recurrences.
#[derive(Clone, Debug, PartialEq)]
pub struct DecayValue {
    /// Per-dimension decay factor accumulated over the combined span.
    pub decay: Vec<f32>,
    /// Accumulated value after applying all decays in the span.
    pub value: Vec<f32>,
}

/// Combine rule shared by [`LinearRecurrence`] and the gated variant.
pub fn combine_decay_value(a: &DecayValue, b: &DecayValue) -> DecayValue {
    debug_assert_eq!(a.decay.len(), b.decay.len());
    let n = a.decay.len();
    let mut decay = vec![0.0f32; n];
    let mut value = vec![0.0f32; n];
    for i in 0..n {
        decay[i] = a.decay[i] * b.decay[i];
        value[i] = b.decay[i] * a.value[i] + b.value[i];
    }
    DecayValue { decay, value }
}

pub fn decay_value_identity(n: usize) -> DecayValue {
    DecayValue {
        decay: vec![1.0f32; n],
        value: vec![0.0f32; n],
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearRecurrence {
    n: usize,
    w_gate: Vec<f32>,
    b_gate: Vec<f32>,
    w_val: Vec<f32>,
}

impl LinearRecurrence {
    /// `recurrent_size` is both the input width consumed by `wrap` and the
    /// state dimension.
    pub fn new(recurrent_size: usize, rng: &mut ChaCha8Rng) -> Result<Self, ConfigError> {
        if recurrent_size == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "recurrent_size",
                got: recurrent_size,
            });
        }
        let n = recurrent_size;
        Ok(LinearRecurrence {
            n,
            w_gate: xavier_init(rng, n, n),
            b_gate: vec![1.0f32; n], // sigmoid(1) ≈ 0.73: retain by default
            w_val: xavier_init(rng, n, n),
        })
    }
}

impl MemoryAlgebra for LinearRecurrence {
    type State = DecayValue;

    fn state_len(&self) -> usize {
        2 * self.n
    }

    fn out_len(&self) -> usize {
        self.n
    }

    fn in_len(&self) -> usize {
        self.n
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> DecayValue {
        decay_value_identity(self.n)
    }

    fn wrap(&self, input: &[f32]) -> DecayValue {
        debug_assert_eq!(input.len(), self.n);
        let mut decay = vec![0.0f32; self.n];
        affine_f32(&self.w_gate, &self.b_gate, input, &mut decay, self.n, self.n);
        for g in decay.iter_mut() {
            *g = sigmoid_f32(*g);
        }
        let mut value = vec![0.0f32; self.n];
        affine_f32(&self.w_val, &[], input, &mut value, self.n, self.n);
        for i in 0..self.n {
            value[i] *= 1.0 - decay[i];
        }
        DecayValue { decay, value }
    }

    fn combine(&self, a: &DecayValue, b: &DecayValue) -> DecayValue {
        combine_decay_value(a, b)
    }

    fn read_out(&self, state: &DecayValue, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.n);
        out.copy_from_slice(&state.value);
    }

    fn param_views(&self) -> Vec<&[f32]> {
        vec![&self.w_gate, &self.b_gate, &self.w_val]
    }

    fn param_views_mut(&mut self) -> Vec<&mut [f32]> {
        vec![&mut self.w_gate, &mut self.b_gate, &mut self.w_val]
    }
}

impl MonoidAlgebra for LinearRecurrence {
    fn identity(&self) -> DecayValue {
        decay_value_identity(self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::fill_uniform;
    use rand::SeedableRng;

    fn sample_state(op: &LinearRecurrence, rng: &mut ChaCha8Rng) -> DecayValue {
        let mut x = vec![0.0f32; op.in_len()];
        fill_uniform(rng, &mut x, 1.0);
        op.wrap(&x)
    }

    #[test]
    fn test_combine_matches_recurrence() {
        // Combining wrap(x0) and wrap(x1) must equal stepping h twice.
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let op = LinearRecurrence::new(4, &mut rng).unwrap();
        let e0 = sample_state(&op, &mut rng);
        let e1 = sample_state(&op, &mut rng);

        let h1 = e0.value.clone(); // from h0 = 0
        let combined = op.combine(&e0, &e1);
        for i in 0..4 {
            let h2 = e1.decay[i] * h1[i] + e1.value[i];
            assert!((combined.value[i] - h2).abs() < 1e-6);
        }
    }

    #[test]
    fn test_associativity_sampled() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let op = LinearRecurrence::new(6, &mut rng).unwrap();
        for _ in 0..50 {
            let x = sample_state(&op, &mut rng);
            let y = sample_state(&op, &mut rng);
            let z = sample_state(&op, &mut rng);
            let left = op.combine(&op.combine(&x, &y), &z);
            let right = op.combine(&x, &op.combine(&y, &z));
            for i in 0..6 {
                assert!((left.value[i] - right.value[i]).abs() < 1e-5);
                assert!((left.decay[i] - right.decay[i]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_identity_laws() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let op = LinearRecurrence::new(4, &mut rng).unwrap();
        let e = op.identity();
        let x = sample_state(&op, &mut rng);
        let lx = op.combine(&e, &x);
        let rx = op.combine(&x, &e);
        assert_eq!(lx, x);
        assert_eq!(rx, x);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            LinearRecurrence::new(0, &mut rng),
            Err(ConfigError::NonPositiveSize { .. })
        ));
    }

    #[test]
    fn test_decay_stays_in_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let op = LinearRecurrence::new(8, &mut rng).unwrap();
        let mut acc = sample_state(&op, &mut rng);
        for _ in 0..100 {
            acc = op.combine(&acc, &sample_state(&op, &mut rng));
        }
        for &d in &acc.decay {
            assert!((0.0..=1.0).contains(&d));
        }
        for &v in &acc.value {
            assert!(v.is_finite());
        }
    }
}
