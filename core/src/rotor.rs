//! Spherical rotor operator: bounded-manifold recurrence.
//!
//! The state is one unit-modulus complex rotor per two-dimensional plane;
//! `recurrent_size` features pair up into `recurrent_size / 2` planes. Each
//! token is wrapped as a rotation `exp(iθ)` with learned phase `θ = W x`, and
//! combining spans composes rotations by complex multiplication. Products of
//! unit rotors stay on the unit circle, so the state cannot grow over any
//! sequence length; a renormalization after each combine cancels float drift
//! off the manifold.

use num_complex::Complex32;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algebra::{MemoryAlgebra, MonoidAlgebra};
use crate::error::ConfigError;
use crate::tensor::{affine_f32, xavier_init};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SphericalRotor {
    planes: usize,
    feat: usize,
    w_phase: Vec<f32>,
}

impl SphericalRotor {
    /// `recurrent_size` must factor into planes of two features each.
    pub fn new(recurrent_size: usize, rng: &mut ChaCha8Rng) -> Result<Self, ConfigError> {
        if recurrent_size == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "recurrent_size",
                got: recurrent_size,
            });
        }
        if recurrent_size % 2 != 0 {
            return Err(ConfigError::UnrealizableSize {
                requested: recurrent_size,
                reason: "spherical rotor pairs features into planes; size must be even",
            });
        }
        let planes = recurrent_size / 2;
        Ok(SphericalRotor {
            planes,
            feat: recurrent_size,
            w_phase: xavier_init(rng, planes, recurrent_size),
        })
    }
}

fn renormalize(z: Complex32) -> Complex32 {
    let norm = z.norm();
    if norm > 0.0 {
        z / norm
    } else {
        Complex32::new(1.0, 0.0)
    }
}

impl MemoryAlgebra for SphericalRotor {
    /// One unit rotor per plane.
    type State = Vec<Complex32>;

    fn state_len(&self) -> usize {
        2 * self.planes
    }

    fn out_len(&self) -> usize {
        self.feat
    }

    fn in_len(&self) -> usize {
        self.feat
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); self.planes]
    }

    fn wrap(&self, input: &[f32]) -> Vec<Complex32> {
        debug_assert_eq!(input.len(), self.feat);
        let mut theta = vec![0.0f32; self.planes];
        affine_f32(&self.w_phase, &[], input, &mut theta, self.planes, self.feat);
        theta
            .iter()
            .map(|&t| Complex32::new(t.cos(), t.sin()))
            .collect()
    }

    fn combine(&self, a: &Vec<Complex32>, b: &Vec<Complex32>) -> Vec<Complex32> {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| renormalize(x * y))
            .collect()
    }

    fn read_out(&self, state: &Vec<Complex32>, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.feat);
        for (i, z) in state.iter().enumerate() {
            out[2 * i] = z.re;
            out[2 * i + 1] = z.im;
        }
    }

    fn param_views(&self) -> Vec<&[f32]> {
        vec![&self.w_phase]
    }

    fn param_views_mut(&mut self) -> Vec<&mut [f32]> {
        vec![&mut self.w_phase]
    }
}

impl MonoidAlgebra for SphericalRotor {
    fn identity(&self) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); self.planes]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::fill_uniform;
    use rand::SeedableRng;

    #[test]
    fn test_odd_size_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            SphericalRotor::new(7, &mut rng),
            Err(ConfigError::UnrealizableSize { requested: 7, .. })
        ));
    }

    #[test]
    fn test_state_stays_on_unit_circle() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let op = SphericalRotor::new(8, &mut rng).unwrap();
        let mut acc = op.identity();
        for _ in 0..1000 {
            let mut x = vec![0.0f32; 8];
            fill_uniform(&mut rng, &mut x, 2.0);
            acc = op.combine(&acc, &op.wrap(&x));
        }
        for z in &acc {
            assert!((z.norm() - 1.0).abs() < 1e-4, "rotor drifted: |z|={}", z.norm());
        }
    }

    #[test]
    fn test_rotation_composition_adds_phases() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let op = SphericalRotor::new(2, &mut rng).unwrap();
        let a = vec![Complex32::from_polar(1.0, 0.3)];
        let b = vec![Complex32::from_polar(1.0, 0.5)];
        let c = op.combine(&a, &b);
        assert!((c[0].arg() - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_identity_laws() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let op = SphericalRotor::new(6, &mut rng).unwrap();
        let mut x = vec![0.0f32; 6];
        fill_uniform(&mut rng, &mut x, 1.0);
        let s = op.wrap(&x);
        let l = op.combine(&op.identity(), &s);
        let r = op.combine(&s, &op.identity());
        for i in 0..s.len() {
            assert!((l[i] - s[i]).norm() < 1e-6);
            assert!((r[i] - s[i]).norm() < 1e-6);
        }
    }
}
