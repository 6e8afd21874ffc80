//! Log-domain Bayesian update operator.
//!
//! The state is a vector of unnormalized log-likelihoods over `n` latent
//! hypotheses. Each token contributes a log-likelihood term
//! `wrap(x) = log_softmax(W x)`; combining spans adds the terms, which is
//! multiplication of probabilities carried out entirely in the log domain so
//! that long sequences accumulate evidence without underflow. Identity is the
//! zero vector (likelihood one everywhere). Normalization happens only at
//! read-out, through a max-shifted softmax.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algebra::{MemoryAlgebra, MonoidAlgebra};
use crate::error::ConfigError;
use crate::tensor::{affine_f32, log_softmax_f32, softmax_f32, xavier_init};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogBayes {
    n: usize,
    w_obs: Vec<f32>,
}

impl LogBayes {
    pub fn new(recurrent_size: usize, rng: &mut ChaCha8Rng) -> Result<Self, ConfigError> {
        if recurrent_size == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "recurrent_size",
                got: recurrent_size,
            });
        }
        let n = recurrent_size;
        Ok(LogBayes {
            n,
            w_obs: xavier_init(rng, n, n),
        })
    }
}

impl MemoryAlgebra for LogBayes {
    /// Unnormalized log-likelihoods, one per hypothesis.
    type State = Vec<f32>;

    fn state_len(&self) -> usize {
        self.n
    }

    fn out_len(&self) -> usize {
        self.n
    }

    fn in_len(&self) -> usize {
        self.n
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> Vec<f32> {
        vec![0.0f32; self.n]
    }

    fn wrap(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.n);
        let mut log_lik = vec![0.0f32; self.n];
        affine_f32(&self.w_obs, &[], input, &mut log_lik, self.n, self.n);
        log_softmax_f32(&mut log_lik);
        log_lik
    }

    fn combine(&self, a: &Vec<f32>, b: &Vec<f32>) -> Vec<f32> {
        debug_assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
    }

    fn read_out(&self, state: &Vec<f32>, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.n);
        out.copy_from_slice(state);
        softmax_f32(out);
    }

    fn param_views(&self) -> Vec<&[f32]> {
        vec![&self.w_obs]
    }

    fn param_views_mut(&mut self) -> Vec<&mut [f32]> {
        vec![&mut self.w_obs]
    }
}

impl MonoidAlgebra for LogBayes {
    fn identity(&self) -> Vec<f32> {
        vec![0.0f32; self.n]
    }
}
