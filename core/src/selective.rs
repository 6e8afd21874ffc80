//! Selective-state operator: content-dependent "keep the stronger evidence".
//!
//! The state carries, per dimension, an accumulated value and the selection
//! weight that put it there. Combining two spans keeps, per dimension, the
//! entry with the larger weight. The right operand wins only when its weight
//! is *strictly* greater; on exact ties the left operand, the earlier
//! position in scan order, is kept. Strict comparison with a fixed bias is
//! what makes the merge associative and deterministic under any combine tree.
//!
//! This is a semigroup, not a monoid: there is no weight below every
//! reachable weight, so no two-sided identity exists. `initial_state` returns
//! a seed with weight −1, below the magnitude range, which any real input
//! displaces.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algebra::MemoryAlgebra;
use crate::error::ConfigError;
use crate::tensor::{affine_f32, xavier_init};

#[derive(Clone, Debug, PartialEq)]
pub struct SelectiveMerge {
    pub value: Vec<f32>,
    pub weight: Vec<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectiveState {
    n: usize,
    w_val: Vec<f32>,
    w_sel: Vec<f32>,
}

impl SelectiveState {
    pub fn new(recurrent_size: usize, rng: &mut ChaCha8Rng) -> Result<Self, ConfigError> {
        if recurrent_size == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "recurrent_size",
                got: recurrent_size,
            });
        }
        let n = recurrent_size;
        Ok(SelectiveState {
            n,
            w_val: xavier_init(rng, n, n),
            w_sel: xavier_init(rng, n, n),
        })
    }
}

impl MemoryAlgebra for SelectiveState {
    type State = SelectiveMerge;

    fn state_len(&self) -> usize {
        2 * self.n
    }

    fn out_len(&self) -> usize {
        self.n
    }

    fn in_len(&self) -> usize {
        self.n
    }

    fn initial_state(&self, _rng: &mut ChaCha8Rng) -> SelectiveMerge {
        // Weight below the magnitude range: loses to every wrapped input.
        SelectiveMerge {
            value: vec![0.0f32; self.n],
            weight: vec![-1.0f32; self.n],
        }
    }

    fn wrap(&self, input: &[f32]) -> SelectiveMerge {
        debug_assert_eq!(input.len(), self.n);
        let mut value = vec![0.0f32; self.n];
        affine_f32(&self.w_val, &[], input, &mut value, self.n, self.n);
        let mut weight = vec![0.0f32; self.n];
        affine_f32(&self.w_sel, &[], input, &mut weight, self.n, self.n);
        for w in weight.iter_mut() {
            *w = w.abs();
        }
        SelectiveMerge { value, weight }
    }

    fn combine(&self, a: &SelectiveMerge, b: &SelectiveMerge) -> SelectiveMerge {
        debug_assert_eq!(a.value.len(), b.value.len());
        let n = a.value.len();
        let mut value = vec![0.0f32; n];
        let mut weight = vec![0.0f32; n];
        for i in 0..n {
            if b.weight[i] > a.weight[i] {
                value[i] = b.value[i];
                weight[i] = b.weight[i];
            } else {
                value[i] = a.value[i];
                weight[i] = a.weight[i];
            }
        }
        SelectiveMerge { value, weight }
    }

    fn read_out(&self, state: &SelectiveMerge, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.n);
        out.copy_from_slice(&state.value);
    }

    fn param_views(&self) -> Vec<&[f32]> {
        vec![&self.w_val, &self.w_sel]
    }

    fn param_views_mut(&mut self) -> Vec<&mut [f32]> {
        vec![&mut self.w_val, &mut self.w_sel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::fill_uniform;
    use rand::SeedableRng;

    fn sample(op: &SelectiveState, rng: &mut ChaCha8Rng) -> SelectiveMerge {
        let mut x = vec![0.0f32; op.in_len()];
        fill_uniform(rng, &mut x, 1.0);
        op.wrap(&x)
    }

    #[test]
    fn test_tie_keeps_earlier_position() {
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let op = SelectiveState::new(2, &mut rng).unwrap();
        let a = SelectiveMerge { value: vec![1.0, 2.0], weight: vec![0.5, 0.5] };
        let b = SelectiveMerge { value: vec![9.0, 9.0], weight: vec![0.5, 0.5] };
        let c = op.combine(&a, &b);
        assert_eq!(c.value, a.value, "tie must keep the left (earlier) entry");
    }

    #[test]
    fn test_strictly_larger_weight_wins() {
        let mut rng = ChaCha8Rng::seed_from_u64(32);
        let op = SelectiveState::new(2, &mut rng).unwrap();
        let a = SelectiveMerge { value: vec![1.0, 1.0], weight: vec![0.2, 0.9] };
        let b = SelectiveMerge { value: vec![5.0, 5.0], weight: vec![0.7, 0.3] };
        let c = op.combine(&a, &b);
        assert_eq!(c.value, vec![5.0, 1.0]);
        assert_eq!(c.weight, vec![0.7, 0.9]);
    }

    #[test]
    fn test_associativity_including_ties() {
        let mut rng = ChaCha8Rng::seed_from_u64(33);
        let op = SelectiveState::new(4, &mut rng).unwrap();
        for round in 0..100 {
            let x = sample(&op, &mut rng);
            let mut y = sample(&op, &mut rng);
            let z = sample(&op, &mut rng);
            // Every third round, engineer an exact tie between x and y.
            if round % 3 == 0 {
                y.weight.copy_from_slice(&x.weight);
            }
            let left = op.combine(&op.combine(&x, &y), &z);
            let right = op.combine(&x, &op.combine(&y, &z));
            assert_eq!(left, right, "selective merge not associative (round {round})");
        }
    }

    #[test]
    fn test_initial_state_loses_to_any_input() {
        let mut rng = ChaCha8Rng::seed_from_u64(34);
        let op = SelectiveState::new(3, &mut rng).unwrap();
        let seed = op.initial_state(&mut rng);
        let s = sample(&op, &mut rng);
        assert_eq!(op.combine(&seed, &s), s);
    }
}
