//! Scan engine: prefix states of a wrapped input sequence.
//!
//! Two evaluation modes over one contract:
//! - sequential: strict left fold carrying one running state; the online path.
//! - parallel: inclusive prefix scan with doubling strides. At stride s every
//!   position i >= s combines the element s to its left into itself; strides
//!   double until they cover the sequence, giving O(log T) dependent steps.
//!
//! Associativity of the operator is the whole correctness argument: within a
//! stride pass the per-position combines have no mutual dependency and are
//! dispatched over rayon for long sequences, and the result equals the
//! sequential fold no matter how the passes are scheduled.
//!
//! Segmented variants thread an episode-start flag through the scan via
//! [`Phase`]; a combine across a reset boundary discards the pre-boundary
//! state, so packed episodes behave exactly like independent scans.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algebra::{combine_phase, MemoryAlgebra, Phase};

/// How the time recurrence is evaluated. Both modes agree within floating
/// tolerance; there is no automatic fallback between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Logarithmic-depth prefix scan; the training path.
    Parallel,
    /// Left fold; the rollout/inference path.
    Sequential,
}

/// Positions per stride pass below which the pass runs serially.
const PAR_MIN_LEN: usize = 64;

/// Left fold producing every prefix state.
pub fn scan_sequential<A: MemoryAlgebra>(op: &A, elems: &[A::State]) -> Vec<A::State> {
    let mut out = Vec::with_capacity(elems.len());
    let mut running: Option<A::State> = None;
    for e in elems {
        let next = match &running {
            None => e.clone(),
            Some(r) => op.combine(r, e),
        };
        out.push(next.clone());
        running = Some(next);
    }
    out
}

/// Left fold with episode resets: a start flag at position t makes the
/// running state begin again from elems[t].
pub fn scan_sequential_segmented<A: MemoryAlgebra>(
    op: &A,
    elems: &[A::State],
    starts: &[bool],
) -> Vec<A::State> {
    debug_assert_eq!(elems.len(), starts.len());
    let mut out = Vec::with_capacity(elems.len());
    let mut running: Option<A::State> = None;
    for (t, e) in elems.iter().enumerate() {
        let next = match &running {
            Some(r) if !starts[t] => op.combine(r, e),
            _ => e.clone(),
        };
        out.push(next.clone());
        running = Some(next);
    }
    out
}

fn stride_pass<T, F>(cur: &[T], stride: usize, combine: F) -> Vec<T>
where
    T: Clone + Send + Sync,
    F: Fn(&T, &T) -> T + Send + Sync,
{
    let n = cur.len();
    let apply = |i: usize| {
        if i >= stride {
            combine(&cur[i - stride], &cur[i])
        } else {
            cur[i].clone()
        }
    };
    if n >= PAR_MIN_LEN {
        (0..n).into_par_iter().map(apply).collect()
    } else {
        (0..n).map(apply).collect()
    }
}

/// Inclusive prefix scan with doubling strides.
pub fn scan_parallel<A>(op: &A, elems: Vec<A::State>) -> Vec<A::State>
where
    A: MemoryAlgebra + Sync,
{
    let n = elems.len();
    let mut cur = elems;
    let mut stride = 1;
    while stride < n {
        cur = stride_pass(&cur, stride, |a, b| op.combine(a, b));
        stride *= 2;
    }
    cur
}

/// Inclusive prefix scan with doubling strides and episode resets.
pub fn scan_parallel_segmented<A>(
    op: &A,
    elems: Vec<A::State>,
    starts: &[bool],
) -> Vec<A::State>
where
    A: MemoryAlgebra + Sync,
{
    debug_assert_eq!(elems.len(), starts.len());
    let n = elems.len();
    let mut cur: Vec<Phase<A::State>> = elems
        .into_iter()
        .zip(starts.iter())
        .map(|(state, &start)| Phase::new(start, state))
        .collect();
    let mut stride = 1;
    while stride < n {
        cur = stride_pass(&cur, stride, |a, b| combine_phase(op, a, b));
        stride *= 2;
    }
    cur.into_iter().map(|p| p.state).collect()
}

/// Mode dispatcher used by the layers. `starts == None` means one unbroken
/// episode.
pub fn scan<A>(
    op: &A,
    elems: Vec<A::State>,
    starts: Option<&[bool]>,
    mode: ScanMode,
) -> Vec<A::State>
where
    A: MemoryAlgebra + Sync,
{
    match (mode, starts) {
        (ScanMode::Parallel, None) => scan_parallel(op, elems),
        (ScanMode::Parallel, Some(s)) => scan_parallel_segmented(op, elems, s),
        (ScanMode::Sequential, None) => scan_sequential(op, &elems),
        (ScanMode::Sequential, Some(s)) => scan_sequential_segmented(op, &elems, s),
    }
}

/// Single-step rollout carry for online inference, where future inputs do
/// not exist yet. Matches the sequential fold one timestep at a time.
pub struct OnlineState<A: MemoryAlgebra> {
    carry: Option<A::State>,
}

impl<A: MemoryAlgebra> OnlineState<A> {
    pub fn new() -> Self {
        OnlineState { carry: None }
    }

    /// Consume one timestep's wrapped element; returns the new prefix state.
    pub fn step(&mut self, op: &A, elem: A::State) -> &A::State {
        let next = match &self.carry {
            None => elem,
            Some(c) => op.combine(c, &elem),
        };
        self.carry.insert(next)
    }

    /// Episode boundary: forget everything.
    pub fn reset(&mut self) {
        self.carry = None;
    }

    pub fn carry(&self) -> Option<&A::State> {
        self.carry.as_ref()
    }
}

impl<A: MemoryAlgebra> Default for OnlineState<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::LinearRecurrence;
    use crate::tensor::fill_uniform;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn wrapped_inputs(
        op: &LinearRecurrence,
        rng: &mut ChaCha8Rng,
        len: usize,
    ) -> Vec<<LinearRecurrence as MemoryAlgebra>::State> {
        (0..len)
            .map(|_| {
                let mut x = vec![0.0f32; op.in_len()];
                fill_uniform(rng, &mut x, 1.0);
                op.wrap(&x)
            })
            .collect()
    }

    #[test]
    fn test_parallel_matches_sequential_across_lengths() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let op = LinearRecurrence::new(4, &mut rng).unwrap();
        for len in [1usize, 2, 7, 64, 257] {
            let elems = wrapped_inputs(&op, &mut rng, len);
            let seq = scan_sequential(&op, &elems);
            let par = scan_parallel(&op, elems);
            for t in 0..len {
                for i in 0..4 {
                    let d = (seq[t].value[i] - par[t].value[i]).abs();
                    assert!(d < 1e-4, "len={len} t={t} i={i} diff={d}");
                }
            }
        }
    }

    #[test]
    fn test_online_matches_fold() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let op = LinearRecurrence::new(3, &mut rng).unwrap();
        let elems = wrapped_inputs(&op, &mut rng, 20);
        let seq = scan_sequential(&op, &elems);

        let mut online = OnlineState::new();
        for (t, e) in elems.iter().enumerate() {
            let s = online.step(&op, e.clone());
            for i in 0..3 {
                assert!((s.value[i] - seq[t].value[i]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_segmented_reset_discards_prefix() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let op = LinearRecurrence::new(4, &mut rng).unwrap();
        let elems = wrapped_inputs(&op, &mut rng, 10);
        let mut starts = vec![false; 10];
        starts[5] = true;

        let packed = scan_parallel_segmented(&op, elems.clone(), &starts);
        let second_alone = scan_parallel(&op, elems[5..].to_vec());
        for t in 0..5 {
            for i in 0..4 {
                let d = (packed[5 + t].value[i] - second_alone[t].value[i]).abs();
                assert!(d < 1e-5, "post-reset state leaked prefix: t={t} diff={d}");
            }
        }
    }

    #[test]
    fn test_empty_sequence() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let op = LinearRecurrence::new(2, &mut rng).unwrap();
        assert!(scan_parallel(&op, Vec::new()).is_empty());
        assert!(scan_sequential(&op, &[]).is_empty());
    }
}
