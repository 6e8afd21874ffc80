//! Scan-engine equivalence across every operator kind.
//!
//! The contract under test: for any operator, parallel and sequential
//! evaluation produce the same prefix states within float tolerance, at
//! lengths spanning the serial/rayon threshold, with and without episode
//! boundaries.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use strand_core::scan::{scan, scan_parallel, scan_parallel_segmented, ScanMode};
use strand_core::tensor::fill_uniform;
use strand_core::{
    GatedRecurrence, LinearRecurrence, LogBayes, MemoryAlgebra, SelectiveState, SphericalRotor,
};

const LENGTHS: [usize; 5] = [1, 2, 7, 64, 257];

fn wrapped<A: MemoryAlgebra>(op: &A, rng: &mut ChaCha8Rng, len: usize) -> Vec<A::State> {
    (0..len)
        .map(|_| {
            let mut x = vec![0.0f32; op.in_len()];
            fill_uniform(rng, &mut x, 1.0);
            op.wrap(&x)
        })
        .collect()
}

fn read<A: MemoryAlgebra>(op: &A, s: &A::State) -> Vec<f32> {
    let mut out = vec![0.0f32; op.out_len()];
    op.read_out(s, &mut out);
    out
}

fn assert_modes_agree<A: MemoryAlgebra + Sync>(op: &A, seed: u64, tol: f32) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for len in LENGTHS {
        let elems = wrapped(op, &mut rng, len);
        let seq = scan(op, elems.clone(), None, ScanMode::Sequential);
        let par = scan(op, elems, None, ScanMode::Parallel);
        for t in 0..len {
            let (s, p) = (read(op, &seq[t]), read(op, &par[t]));
            for i in 0..s.len() {
                let d = (s[i] - p[i]).abs();
                assert!(d < tol, "len={len} t={t} i={i} diff={d}");
            }
        }
    }
}

#[test]
fn test_parallel_matches_sequential_linear() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let op = LinearRecurrence::new(8, &mut rng).unwrap();
    assert_modes_agree(&op, 100, 1e-4);
}

#[test]
fn test_parallel_matches_sequential_gated() {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let op = GatedRecurrence::new(8, &mut rng).unwrap();
    assert_modes_agree(&op, 200, 1e-4);
}

#[test]
fn test_parallel_matches_sequential_log_bayes() {
    // Addition reassociates almost losslessly; tolerance scales with length.
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let op = LogBayes::new(8, &mut rng).unwrap();
    assert_modes_agree(&op, 300, 1e-3);
}

#[test]
fn test_parallel_matches_sequential_rotor() {
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let op = SphericalRotor::new(8, &mut rng).unwrap();
    assert_modes_agree(&op, 400, 1e-3);
}

#[test]
fn test_parallel_matches_sequential_selective() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let op = SelectiveState::new(8, &mut rng).unwrap();
    assert_modes_agree(&op, 500, 1e-6);
}

#[test]
fn test_packed_episodes_match_independent_scans() {
    // Three episodes of uneven length packed into one sequence must produce,
    // position for position, the states of three standalone scans.
    let mut rng = ChaCha8Rng::seed_from_u64(6);
    let op = LinearRecurrence::new(4, &mut rng).unwrap();
    let bounds = [0usize, 5, 12, 20];
    let elems = wrapped(&op, &mut rng, 20);
    let mut starts = vec![false; 20];
    for &b in &bounds[..3] {
        starts[b] = true;
    }

    let packed = scan_parallel_segmented(&op, elems.clone(), &starts);
    for w in bounds.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        let alone = scan_parallel(&op, elems[lo..hi].to_vec());
        for t in 0..hi - lo {
            let (p, a) = (read(&op, &packed[lo + t]), read(&op, &alone[t]));
            for i in 0..p.len() {
                assert!(
                    (p[i] - a[i]).abs() < 1e-5,
                    "episode [{lo},{hi}) t={t} leaked state"
                );
            }
        }
    }
}

#[test]
fn test_segmented_modes_agree() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let op = GatedRecurrence::new(4, &mut rng).unwrap();
    let len = 100;
    let elems = wrapped(&op, &mut rng, len);
    let mut starts = vec![false; len];
    for t in (0..len).step_by(17) {
        starts[t] = true;
    }
    let seq = scan(&op, elems.clone(), Some(&starts), ScanMode::Sequential);
    let par = scan(&op, elems, Some(&starts), ScanMode::Parallel);
    for t in 0..len {
        let (s, p) = (read(&op, &seq[t]), read(&op, &par[t]));
        for i in 0..s.len() {
            assert!((s[i] - p[i]).abs() < 1e-4, "t={t} i={i}");
        }
    }
}
