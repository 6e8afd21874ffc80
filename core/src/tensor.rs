//! Flat f32 numeric helpers.
//!
//! All buffers in this crate are flat `Vec<f32>` in row-major layout; these
//! helpers are the only place raw index arithmetic for dense linear algebra
//! lives. Shapes are checked with `debug_assert`: callers own shape
//! correctness, construction-time validation owns configuration correctness.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// out[rows] = w[rows, cols] @ x[cols] + b[rows]
///
/// The per-timestep projection primitive; `b` may be empty for bias-free maps.
pub fn affine_f32(w: &[f32], b: &[f32], x: &[f32], out: &mut [f32], rows: usize, cols: usize) {
    debug_assert_eq!(w.len(), rows * cols);
    debug_assert_eq!(x.len(), cols);
    debug_assert_eq!(out.len(), rows);
    debug_assert!(b.is_empty() || b.len() == rows);
    for i in 0..rows {
        let mut sum = if b.is_empty() { 0.0 } else { b[i] };
        let row = &w[i * cols..(i + 1) * cols];
        for (wv, xv) in row.iter().zip(x.iter()) {
            sum += wv * xv;
        }
        out[i] = sum;
    }
}

pub fn sigmoid_f32(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable log(sum(exp(x))) via max-shift.
pub fn logsumexp_f32(x: &[f32]) -> f32 {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f32 = x.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// In-place log-softmax over a single vector.
pub fn log_softmax_f32(x: &mut [f32]) {
    let lse = logsumexp_f32(x);
    for v in x.iter_mut() {
        *v -= lse;
    }
}

/// In-place softmax over a single vector (max-shifted).
pub fn softmax_f32(x: &mut [f32]) {
    log_softmax_f32(x);
    for v in x.iter_mut() {
        *v = v.exp();
    }
}

/// Layer normalization of one feature vector with learnable scale/shift.
pub fn layer_norm_f32(x: &[f32], gamma: &[f32], beta: &[f32], out: &mut [f32]) {
    let n = x.len();
    debug_assert_eq!(gamma.len(), n);
    debug_assert_eq!(beta.len(), n);
    debug_assert_eq!(out.len(), n);
    let mean: f32 = x.iter().sum::<f32>() / n as f32;
    let var: f32 = x.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
    let inv_std = 1.0 / (var + 1e-5).sqrt();
    for i in 0..n {
        out[i] = gamma[i] * (x[i] - mean) * inv_std + beta[i];
    }
}

/// Fill a buffer with uniform values in [-scale, scale].
pub fn fill_uniform(rng: &mut ChaCha8Rng, buf: &mut [f32], scale: f32) {
    for v in buf.iter_mut() {
        *v = (rng.gen::<f32>() * 2.0 - 1.0) * scale;
    }
}

/// Allocate and fill a [rows, cols] weight matrix with Xavier-style scaling.
pub fn xavier_init(rng: &mut ChaCha8Rng, rows: usize, cols: usize) -> Vec<f32> {
    let scale = (2.0 / (rows + cols) as f32).sqrt();
    let mut w = vec![0.0f32; rows * cols];
    fill_uniform(rng, &mut w, scale);
    w
}
