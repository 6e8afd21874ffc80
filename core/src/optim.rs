//! Flat-buffer optimizers and the learning-rate schedule.
//!
//! Optimizers operate on the model's flattened parameter vector; they never
//! see model structure. Moment buffers are sized lazily on the first step and
//! must keep the same length for the optimizer's lifetime.

use serde::{Deserialize, Serialize};

/// One in-place parameter update from a gradient of the same length.
pub trait Optimizer {
    fn step(&mut self, params: &mut [f32], grads: &[f32], lr: f32);
}

/// Plain stochastic gradient descent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Sgd;

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [f32], grads: &[f32], lr: f32) {
        debug_assert_eq!(params.len(), grads.len());
        for (p, g) in params.iter_mut().zip(grads.iter()) {
            *p -= lr * g;
        }
    }
}

/// AdamW with decoupled weight decay.
///
/// Bias correction divides the moment estimates by `1 - beta^t`; the running
/// step count lives in the optimizer, so reusing one instance across epochs
/// continues the schedule instead of restarting it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdamW {
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamW {
    pub fn new(weight_decay: f32) -> Self {
        AdamW {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

impl Default for AdamW {
    fn default() -> Self {
        AdamW::new(0.01)
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &mut [f32], grads: &[f32], lr: f32) {
        debug_assert_eq!(params.len(), grads.len());
        if self.m.is_empty() {
            self.m = vec![0.0f32; params.len()];
            self.v = vec![0.0f32; params.len()];
        }
        debug_assert_eq!(self.m.len(), params.len());

        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= lr * (m_hat / (v_hat.sqrt() + self.eps) + self.weight_decay * params[i]);
        }
    }
}

/// Cosine learning-rate schedule with linear warmup.
///
/// Ramps linearly from 0 to `lr_peak` over `warmup` steps, then follows a
/// half cosine down to `lr_min` at `total` steps; clamped at `lr_min` beyond.
pub fn cosine_lr(step: u64, warmup: u64, total: u64, lr_peak: f32, lr_min: f32) -> f32 {
    if warmup > 0 && step < warmup {
        return lr_peak * step as f32 / warmup as f32;
    }
    if step >= total {
        return lr_min;
    }
    let span = (total - warmup) as f32;
    let progress = (step - warmup) as f32 / span;
    let cos = 0.5 * (1.0 + (std::f32::consts::PI * progress).cos());
    lr_min + (lr_peak - lr_min) * cos
}
