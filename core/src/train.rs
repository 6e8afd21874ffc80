//! Training loop: sharded epochs over a fixed dataset.
//!
//! The trainer never differentiates anything itself; gradients come from a
//! [`GradientSource`]. The bundled [`NumericGradient`] uses central finite
//! differences over the flattened parameter vector, which is slow but exact
//! to O(eps^2) and works for every operator kind.
//!
//! Shards are visited in a caller-supplied order, and each shard's update is
//! atomic: a non-finite gradient aborts the epoch before the parameters are
//! touched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, NumericError, StrandError};
use crate::model::MemoryModel;
use crate::optim::Optimizer;
use crate::scan::ScanMode;
use crate::tensor::log_softmax_f32;

/// Loss (and optional accuracy) over a batch of predictions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectiveValue {
    pub loss: f32,
    pub accuracy: Option<f32>,
}

/// Scores predictions [batch, seq_len, out] against targets. Target layout is
/// objective-specific.
pub trait Objective {
    fn evaluate(
        &self,
        preds: &[f32],
        targets: &[f32],
        batch: usize,
        seq_len: usize,
        out: usize,
    ) -> ObjectiveValue;
}

/// Mean squared error over every timestep. Targets are [batch, seq_len, out].
#[derive(Clone, Copy, Debug, Default)]
pub struct MseLoss;

impl Objective for MseLoss {
    fn evaluate(
        &self,
        preds: &[f32],
        targets: &[f32],
        batch: usize,
        seq_len: usize,
        out: usize,
    ) -> ObjectiveValue {
        debug_assert_eq!(preds.len(), batch * seq_len * out);
        debug_assert_eq!(targets.len(), preds.len());
        let mut sum = 0.0f64;
        for (p, t) in preds.iter().zip(targets.iter()) {
            let d = (p - t) as f64;
            sum += d * d;
        }
        ObjectiveValue {
            loss: (sum / preds.len() as f64) as f32,
            accuracy: None,
        }
    }
}

/// Cross-entropy on the terminal timestep's logits, one class label per
/// sequence. Targets are [batch] class indices stored as f32.
#[derive(Clone, Copy, Debug, Default)]
pub struct CrossEntropyLoss;

impl Objective for CrossEntropyLoss {
    fn evaluate(
        &self,
        preds: &[f32],
        targets: &[f32],
        batch: usize,
        seq_len: usize,
        out: usize,
    ) -> ObjectiveValue {
        debug_assert_eq!(preds.len(), batch * seq_len * out);
        debug_assert_eq!(targets.len(), batch);
        let mut loss = 0.0f64;
        let mut correct = 0usize;
        let mut lsm = vec![0.0f32; out];
        for b in 0..batch {
            let logits = &preds[(b * seq_len + seq_len - 1) * out..(b * seq_len + seq_len) * out];
            lsm.copy_from_slice(logits);
            log_softmax_f32(&mut lsm);
            let class = targets[b] as usize;
            debug_assert!(class < out);
            loss -= lsm[class] as f64;
            let argmax = logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            if argmax == class {
                correct += 1;
            }
        }
        ObjectiveValue {
            loss: (loss / batch as f64) as f32,
            accuracy: Some(correct as f32 / batch as f32),
        }
    }
}

// ── Dataset shards ───────────────────────────────────────────────────

/// One epoch's worth of examples: inputs [examples, seq_len, input_size],
/// objective-specific targets, optional per-position start flags.
pub struct EpochData<'a> {
    pub xs: &'a [f32],
    pub targets: &'a [f32],
    pub starts: Option<&'a [bool]>,
    pub examples: usize,
    pub seq_len: usize,
}

/// A contiguous slice of the epoch data, one optimizer step's worth.
pub struct ShardView<'a> {
    pub xs: &'a [f32],
    pub targets: &'a [f32],
    pub starts: Option<&'a [bool]>,
    pub batch: usize,
    pub seq_len: usize,
}

impl<'a> EpochData<'a> {
    fn shard(&self, idx: usize, shard_size: usize, input_size: usize, targets_per: usize) -> ShardView<'a> {
        let lo = idx * shard_size;
        let per_x = self.seq_len * input_size;
        ShardView {
            xs: &self.xs[lo * per_x..(lo + shard_size) * per_x],
            targets: &self.targets[lo * targets_per..(lo + shard_size) * targets_per],
            starts: self
                .starts
                .map(|s| &s[lo * self.seq_len..(lo + shard_size) * self.seq_len]),
            batch: shard_size,
            seq_len: self.seq_len,
        }
    }
}

/// Forward the shard and score it.
pub fn evaluate_objective(
    model: &MemoryModel,
    shard: &ShardView<'_>,
    objective: &dyn Objective,
    mode: ScanMode,
) -> Result<ObjectiveValue, StrandError> {
    let preds = model.forward(shard.xs, shard.batch, shard.seq_len, shard.starts, mode)?;
    Ok(objective.evaluate(
        &preds,
        shard.targets,
        shard.batch,
        shard.seq_len,
        model.output_size(),
    ))
}

// ── Gradient provision ───────────────────────────────────────────────

/// Produces the loss and a full-length gradient for one shard. The model is
/// borrowed mutably so implementations may perturb parameters, but must
/// restore them before returning.
pub trait GradientSource {
    fn gradient(
        &mut self,
        model: &mut MemoryModel,
        shard: &ShardView<'_>,
        objective: &dyn Objective,
        mode: ScanMode,
    ) -> Result<(ObjectiveValue, Vec<f32>), StrandError>;
}

/// Central-difference gradients: (L(p + eps) - L(p - eps)) / 2 eps per
/// coordinate. Cost is two forwards per parameter.
#[derive(Clone, Copy, Debug)]
pub struct NumericGradient {
    pub epsilon: f32,
}

impl Default for NumericGradient {
    fn default() -> Self {
        NumericGradient { epsilon: 1e-3 }
    }
}

impl GradientSource for NumericGradient {
    fn gradient(
        &mut self,
        model: &mut MemoryModel,
        shard: &ShardView<'_>,
        objective: &dyn Objective,
        mode: ScanMode,
    ) -> Result<(ObjectiveValue, Vec<f32>), StrandError> {
        let base = evaluate_objective(model, shard, objective, mode)?;
        let mut flat = model.flatten_params();
        let mut grad = vec![0.0f32; flat.len()];
        for i in 0..flat.len() {
            let orig = flat[i];
            flat[i] = orig + self.epsilon;
            model.load_flat_params(&flat)?;
            let up = evaluate_objective(model, shard, objective, mode)?.loss;
            flat[i] = orig - self.epsilon;
            model.load_flat_params(&flat)?;
            let down = evaluate_objective(model, shard, objective, mode)?.loss;
            flat[i] = orig;
            grad[i] = (up - down) / (2.0 * self.epsilon);
        }
        model.load_flat_params(&flat)?;
        Ok((base, grad))
    }
}

// ── Epoch driver ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    pub shard_size: usize,
    pub lr: f32,
    pub mode: ScanMode,
}

/// Aggregated result of one epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochMetrics {
    pub mean_loss: f32,
    pub accuracy: Option<f32>,
    pub shards: usize,
}

/// One pass over `data` in the caller's shard order.
///
/// `order` must be a permutation of 0..examples/shard_size; supplying the
/// same order (and seeds) twice reproduces the run bit for bit. All shape
/// validation happens before the first gradient is computed.
pub fn train_epoch(
    model: &mut MemoryModel,
    data: &EpochData<'_>,
    order: &[usize],
    cfg: &TrainConfig,
    objective: &dyn Objective,
    source: &mut dyn GradientSource,
    opt: &mut dyn Optimizer,
) -> Result<EpochMetrics, StrandError> {
    if cfg.shard_size == 0 || data.examples == 0 || data.examples % cfg.shard_size != 0 {
        return Err(ConfigError::ShardMismatch {
            examples: data.examples,
            shard_size: cfg.shard_size,
        }
        .into());
    }
    if data.targets.is_empty() || data.targets.len() % data.examples != 0 {
        return Err(ConfigError::InputShapeMismatch {
            expected: data.examples,
            got: data.targets.len(),
            shape: "targets, a nonzero multiple of examples",
        }
        .into());
    }
    let num_shards = data.examples / cfg.shard_size;
    if order.len() != num_shards {
        return Err(ConfigError::ShardOrderMismatch {
            expected: num_shards,
            got: order.len(),
        }
        .into());
    }
    let mut seen = vec![false; num_shards];
    for &idx in order {
        if idx >= num_shards || seen[idx] {
            return Err(ConfigError::ShardOrderMismatch {
                expected: num_shards,
                got: idx,
            }
            .into());
        }
        seen[idx] = true;
    }

    let input_size = model.input_size();
    let targets_per = data.targets.len() / data.examples;

    let mut loss_sum = 0.0f64;
    let mut acc_sum = 0.0f64;
    let mut has_acc = false;
    for (pos, &idx) in order.iter().enumerate() {
        let shard = data.shard(idx, cfg.shard_size, input_size, targets_per);
        let (value, grad) = source.gradient(model, &shard, objective, cfg.mode)?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(NumericError::NonFiniteGradient { shard: idx }.into());
        }
        let mut flat = model.flatten_params();
        opt.step(&mut flat, &grad, cfg.lr);
        model.load_flat_params(&flat)?;

        loss_sum += value.loss as f64;
        if let Some(a) = value.accuracy {
            acc_sum += a as f64;
            has_acc = true;
        }
        debug!(shard = idx, pos, loss = value.loss, "shard update applied");
    }

    let metrics = EpochMetrics {
        mean_loss: (loss_sum / num_shards as f64) as f32,
        accuracy: has_acc.then(|| (acc_sum / num_shards as f64) as f32),
        shards: num_shards,
    };
    info!(
        shards = metrics.shards,
        mean_loss = metrics.mean_loss,
        "epoch complete"
    );
    Ok(metrics)
}
