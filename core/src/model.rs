//! Residual memory model: configuration, stacking, dispatch, checkpoints.
//!
//! A model is an ordered stack of [`MemoryLayer`]s (the first layer projects
//! `input_size`, the rest speak `recurrent_size`) plus a dense head to
//! `output_size`. Structure (layer count, operator kind, widths) is fixed at
//! construction; training replaces parameter values only.
//!
//! Operator selection is a closed enum ([`AlgebraKind`]) resolved by
//! [`build_residual_model`]; there is no global registry of constructors.

use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algebra::{AlgebraKind, MemoryAlgebra};
use crate::error::{ConfigError, NumericError, StrandError};
use crate::gated::GatedRecurrence;
use crate::layer::MemoryLayer;
use crate::linear::LinearRecurrence;
use crate::log_bayes::LogBayes;
use crate::rotor::SphericalRotor;
use crate::scan::{OnlineState, ScanMode};
use crate::selective::SelectiveState;
use crate::tensor::{affine_f32, xavier_init};

/// Model configuration. Immutable after construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_size: usize,
    pub recurrent_size: usize,
    pub output_size: usize,
    pub num_layers: usize,
    pub kind: AlgebraKind,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (what, got) in [
            ("input_size", self.input_size),
            ("recurrent_size", self.recurrent_size),
            ("output_size", self.output_size),
            ("num_layers", self.num_layers),
        ] {
            if got == 0 {
                return Err(ConfigError::NonPositiveSize { what, got });
            }
        }
        Ok(())
    }

    /// Tiny model for fast test iteration.
    pub fn test_config(kind: AlgebraKind) -> Self {
        ModelConfig {
            input_size: 4,
            recurrent_size: 8,
            output_size: 3,
            num_layers: 2,
            kind,
        }
    }
}

/// Stack of residual memory layers with a dense output head.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResidualModel<A> {
    input_size: usize,
    recurrent_size: usize,
    output_size: usize,
    layers: Vec<MemoryLayer<A>>,
    head_w: Vec<f32>,
    head_b: Vec<f32>,
}

impl<A: MemoryAlgebra> ResidualModel<A> {
    /// Build `num_layers` layers, constructing one operator per layer via
    /// `make_op`. Each layer owns its operator; no parameter sharing.
    pub fn new(
        input_size: usize,
        recurrent_size: usize,
        output_size: usize,
        num_layers: usize,
        mut make_op: impl FnMut(&mut ChaCha8Rng) -> Result<A, ConfigError>,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, ConfigError> {
        if num_layers == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "num_layers",
                got: 0,
            });
        }
        if output_size == 0 {
            return Err(ConfigError::NonPositiveSize {
                what: "output_size",
                got: 0,
            });
        }
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let in_size = if i == 0 { input_size } else { recurrent_size };
            let op = make_op(rng)?;
            layers.push(MemoryLayer::new(op, in_size, recurrent_size, i, rng)?);
        }
        Self::from_layers(layers, output_size, rng)
    }

    /// Assemble a model from pre-built layers, validating that neighboring
    /// widths agree. A mismatch is a construction error, never a runtime
    /// broadcast.
    pub fn from_layers(
        layers: Vec<MemoryLayer<A>>,
        output_size: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, ConfigError> {
        let first = layers.first().ok_or(ConfigError::NonPositiveSize {
            what: "num_layers",
            got: 0,
        })?;
        let input_size = first.input_size();
        for (i, pair) in layers.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.input_size() != prev.recurrent_size() {
                return Err(ConfigError::LayerShapeMismatch {
                    layer: i + 1,
                    expected: prev.recurrent_size(),
                    got: next.input_size(),
                });
            }
        }
        let recurrent_size = layers[layers.len() - 1].recurrent_size();
        Ok(ResidualModel {
            input_size,
            recurrent_size,
            output_size,
            head_w: xavier_init(rng, output_size, recurrent_size),
            head_b: vec![0.0f32; output_size],
            layers,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn recurrent_size(&self) -> usize {
        self.recurrent_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    // ── Parameter flattening ─────────────────────────────────────────

    /// Concatenate every parameter buffer, layers first, head last.
    /// Order matches `load_flat_params`.
    pub fn flatten_params(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_params());
        for layer in &self.layers {
            for view in layer.param_views() {
                flat.extend_from_slice(view);
            }
        }
        flat.extend_from_slice(&self.head_w);
        flat.extend_from_slice(&self.head_b);
        flat
    }

    /// Inverse of `flatten_params`.
    pub fn load_flat_params(&mut self, flat: &[f32]) -> Result<(), ConfigError> {
        let expected = self.num_params();
        if flat.len() != expected {
            return Err(ConfigError::InputShapeMismatch {
                expected,
                got: flat.len(),
                shape: "flat parameter vector",
            });
        }
        let mut offset = 0;
        for layer in &mut self.layers {
            for view in layer.param_views_mut() {
                view.copy_from_slice(&flat[offset..offset + view.len()]);
                offset += view.len();
            }
        }
        let hw = self.head_w.len();
        self.head_w.copy_from_slice(&flat[offset..offset + hw]);
        offset += hw;
        let hb = self.head_b.len();
        self.head_b.copy_from_slice(&flat[offset..offset + hb]);
        Ok(())
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|l| l.num_params()).sum::<usize>()
            + self.head_w.len()
            + self.head_b.len()
    }
}

impl<A: MemoryAlgebra + Sync> ResidualModel<A> {
    /// Forward one sequence: x is [seq_len, input_size], returns
    /// [seq_len, output_size].
    fn forward_one(
        &self,
        x: &[f32],
        seq_len: usize,
        starts: Option<&[bool]>,
        mode: ScanMode,
    ) -> Result<Vec<f32>, NumericError> {
        let mut h = x.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward_sequence(&h, seq_len, starts, mode, i)?;
        }
        let rec = self.recurrent_size;
        let out = self.output_size;
        let mut y = vec![0.0f32; seq_len * out];
        for t in 0..seq_len {
            affine_f32(
                &self.head_w,
                &self.head_b,
                &h[t * rec..(t + 1) * rec],
                &mut y[t * out..(t + 1) * out],
                out,
                rec,
            );
        }
        Ok(y)
    }

    /// Batched forward.
    ///
    /// `xs` is [batch, seq_len, input_size] flat; `starts`, when present, is
    /// [batch, seq_len] episode-start flags. Batch elements are independent
    /// and evaluated across rayon; the result is identical to a serial loop.
    pub fn forward(
        &self,
        xs: &[f32],
        batch: usize,
        seq_len: usize,
        starts: Option<&[bool]>,
        mode: ScanMode,
    ) -> Result<Vec<f32>, StrandError> {
        let expected = batch * seq_len * self.input_size;
        if xs.len() != expected {
            return Err(ConfigError::InputShapeMismatch {
                expected,
                got: xs.len(),
                shape: "[batch, seq_len, input_size]",
            }
            .into());
        }
        if let Some(s) = starts {
            if s.len() != batch * seq_len {
                return Err(ConfigError::InputShapeMismatch {
                    expected: batch * seq_len,
                    got: s.len(),
                    shape: "[batch, seq_len] start flags",
                }
                .into());
            }
        }

        let per_seq = seq_len * self.input_size;
        let results: Result<Vec<Vec<f32>>, NumericError> = (0..batch)
            .into_par_iter()
            .map(|b| {
                let x = &xs[b * per_seq..(b + 1) * per_seq];
                let s = starts.map(|s| &s[b * seq_len..(b + 1) * seq_len]);
                self.forward_one(x, seq_len, s, mode)
            })
            .collect();

        let mut out = Vec::with_capacity(batch * seq_len * self.output_size);
        for y in results? {
            out.extend_from_slice(&y);
        }
        Ok(out)
    }

    /// Fresh rollout carries for online inference.
    pub fn rollout(&self) -> ModelRollout<A> {
        ModelRollout {
            carries: self.layers.iter().map(|_| OnlineState::new()).collect(),
            timestep: 0,
        }
    }
}

/// Online rollout state: one carry per layer plus a step counter.
///
/// Feeding timesteps one at a time reproduces the sequential-mode forward
/// pass position by position; that is the inference/training parity contract.
pub struct ModelRollout<A: MemoryAlgebra> {
    carries: Vec<OnlineState<A>>,
    timestep: usize,
}

impl<A: MemoryAlgebra + Sync> ModelRollout<A> {
    /// Consume one raw timestep, producing [output_size] features.
    pub fn step(&mut self, model: &ResidualModel<A>, x: &[f32]) -> Result<Vec<f32>, StrandError> {
        if x.len() != model.input_size {
            return Err(ConfigError::InputShapeMismatch {
                expected: model.input_size,
                got: x.len(),
                shape: "[input_size]",
            }
            .into());
        }
        let mut h = x.to_vec();
        for (i, (layer, carry)) in model.layers.iter().zip(self.carries.iter_mut()).enumerate() {
            h = layer.step_online(carry, &h, i, self.timestep)?;
        }
        let mut y = vec![0.0f32; model.output_size];
        affine_f32(
            &model.head_w,
            &model.head_b,
            &h,
            &mut y,
            model.output_size,
            model.recurrent_size,
        );
        self.timestep += 1;
        Ok(y)
    }

    /// Episode boundary: all layer carries forget their state.
    pub fn reset(&mut self) {
        for c in &mut self.carries {
            c.reset();
        }
    }
}

// ── Kind dispatch ────────────────────────────────────────────────────

/// A residual model over one of the closed set of operator kinds.
#[derive(Clone, Serialize, Deserialize)]
pub enum MemoryModel {
    Linear(ResidualModel<LinearRecurrence>),
    Gated(ResidualModel<GatedRecurrence>),
    LogBayes(ResidualModel<LogBayes>),
    Rotor(ResidualModel<SphericalRotor>),
    Selective(ResidualModel<SelectiveState>),
}

macro_rules! each_model {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            MemoryModel::Linear($m) => $body,
            MemoryModel::Gated($m) => $body,
            MemoryModel::LogBayes($m) => $body,
            MemoryModel::Rotor($m) => $body,
            MemoryModel::Selective($m) => $body,
        }
    };
}

impl MemoryModel {
    pub fn kind(&self) -> AlgebraKind {
        match self {
            MemoryModel::Linear(_) => AlgebraKind::LinearRecurrence,
            MemoryModel::Gated(_) => AlgebraKind::GatedRecurrence,
            MemoryModel::LogBayes(_) => AlgebraKind::LogBayes,
            MemoryModel::Rotor(_) => AlgebraKind::SphericalRotor,
            MemoryModel::Selective(_) => AlgebraKind::SelectiveState,
        }
    }

    pub fn forward(
        &self,
        xs: &[f32],
        batch: usize,
        seq_len: usize,
        starts: Option<&[bool]>,
        mode: ScanMode,
    ) -> Result<Vec<f32>, StrandError> {
        each_model!(self, m => m.forward(xs, batch, seq_len, starts, mode))
    }

    pub fn flatten_params(&self) -> Vec<f32> {
        each_model!(self, m => m.flatten_params())
    }

    pub fn load_flat_params(&mut self, flat: &[f32]) -> Result<(), ConfigError> {
        each_model!(self, m => m.load_flat_params(flat))
    }

    pub fn num_params(&self) -> usize {
        each_model!(self, m => m.num_params())
    }

    pub fn input_size(&self) -> usize {
        each_model!(self, m => m.input_size())
    }

    pub fn output_size(&self) -> usize {
        each_model!(self, m => m.output_size())
    }

    pub fn num_layers(&self) -> usize {
        each_model!(self, m => m.num_layers())
    }
}

/// Exposed construction surface: build a residual model of the requested
/// operator kind. All size validation happens here.
pub fn build_residual_model(cfg: &ModelConfig, seed: u64) -> Result<MemoryModel, ConfigError> {
    cfg.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let rec = cfg.recurrent_size;
    let model = match cfg.kind {
        AlgebraKind::LinearRecurrence => MemoryModel::Linear(ResidualModel::new(
            cfg.input_size,
            rec,
            cfg.output_size,
            cfg.num_layers,
            |rng| LinearRecurrence::new(rec, rng),
            &mut rng,
        )?),
        AlgebraKind::GatedRecurrence => MemoryModel::Gated(ResidualModel::new(
            cfg.input_size,
            rec,
            cfg.output_size,
            cfg.num_layers,
            |rng| GatedRecurrence::new(rec, rng),
            &mut rng,
        )?),
        AlgebraKind::LogBayes => MemoryModel::LogBayes(ResidualModel::new(
            cfg.input_size,
            rec,
            cfg.output_size,
            cfg.num_layers,
            |rng| LogBayes::new(rec, rng),
            &mut rng,
        )?),
        AlgebraKind::SphericalRotor => MemoryModel::Rotor(ResidualModel::new(
            cfg.input_size,
            rec,
            cfg.output_size,
            cfg.num_layers,
            |rng| SphericalRotor::new(rec, rng),
            &mut rng,
        )?),
        AlgebraKind::SelectiveState => MemoryModel::Selective(ResidualModel::new(
            cfg.input_size,
            rec,
            cfg.output_size,
            cfg.num_layers,
            |rng| SelectiveState::new(rec, rng),
            &mut rng,
        )?),
    };
    debug!(
        kind = cfg.kind.name(),
        layers = cfg.num_layers,
        params = model.num_params(),
        "built residual memory model"
    );
    Ok(model)
}

// ── Checkpoints ──────────────────────────────────────────────────────

/// Write the full model (structure + parameters) as a JSON blob.
pub fn save_checkpoint(model: &MemoryModel, path: &Path) -> Result<(), StrandError> {
    let json = serde_json::to_string(model)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Restore a model saved by [`save_checkpoint`].
pub fn load_checkpoint(path: &Path) -> Result<MemoryModel, StrandError> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
