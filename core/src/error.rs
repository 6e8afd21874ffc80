//! Error taxonomy.
//!
//! Two families, by when they can occur:
//! - `ConfigError`: invalid sizes, unrealizable factorizations, shard
//!   mismatches. Raised at construction/setup, never mid-computation,
//!   never retried.
//! - `NumericError`: non-finite values produced during evaluation, with the
//!   offending layer/timestep identified where feasible. Surfaced to the
//!   caller, never clamped.
//!
//! All errors propagate. The core performs no retries and no fallback from
//! parallel to sequential scan.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{what} must be positive, got {got}")]
    NonPositiveSize { what: &'static str, got: usize },

    #[error("recurrent size {requested} cannot be factorized as requested: {reason}")]
    UnrealizableSize { requested: usize, reason: &'static str },

    #[error("layer {layer} expects input width {expected}, neighbor produces {got}")]
    LayerShapeMismatch {
        layer: usize,
        expected: usize,
        got: usize,
    },

    #[error("dataset of {examples} examples is not divisible by shard size {shard_size}")]
    ShardMismatch { examples: usize, shard_size: usize },

    #[error("shard order has {got} entries, expected {expected}")]
    ShardOrderMismatch { expected: usize, got: usize },

    #[error("input buffer holds {got} values, expected {expected} ({shape})")]
    InputShapeMismatch {
        expected: usize,
        got: usize,
        shape: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumericError {
    #[error("non-finite value at layer {layer}, timestep {timestep}")]
    NonFinite { layer: usize, timestep: usize },

    #[error("non-finite gradient in shard {shard}; parameters left untouched")]
    NonFiniteGradient { shard: usize },
}

/// Umbrella error for fallible public entry points.
#[derive(Debug, Error)]
pub enum StrandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
