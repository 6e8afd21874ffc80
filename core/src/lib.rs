//! strand-core: recurrent sequence models as associative memory algebras.
//!
//! A memory operator is a binary `combine` on states that is associative, so
//! evaluating a sequence is a prefix scan: sequentially for online rollout,
//! or with a logarithmic-depth parallel scan for training, with identical
//! results up to float tolerance. Five operator kinds share one trait
//! ([`MemoryAlgebra`]); layers stack them residually into a model, and the
//! trainer drives sharded epochs with externally supplied gradients.

pub mod algebra;
pub mod error;
pub mod gated;
pub mod layer;
pub mod linear;
pub mod log_bayes;
pub mod model;
pub mod optim;
pub mod rotor;
pub mod scan;
pub mod selective;
pub mod tensor;
pub mod train;

pub use algebra::{AlgebraKind, MemoryAlgebra, MonoidAlgebra, Phase};
pub use error::{ConfigError, NumericError, StrandError};
pub use gated::GatedRecurrence;
pub use layer::MemoryLayer;
pub use linear::LinearRecurrence;
pub use log_bayes::LogBayes;
pub use model::{
    build_residual_model, load_checkpoint, save_checkpoint, MemoryModel, ModelConfig,
    ModelRollout, ResidualModel,
};
pub use optim::{cosine_lr, AdamW, Optimizer, Sgd};
pub use rotor::SphericalRotor;
pub use scan::{scan, OnlineState, ScanMode};
pub use selective::SelectiveState;
pub use train::{
    evaluate_objective, train_epoch, CrossEntropyLoss, EpochData, EpochMetrics, GradientSource,
    MseLoss, NumericGradient, Objective, ObjectiveValue, ShardView, TrainConfig,
};
