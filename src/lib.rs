//! Control layer for training and decoding a Listen-Attend-Spell style
//! sequence-to-sequence acoustic model.
//!
//! The network itself (layers, loss, gradients, beam search) lives behind
//! the collaborator traits in [`model`] and [`source`]; this crate drives
//! minibatch iteration, periodic validation with adaptive learning-rate
//! rollback, checkpoint persistence and the final decoding pass.

pub mod checkpoint;
pub mod cli;
pub mod coder;
pub mod config;
pub mod decode;
pub mod metrics;
pub mod mock;
pub mod model;
pub mod session;
pub mod source;
pub mod train;

pub use checkpoint::{CheckpointMeta, CheckpointStore};
pub use config::NnetConfig;
pub use decode::{decode, DecodingResult, Nbest};
pub use metrics::{MetricsLog, METRICS_SCHEMA_VERSION};
pub use model::{
    DecodingContext, DecodingModel, Hypothesis, TrainableModel, TrainingContext, TrainingModel,
};
pub use session::TrainingSession;
pub use source::{Batch, BatchSource, UtteranceReader, ValidationSet};
pub use train::{train, TrainOutcome, TrainingState};
