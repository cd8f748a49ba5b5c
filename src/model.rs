//! Trainable model collaborator contracts.
//!
//! The network itself (layers, loss, gradients) lives behind these traits;
//! the control loop only drives updates, evaluations, learning-rate halving
//! and parameter persistence. A model is instantiable in training mode
//! (batched) or decoding mode (single utterance) from shared settings.

use std::path::Path;

use anyhow::Result;
use candle_core::Tensor;

use crate::source::{Batch, ValidationSet};

/// Settings resolved by the training loop before the training-mode model is
/// built: data geometry, schedule length and regularisation.
#[derive(Debug, Clone)]
pub struct TrainingContext {
    pub input_dim: usize,
    pub max_input_length: usize,
    pub max_target_length: usize,
    pub initial_learning_rate: f64,
    pub learning_rate_decay: f64,
    pub num_steps: usize,
    pub minibatch_size: usize,
    pub l2_cost_weight: f64,
}

#[derive(Debug, Clone)]
pub struct DecodingContext {
    pub input_dim: usize,
    pub max_input_length: usize,
}

/// One candidate output sequence for an utterance, with its log probability.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub labels: Vec<u32>,
    pub score: f32,
}

/// A training-mode model instance. Owns the trainable parameters and the
/// optimizer state (including the live learning rate) for the duration of
/// the training phase.
pub trait TrainingModel {
    /// One optimization update on a minibatch. Returns the batch loss and
    /// the learning rate that was applied.
    fn update(&mut self, batch: &Batch) -> Result<(f32, f64)>;

    /// Evaluate on the fixed validation set. Returns `(error, loss)`.
    fn evaluate(&mut self, validation: &ValidationSet) -> Result<(f32, f32)>;

    fn halve_learning_rate(&mut self) -> Result<()>;

    /// Persist the full training state (parameters plus optimizer and
    /// learning-rate state) to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Restore the full training state from `path`.
    fn restore(&mut self, path: &Path) -> Result<()>;

    /// Persist the parameters only, for the terminal model export.
    fn export(&self, path: &Path) -> Result<()>;
}

/// A decoding-mode model instance: a read-mostly copy loaded fresh from a
/// checkpoint, never active concurrently with a training instance.
pub trait DecodingModel {
    fn restore(&mut self, path: &Path) -> Result<()>;

    /// Decode a single utterance into an ordered hypothesis list, best
    /// first.
    fn decode(&mut self, features: &Tensor) -> Result<Vec<Hypothesis>>;
}

/// Factory for the two instantiation modes.
pub trait TrainableModel {
    type Training: TrainingModel;
    type Decoding: DecodingModel;

    fn training(&self, ctx: &TrainingContext) -> Result<Self::Training>;

    fn decoding(&self, ctx: &DecodingContext) -> Result<Self::Decoding>;
}
