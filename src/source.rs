//! Data collaborator contracts: minibatch dispensing and utterance reading.
//!
//! The control loop owns the dispenser's cursor exclusively. `return_batch`
//! is required to be the exact inverse of `get_batch`/`skip_batch`, including
//! across epoch wrap-around, so the rollback arithmetic in the training loop
//! (rewinding `step - validation_step` batches) is always well defined.

use anyhow::Result;
use candle_core::Tensor;

/// One minibatch of utterances. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Batch {
    /// One feature matrix per utterance, shaped `(frames, input_dim)`.
    pub inputs: Vec<Tensor>,
    /// One target label sequence per utterance.
    pub labels: Vec<Vec<u32>>,
}

/// The fixed validation set, built once at loop entry by concatenating
/// `valid_batches` batches.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    pub inputs: Vec<Tensor>,
    pub labels: Vec<Vec<u32>>,
}

impl ValidationSet {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Supplies minibatches and maintains a repositionable cursor.
pub trait BatchSource {
    /// Produce the batch under the cursor and advance.
    fn get_batch(&mut self) -> Result<Batch>;

    /// Move the cursor back one batch, undoing one `get_batch` or
    /// `skip_batch`.
    fn return_batch(&mut self);

    /// Advance the cursor one batch without producing data.
    fn skip_batch(&mut self);

    /// Partition the remaining data into the training split. Batches drawn
    /// before the split no longer count towards `num_batches`.
    fn split(&mut self);

    /// Batches per epoch of the training split.
    fn num_batches(&self) -> usize;

    /// Total utterances in the training split.
    fn size(&self) -> usize;

    fn max_input_length(&self) -> usize;

    fn max_target_length(&self) -> usize;
}

/// Streams single utterances for decoding.
pub trait UtteranceReader {
    /// Returns `(utterance_id, feature_matrix, wrapped)`. `wrapped` is true
    /// exactly when the reader's cursor has completed a full pass and looped
    /// back to the start; the returned utterance is then a sentinel and must
    /// not be processed.
    fn get_utt(&mut self) -> Result<(String, Tensor, bool)>;

    fn max_input_length(&self) -> usize;
}
