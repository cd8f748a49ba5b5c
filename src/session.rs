//! Training session: one training-mode model instance glued to the
//! checkpoint store.
//!
//! The session owns exclusive, mutable access to the model's parameters and
//! optimizer state for the duration of the training phase; it is acquired at
//! loop entry and dropped at loop exit.

use anyhow::{bail, Result};

use crate::checkpoint::CheckpointStore;
use crate::model::TrainingModel;
use crate::source::{Batch, ValidationSet};

pub struct TrainingSession<'a, M: TrainingModel> {
    model: M,
    store: &'a CheckpointStore,
}

impl<'a, M: TrainingModel> TrainingSession<'a, M> {
    pub fn new(model: M, store: &'a CheckpointStore) -> Self {
        Self { model, store }
    }

    pub fn update(&mut self, batch: &Batch) -> Result<(f32, f64)> {
        self.model.update(batch)
    }

    pub fn evaluate(&mut self, validation: &ValidationSet) -> Result<(f32, f32)> {
        self.model.evaluate(validation)
    }

    pub fn halve_learning_rate(&mut self) -> Result<()> {
        self.model.halve_learning_rate()
    }

    pub fn save_step(&self, step: usize, loss: f32) -> Result<()> {
        let path = self.store.step_path(step);
        self.store.save_locked(&path, |p| self.model.save(p))?;
        self.store.write_meta(&path, step, loss)
    }

    /// Restore the session from a step-tagged checkpoint. A missing
    /// checkpoint for an explicitly requested resume is fatal.
    pub fn restore_step(&mut self, step: usize) -> Result<()> {
        let path = self.store.step_path(step);
        if !path.exists() {
            bail!(
                "cannot resume from step {}: no checkpoint at {:?}",
                step,
                path
            );
        }
        self.model.restore(&path)
    }

    /// Persist the rolling best-accepted checkpoint. The meta sidecar
    /// records the accepted validation error.
    pub fn save_validated(&self, step: usize, error: f32) -> Result<()> {
        let path = self.store.validated_path();
        self.store.save_locked(&path, |p| self.model.save(p))?;
        self.store.write_meta(&path, step, error)
    }

    pub fn restore_validated(&mut self) -> Result<()> {
        let path = self.store.validated_path();
        if !path.exists() {
            bail!("no validated checkpoint at {:?}", path);
        }
        self.model.restore(&path)
    }

    /// Export the terminal model (parameters only).
    pub fn save_final(&self) -> Result<()> {
        let path = self.store.final_path();
        self.store.save_locked(&path, |p| self.model.export(p))
    }
}
