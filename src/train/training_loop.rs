//! Training control loop and the validation/rollback state machine.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::NnetConfig;
use crate::metrics::MetricsLog;
use crate::model::{TrainableModel, TrainingContext, TrainingModel};
use crate::session::TrainingSession;
use crate::source::{BatchSource, ValidationSet};

/// Mutable loop state. Created at loop entry (possibly resumed from a prior
/// step), dropped when the loop exits. `step` only moves backwards during an
/// explicit rollback, and then exactly to `validation_step`.
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub step: usize,
    pub num_steps: usize,
    pub validation_step: usize,
    pub validation_error: f32,
    pub num_retries: usize,
}

impl TrainingState {
    fn new(starting_step: usize, num_steps: usize) -> Self {
        Self {
            step: starting_step,
            num_steps,
            validation_step: starting_step,
            validation_error: f32::MAX,
            num_retries: 0,
        }
    }
}

/// How the training loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainOutcome {
    /// Reached `num_steps`.
    Completed,
    /// The rollback machine exhausted `valid_retries`; `step` is the
    /// validation step the run was rolled back to.
    RetriesExhausted { step: usize },
    /// Stopped by the interrupt flag after saving a step checkpoint.
    Interrupted { step: usize },
}

/// Verdict of one validation pass.
enum Validation {
    Accepted,
    RolledBack,
    Terminated,
}

/// Run training to completion or early termination.
///
/// Consumes batches from `dispenser`, drives a training-mode instantiation
/// of `model`, persists checkpoints through `store` and leaves the metrics
/// log under the save directory. The final checkpoint and the metrics log
/// are written on every exit path.
pub fn train<M: TrainableModel, B: BatchSource>(
    conf: &NnetConfig,
    input_dim: usize,
    model: &M,
    dispenser: &mut B,
    store: &CheckpointStore,
    interrupt: &AtomicBool,
) -> Result<TrainOutcome> {
    let validation = draw_validation_set(conf, dispenser)?;
    dispenser.split();

    let num_steps = dispenser.num_batches() * conf.num_epochs;
    let mut state = TrainingState::new(conf.starting_step, num_steps);

    // Reposition the cursor to where the resumed checkpoint left off.
    for _ in 0..state.step {
        dispenser.skip_batch();
    }

    let minibatch = conf.effective_minibatch(dispenser.size());
    let ctx = TrainingContext {
        input_dim,
        max_input_length: dispenser.max_input_length(),
        max_target_length: dispenser.max_target_length(),
        initial_learning_rate: conf.initial_learning_rate,
        learning_rate_decay: conf.learning_rate_decay,
        num_steps,
        minibatch_size: minibatch,
        l2_cost_weight: conf.l2_cost_weight,
    };

    info!(
        "building the training model ({} steps, minibatch {})",
        num_steps, minibatch
    );
    let mut session = TrainingSession::new(model.training(&ctx)?, store);
    let mut metrics = MetricsLog::new();

    if state.step > 0 {
        session.restore_step(state.step)?;
    }

    // Initial validation seeds the rollback baseline.
    if let Some(val) = &validation {
        let (error, loss) = session.evaluate(val)?;
        info!("validation error at step {}: {}", state.step, error);
        info!("validation loss at step {}: {}", state.step, loss);
        state.validation_error = error;
        state.validation_step = state.step;
        metrics.record_validation(state.step, error, loss);
        session.save_validated(state.step, error)?;
    }

    let mut outcome = TrainOutcome::Completed;

    while state.step < state.num_steps {
        let batch = dispenser.get_batch()?;
        let (loss, lr) = session.update(&batch)?;
        metrics.record_training(state.step, loss);
        info!(
            "step {}/{} loss: {:.6}, learning rate: {:.6e}",
            state.step, state.num_steps, loss, lr
        );
        state.step += 1;

        if let Some(val) = &validation {
            if state.step % conf.valid_frequency == 0 {
                let verdict =
                    validate(conf, &mut state, &mut session, dispenser, val, &mut metrics)?;
                if conf.visualise {
                    metrics.save(&store.metrics_path())?;
                }
                match verdict {
                    Validation::Accepted => {}
                    Validation::RolledBack => continue,
                    Validation::Terminated => {
                        outcome = TrainOutcome::RetriesExhausted { step: state.step };
                        break;
                    }
                }
            }
        }

        if state.step % conf.check_freq == 0 {
            session.save_step(state.step, loss)?;
        }

        if interrupt.load(Ordering::SeqCst) {
            info!("interrupt received, saving checkpoint at step {}", state.step);
            session.save_step(state.step, loss)?;
            outcome = TrainOutcome::Interrupted { step: state.step };
            break;
        }
    }

    session.save_final()?;
    metrics.save(&store.metrics_path())?;
    Ok(outcome)
}

/// Draw `valid_batches` batches and concatenate them into the fixed
/// validation set. Validation is disabled for the run when the count is
/// zero.
fn draw_validation_set<B: BatchSource>(
    conf: &NnetConfig,
    dispenser: &mut B,
) -> Result<Option<ValidationSet>> {
    if conf.valid_batches == 0 {
        return Ok(None);
    }
    let mut inputs = Vec::new();
    let mut labels = Vec::new();
    for _ in 0..conf.valid_batches {
        let batch = dispenser.get_batch()?;
        inputs.extend(batch.inputs);
        labels.extend(batch.labels);
    }
    info!("validation set: {} utterances", inputs.len());
    Ok(Some(ValidationSet { inputs, labels }))
}

/// One pass of the validation/rollback state machine.
///
/// On regression with adaptation enabled: rewind the dispenser by exactly
/// the batches consumed since the last accepted validation, restore the
/// validated checkpoint, halve the learning rate (re-persisting so the
/// halved rate is captured) and reset the step counter. Equal error counts
/// as acceptance, so plateaus keep making forward progress.
fn validate<M: TrainingModel, B: BatchSource>(
    conf: &NnetConfig,
    state: &mut TrainingState,
    session: &mut TrainingSession<M>,
    dispenser: &mut B,
    validation: &ValidationSet,
    metrics: &mut MetricsLog,
) -> Result<Validation> {
    let (current_error, current_loss) = session.evaluate(validation)?;
    info!("validation error at step {}: {}", state.step, current_error);
    info!("validation loss at step {}: {}", state.step, current_loss);
    metrics.record_validation(state.step, current_error, current_loss);

    if !conf.valid_adapt {
        // Bookkeeping only; the run never rolls back.
        if current_error <= state.validation_error {
            state.validation_error = current_error;
            state.validation_step = state.step;
        }
        session.save_validated(state.step, current_error)?;
        return Ok(Validation::Accepted);
    }

    if current_error > state.validation_error {
        for _ in 0..(state.step - state.validation_step) {
            dispenser.return_batch();
        }
        session.restore_validated()?;
        session.halve_learning_rate()?;
        session.save_validated(state.validation_step, state.validation_error)?;
        state.step = state.validation_step;

        if state.num_retries == conf.valid_retries {
            warn!("the validation error is worse, terminating training");
            return Ok(Validation::Terminated);
        }
        state.num_retries += 1;
        warn!(
            "the validation error is worse, returning to the previously validated model \
             with halved learning rate (retry {}/{})",
            state.num_retries, conf.valid_retries
        );
        Ok(Validation::RolledBack)
    } else {
        state.validation_error = current_error;
        state.validation_step = state.step;
        state.num_retries = 0;
        session.save_validated(state.step, current_error)?;
        Ok(Validation::Accepted)
    }
}
