//! Training pipeline: CLI arguments, the control loop and its rollback
//! state machine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::checkpoint::CheckpointStore;
use crate::config::NnetConfig;
use crate::mock::{SyntheticModel, SyntheticSource};

pub mod args;
pub mod training_loop;

pub use args::TrainArgs;
pub use training_loop::{train, TrainOutcome, TrainingState};

/// Run the training pipeline against the synthetic collaborators. This
/// exercises the full control loop (validation, rollback, checkpoints,
/// resume) without a real acoustic model.
pub fn run(args: TrainArgs) -> Result<()> {
    let mut conf = match &args.config {
        Some(path) => NnetConfig::load(path)?,
        None => NnetConfig::default(),
    };
    conf.validate()?;

    let savedir = args.expdir.join(&conf.name);
    let store = CheckpointStore::create(&savedir)?;
    if args.resume {
        conf.starting_step = store.latest_step();
        info!("resuming from step {}", conf.starting_step);
    }

    info!("--- LAS training ---");
    info!(
        "listener: {} units x {} layers; speller: state {}, net {} x {}",
        conf.num_units, conf.num_layers, conf.state_size, conf.net_size, conf.n_hidden
    );
    info!(
        "schedule: {} epochs, lr {} (decay {}), validate every {} steps, checkpoint every {}",
        conf.num_epochs,
        conf.initial_learning_rate,
        conf.learning_rate_decay,
        conf.valid_frequency,
        conf.check_freq
    );
    info!("savedir: {:?}", savedir);

    let batch_size = if conf.numutterances_per_minibatch > 0 {
        conf.numutterances_per_minibatch as usize
    } else {
        8
    };
    let mut dispenser = SyntheticSource::new(
        args.seed,
        args.num_batches,
        batch_size,
        args.input_dim,
        100,
        20,
    )?;
    let model = SyntheticModel {
        seed: args.seed,
        beam_width: 5,
    };

    // First Ctrl+C finishes the current step and saves; the second force
    // quits without saving.
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    let presses = Arc::new(AtomicUsize::new(0));
    let count = presses.clone();
    ctrlc::set_handler(move || {
        if count.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("interrupt: finishing the current step and saving a checkpoint");
            flag.store(true, Ordering::SeqCst);
        } else {
            error!("second interrupt: exiting without saving");
            std::process::exit(1);
        }
    })?;

    let outcome = training_loop::train(
        &conf,
        args.input_dim,
        &model,
        &mut dispenser,
        &store,
        &interrupt,
    )?;

    match outcome {
        TrainOutcome::Completed => info!("training complete"),
        TrainOutcome::RetriesExhausted { step } => {
            info!("training stopped at step {}: validation retries exhausted", step)
        }
        TrainOutcome::Interrupted { step } => {
            info!("training interrupted at step {}; resume with --resume", step)
        }
    }
    info!("final model and metrics written under {:?}", savedir);
    Ok(())
}
