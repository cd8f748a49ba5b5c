//! CLI arguments for the training subcommand.

use std::path::PathBuf;

use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Network/training configuration file (JSON). Defaults are used when
    /// omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Experiment directory; the run saves under `<expdir>/<name>`.
    #[arg(long, default_value = "exp")]
    pub expdir: PathBuf,

    /// Feature dimension of the synthetic utterances.
    #[arg(long, default_value_t = 40)]
    pub input_dim: usize,

    /// Size of the synthetic batch pool (validation draws included).
    #[arg(long, default_value_t = 50)]
    pub num_batches: usize,

    /// Seed for the synthetic data and loss curves.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Resume from the last step recorded in `training_state.json`,
    /// overriding the configured starting step.
    #[arg(long, action)]
    pub resume: bool,
}
