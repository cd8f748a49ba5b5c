//! Network/training configuration.
//!
//! The configuration is a single typed record loaded from a JSON file and
//! validated once, up front. Unknown or missing keys are rejected at load
//! time rather than surfacing halfway through a run.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct NnetConfig {
    /// Experiment name, appended to the experiment directory to form the
    /// save directory of the run.
    pub name: String,

    // Listener (encoder) structure
    pub num_units: usize,
    pub num_layers: usize,

    // Attend-and-spell (decoder) structure
    pub state_size: usize,
    pub net_size: usize,
    pub n_hidden: usize,
    pub net_out_prob: f64,
    pub post_context_rnn: bool,

    // Optimisation
    /// Utterances per minibatch; `-1` means "use the full training split".
    pub numutterances_per_minibatch: i64,
    pub num_epochs: usize,
    pub starting_step: usize,
    pub initial_learning_rate: f64,
    pub learning_rate_decay: f64,
    pub l2_cost_weight: f64,

    // Validation and adaptive rollback
    /// Number of batches drawn up front to form the fixed validation set.
    /// Zero disables validation entirely.
    pub valid_batches: usize,
    pub valid_frequency: usize,
    pub valid_adapt: bool,
    pub valid_retries: usize,

    // Checkpointing and instrumentation
    pub check_freq: usize,
    pub visualise: bool,
}

impl Default for NnetConfig {
    fn default() -> Self {
        Self {
            name: "las".to_string(),
            num_units: 64,
            num_layers: 2,
            state_size: 64,
            net_size: 64,
            n_hidden: 1,
            net_out_prob: 0.8,
            post_context_rnn: false,
            numutterances_per_minibatch: 8,
            num_epochs: 2,
            starting_step: 0,
            initial_learning_rate: 1e-3,
            learning_rate_decay: 0.984,
            l2_cost_weight: 0.0,
            valid_batches: 2,
            valid_frequency: 10,
            valid_adapt: true,
            valid_retries: 3,
            check_freq: 10,
            visualise: false,
        }
    }
}

impl NnetConfig {
    /// Load and validate a configuration file. Any malformed, unknown or
    /// missing key is fatal here.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let conf: NnetConfig = serde_json::from_str(&text)
            .with_context(|| format!("malformed config file {:?}", path))?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("config: name must not be empty");
        }
        if self.num_units == 0 || self.num_layers == 0 {
            bail!("config: num_units and num_layers must be positive");
        }
        if self.state_size == 0 || self.net_size == 0 || self.n_hidden == 0 {
            bail!("config: state_size, net_size and n_hidden must be positive");
        }
        if !(0.0..=1.0).contains(&self.net_out_prob) {
            bail!(
                "config: net_out_prob must lie in [0, 1], got {}",
                self.net_out_prob
            );
        }
        if self.numutterances_per_minibatch < 1 && self.numutterances_per_minibatch != -1 {
            bail!(
                "config: numutterances_per_minibatch must be positive or the -1 sentinel, got {}",
                self.numutterances_per_minibatch
            );
        }
        if self.num_epochs == 0 {
            bail!("config: num_epochs must be at least 1");
        }
        if self.initial_learning_rate <= 0.0 || self.learning_rate_decay <= 0.0 {
            bail!("config: learning rate and decay must be positive");
        }
        if self.l2_cost_weight < 0.0 {
            bail!("config: l2_cost_weight must not be negative");
        }
        if self.valid_frequency == 0 {
            bail!("config: valid_frequency must be at least 1");
        }
        if self.check_freq == 0 {
            bail!("config: check_freq must be at least 1");
        }
        Ok(())
    }

    /// Resolve the `-1` minibatch sentinel against the size of the training
    /// split.
    pub fn effective_minibatch(&self, split_size: usize) -> usize {
        if self.numutterances_per_minibatch == -1 {
            split_size
        } else {
            self.numutterances_per_minibatch as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        NnetConfig::default().validate().unwrap();
    }

    #[test]
    fn minibatch_sentinel_resolves_to_split_size() {
        let mut conf = NnetConfig::default();
        conf.numutterances_per_minibatch = -1;
        assert_eq!(conf.effective_minibatch(320), 320);
        conf.numutterances_per_minibatch = 16;
        assert_eq!(conf.effective_minibatch(320), 16);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut conf = NnetConfig::default();
        conf.valid_frequency = 0;
        assert!(conf.validate().is_err());

        let mut conf = NnetConfig::default();
        conf.numutterances_per_minibatch = 0;
        assert!(conf.validate().is_err());

        let mut conf = NnetConfig::default();
        conf.net_out_prob = 1.5;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn load_rejects_unknown_and_missing_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;

        // Unknown key
        let path = dir.path().join("unknown.json");
        let mut json = serde_json::to_value(NnetConfig::default())?;
        json.as_object_mut()
            .unwrap()
            .insert("no_such_option".to_string(), 1.into());
        let mut file = std::fs::File::create(&path)?;
        write!(file, "{}", serde_json::to_string(&json)?)?;
        assert!(NnetConfig::load(&path).is_err());

        // Missing key
        let path = dir.path().join("missing.json");
        let mut json = serde_json::to_value(NnetConfig::default())?;
        json.as_object_mut().unwrap().remove("check_freq");
        let mut file = std::fs::File::create(&path)?;
        write!(file, "{}", serde_json::to_string(&json)?)?;
        assert!(NnetConfig::load(&path).is_err());

        Ok(())
    }

    #[test]
    fn load_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nnet.json");
        let conf = NnetConfig::default();
        std::fs::write(&path, serde_json::to_string_pretty(&conf)?)?;
        let loaded = NnetConfig::load(&path)?;
        assert_eq!(loaded.name, conf.name);
        assert_eq!(loaded.check_freq, conf.check_freq);
        Ok(())
    }
}
