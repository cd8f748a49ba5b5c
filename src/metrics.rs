//! Metrics log: the run's training-loss and validation histories.
//!
//! Append-only for the life of the training loop, persisted as versioned
//! JSON under the save directory at teardown (and after every validation
//! when `visualise` is on).

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const METRICS_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub step: usize,
    pub value: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsLog {
    pub version: u32,
    pub training_loss: Vec<MetricRecord>,
    pub validation_loss: Vec<MetricRecord>,
    pub validation_error: Vec<MetricRecord>,
}

impl MetricsLog {
    pub fn new() -> Self {
        Self {
            version: METRICS_SCHEMA_VERSION,
            ..Default::default()
        }
    }

    pub fn record_training(&mut self, step: usize, loss: f32) {
        self.training_loss.push(MetricRecord { step, value: loss });
    }

    pub fn record_validation(&mut self, step: usize, error: f32, loss: f32) {
        self.validation_error.push(MetricRecord { step, value: error });
        self.validation_loss.push(MetricRecord { step, value: loss });
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to write metrics log {:?}", path))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open metrics log {:?}", path))?;
        let log: MetricsLog = serde_json::from_reader(file)
            .with_context(|| format!("malformed metrics log {:?}", path))?;
        if log.version != METRICS_SCHEMA_VERSION {
            bail!(
                "metrics log {:?} has schema version {}, expected {}",
                path,
                log.version,
                METRICS_SCHEMA_VERSION
            );
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("metrics.json");

        let mut log = MetricsLog::new();
        log.record_training(0, 4.2);
        log.record_training(1, 3.9);
        log.record_validation(5, 0.7, 3.6);
        log.save(&path)?;

        let loaded = MetricsLog::load(&path)?;
        assert_eq!(loaded.training_loss, log.training_loss);
        assert_eq!(loaded.validation_error, log.validation_error);
        assert_eq!(loaded.validation_loss.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_unknown_schema_version() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("metrics.json");

        let mut log = MetricsLog::new();
        log.version = METRICS_SCHEMA_VERSION + 1;
        log.save(&path)?;
        assert!(MetricsLog::load(&path).is_err());
        Ok(())
    }
}
