//! Checkpoint store: path-addressed snapshots under the run's save
//! directory.
//!
//! Layout: `training/step<N>.safetensors` (one per multiple of `check_freq`,
//! never pruned here), `validation/validated.safetensors` (rolling best) and
//! `final.safetensors` (terminal export). Parameter files are written by the
//! model collaborator; this store provides the paths, an exclusive file lock
//! around every save and a JSON meta sidecar per checkpoint.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

/// Sidecar written next to every checkpoint, plus a rolling copy at
/// `training_state.json` for resume lookups.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckpointMeta {
    pub step: usize,
    pub loss: f32,
    pub date: String,
    pub checkpoint: String,
}

pub struct CheckpointStore {
    savedir: PathBuf,
}

impl CheckpointStore {
    /// Open the store, creating the directory layout if needed.
    pub fn create<P: AsRef<Path>>(savedir: P) -> Result<Self> {
        let savedir = savedir.as_ref().to_path_buf();
        std::fs::create_dir_all(savedir.join("training"))
            .with_context(|| format!("failed to create {:?}", savedir.join("training")))?;
        std::fs::create_dir_all(savedir.join("validation"))
            .with_context(|| format!("failed to create {:?}", savedir.join("validation")))?;
        Ok(Self { savedir })
    }

    pub fn savedir(&self) -> &Path {
        &self.savedir
    }

    pub fn step_path(&self, step: usize) -> PathBuf {
        self.savedir
            .join("training")
            .join(format!("step{step}.safetensors"))
    }

    pub fn validated_path(&self) -> PathBuf {
        self.savedir.join("validation").join("validated.safetensors")
    }

    pub fn final_path(&self) -> PathBuf {
        self.savedir.join("final.safetensors")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.savedir.join("metrics.json")
    }

    fn state_path(&self) -> PathBuf {
        self.savedir.join("training_state.json")
    }

    /// Run `save` under an exclusive lock on `<path>.lock` so a single save
    /// call is atomic with respect to concurrent readers of the same path.
    pub fn save_locked(
        &self,
        path: &Path,
        save: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<()> {
        let lock_path = path.with_extension("lock");
        let lock_file = File::create(&lock_path)
            .with_context(|| format!("failed to create lock file {:?}", lock_path))?;
        lock_file.lock_exclusive()?;
        let result = save(path);
        let _ = FileExt::unlock(&lock_file);
        result
    }

    /// Write the `<checkpoint>.json` sidecar and refresh
    /// `training_state.json`.
    pub fn write_meta(&self, checkpoint: &Path, step: usize, loss: f32) -> Result<()> {
        let meta = CheckpointMeta {
            step,
            loss,
            date: chrono::Local::now().to_rfc3339(),
            checkpoint: checkpoint
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let meta_path = checkpoint.with_extension("json");
        let file = File::create(&meta_path)
            .with_context(|| format!("failed to write checkpoint meta {:?}", meta_path))?;
        serde_json::to_writer_pretty(file, &meta)?;

        let file = File::create(self.state_path())?;
        serde_json::to_writer_pretty(file, &meta)?;
        Ok(())
    }

    /// Last step recorded in `training_state.json`, zero when none exists.
    pub fn latest_step(&self) -> usize {
        let state_path = self.state_path();
        if state_path.exists() {
            if let Ok(file) = File::open(&state_path) {
                let reader = BufReader::new(file);
                if let Ok(json) = serde_json::from_reader::<_, serde_json::Value>(reader) {
                    if let Some(s) = json.get("step").and_then(|v| v.as_u64()) {
                        return s as usize;
                    }
                }
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_directory_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::create(dir.path().join("exp/las"))?;
        assert!(store.savedir().join("training").is_dir());
        assert!(store.savedir().join("validation").is_dir());
        assert!(store.step_path(40).ends_with("training/step40.safetensors"));
        Ok(())
    }

    #[test]
    fn locked_save_writes_through() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::create(dir.path())?;
        let path = store.step_path(5);
        store.save_locked(&path, |p| {
            std::fs::write(p, b"params")?;
            Ok(())
        })?;
        assert_eq!(std::fs::read(&path)?, b"params");
        Ok(())
    }

    #[test]
    fn meta_sidecar_feeds_latest_step() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::create(dir.path())?;
        assert_eq!(store.latest_step(), 0);

        let path = store.step_path(30);
        std::fs::write(&path, b"params")?;
        store.write_meta(&path, 30, 1.25)?;
        assert_eq!(store.latest_step(), 30);

        let meta: CheckpointMeta =
            serde_json::from_reader(File::open(path.with_extension("json"))?)?;
        assert_eq!(meta.step, 30);
        assert_eq!(meta.checkpoint, "step30.safetensors");
        Ok(())
    }
}
