//! Checkpoint store: one directory per saved iteration.
//!
//! ```text
//! {root}/
//!   iter_00009999/
//!     g.mpk  f.mpk  dy.mpk  dx.mpk                       network records
//!     optim_g.mpk  optim_f.mpk  optim_dy.mpk  optim_dx.mpk Adam moments
//!     meta.json                                          CheckpointMeta
//! ```
//!
//! A checkpoint is written into `iter_XXXXXXXX.partial/` and renamed into
//! place only after every file is on disk, so an interrupted save never
//! leaves a directory that [`CheckpointStore::list`] would report.
//! Leftover `.partial` directories are removed when the store is opened.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder, RecorderError};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::model::CycleNetworks;
use crate::training::metrics::StepLosses;
use crate::training::state::TrainingState;

const PREFIX: &str = "iter_";
const PARTIAL_SUFFIX: &str = ".partial";
const META_FILE: &str = "meta.json";

/// Errors from saving, listing or loading checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// A specific iteration was requested but never saved.
    #[error("no checkpoint for iteration {iteration} in {dir}")]
    NotFound { iteration: usize, dir: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// burn failed to write or read a record file.
    #[error("record error at {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },

    #[error("invalid checkpoint metadata at {path}: {source}")]
    Meta {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Sidecar metadata written next to the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub iteration: usize,
    /// Losses of the last step before the save, if any step ran.
    pub last_losses: Option<StepLosses>,
}

/// A complete checkpoint on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHandle {
    pub iteration: usize,
    pub dir: PathBuf,
}

/// Directory-backed store of checkpoints keyed by iteration.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn record_err(path: &Path) -> impl FnOnce(RecorderError) -> CheckpointError + '_ {
    move |source| CheckpointError::Record {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory name for an iteration: `iter_00000042`.
pub fn checkpoint_name(iteration: usize) -> String {
    format!("{PREFIX}{iteration:08}")
}

/// Inverse of [`checkpoint_name`]; `None` for anything else.
pub fn parse_checkpoint_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix(PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl CheckpointStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(io_err(&root))?;

        for entry in std::fs::read_dir(&root).map_err(io_err(&root))? {
            let path = entry.map_err(io_err(&root))?.path();
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(PARTIAL_SUFFIX));
            if is_partial && path.is_dir() {
                tracing::warn!(path = %path.display(), "Removing incomplete checkpoint");
                std::fs::remove_dir_all(&path).map_err(io_err(&path))?;
            }
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All complete checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointHandle>, CheckpointError> {
        let mut handles = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let dir = entry.map_err(io_err(&self.root))?.path();
            let Some(iteration) = dir
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_checkpoint_name)
            else {
                continue;
            };
            if dir.join(META_FILE).is_file() {
                handles.push(CheckpointHandle { iteration, dir });
            }
        }
        handles.sort_by_key(|h| h.iteration);
        Ok(handles)
    }

    /// The highest-iteration checkpoint, if any.
    pub fn latest(&self) -> Result<Option<CheckpointHandle>, CheckpointError> {
        Ok(self.list()?.pop())
    }

    /// The checkpoint for exactly `iteration`.
    pub fn find(&self, iteration: usize) -> Result<CheckpointHandle, CheckpointError> {
        self.list()?
            .into_iter()
            .find(|h| h.iteration == iteration)
            .ok_or_else(|| CheckpointError::NotFound {
                iteration,
                dir: self.root.clone(),
            })
    }

    /// Persist `state` under its current iteration, replacing any earlier
    /// checkpoint with the same iteration.
    pub fn save<B, G, D, OG, OD>(
        &self,
        state: &TrainingState<G, D, OG, OD>,
        last_losses: Option<StepLosses>,
    ) -> Result<CheckpointHandle, CheckpointError>
    where
        B: AutodiffBackend,
        G: AutodiffModule<B>,
        D: AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let iteration = state.iteration;
        let name = checkpoint_name(iteration);
        let partial = self.root.join(format!("{name}{PARTIAL_SUFFIX}"));
        let target = self.root.join(&name);

        if partial.exists() {
            std::fs::remove_dir_all(&partial).map_err(io_err(&partial))?;
        }
        std::fs::create_dir_all(&partial).map_err(io_err(&partial))?;

        let rec = recorder();
        let nets = &state.networks;
        for (file, module) in [("g", &nets.g), ("f", &nets.f)] {
            let path = partial.join(file);
            module.clone().save_file(&path, &rec).map_err(record_err(&path))?;
        }
        for (file, module) in [("dy", &nets.dy), ("dx", &nets.dx)] {
            let path = partial.join(file);
            module.clone().save_file(&path, &rec).map_err(record_err(&path))?;
        }

        let optims = &state.optimizers;
        for (file, optim) in [("optim_g", &optims.g), ("optim_f", &optims.f)] {
            let path = partial.join(file);
            Recorder::<B>::record(&rec, optim.to_record(), path.clone()).map_err(record_err(&path))?;
        }
        for (file, optim) in [("optim_dy", &optims.dy), ("optim_dx", &optims.dx)] {
            let path = partial.join(file);
            Recorder::<B>::record(&rec, optim.to_record(), path.clone()).map_err(record_err(&path))?;
        }

        let meta_path = partial.join(META_FILE);
        let meta = CheckpointMeta {
            iteration,
            last_losses,
        };
        let file = std::fs::File::create(&meta_path).map_err(io_err(&meta_path))?;
        serde_json::to_writer_pretty(file, &meta).map_err(|source| CheckpointError::Meta {
            path: meta_path.clone(),
            source,
        })?;

        if target.exists() {
            std::fs::remove_dir_all(&target).map_err(io_err(&target))?;
        }
        std::fs::rename(&partial, &target).map_err(io_err(&target))?;

        tracing::info!(iteration, dir = %target.display(), "Checkpoint saved (networks + optimizers + meta)");
        Ok(CheckpointHandle {
            iteration,
            dir: target,
        })
    }

    /// Read a checkpoint's metadata.
    pub fn meta(&self, handle: &CheckpointHandle) -> Result<CheckpointMeta, CheckpointError> {
        let path = handle.dir.join(META_FILE);
        let file = std::fs::File::open(&path).map_err(io_err(&path))?;
        serde_json::from_reader(file).map_err(|source| CheckpointError::Meta { path, source })
    }

    /// Restore a full training state on top of `template`.
    ///
    /// `template` supplies the module structure and optimizer types; every
    /// parameter and moment is replaced by the saved values.
    pub fn load<B, G, D, OG, OD>(
        &self,
        handle: &CheckpointHandle,
        template: TrainingState<G, D, OG, OD>,
        device: &B::Device,
    ) -> Result<TrainingState<G, D, OG, OD>, CheckpointError>
    where
        B: AutodiffBackend,
        G: AutodiffModule<B>,
        D: AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let meta = self.meta(handle)?;
        let networks = self.load_networks::<B, G, D>(handle, template.networks, device)?;

        let rec = recorder();
        let mut optimizers = template.optimizers;

        let path = handle.dir.join("optim_g");
        optimizers.g = optimizers
            .g
            .load_record(Recorder::<B>::load(&rec, path.clone(), device).map_err(record_err(&path))?);
        let path = handle.dir.join("optim_f");
        optimizers.f = optimizers
            .f
            .load_record(Recorder::<B>::load(&rec, path.clone(), device).map_err(record_err(&path))?);
        let path = handle.dir.join("optim_dy");
        optimizers.dy = optimizers
            .dy
            .load_record(Recorder::<B>::load(&rec, path.clone(), device).map_err(record_err(&path))?);
        let path = handle.dir.join("optim_dx");
        optimizers.dx = optimizers
            .dx
            .load_record(Recorder::<B>::load(&rec, path.clone(), device).map_err(record_err(&path))?);

        tracing::info!(iteration = meta.iteration, dir = %handle.dir.display(), "Restored training state");
        Ok(TrainingState {
            iteration: meta.iteration,
            networks,
            optimizers,
        })
    }

    /// Restore only the four networks, on any backend.
    pub fn load_networks<B, G, D>(
        &self,
        handle: &CheckpointHandle,
        template: CycleNetworks<G, D>,
        device: &B::Device,
    ) -> Result<CycleNetworks<G, D>, CheckpointError>
    where
        B: Backend,
        G: Module<B>,
        D: Module<B>,
    {
        let rec = recorder();
        let load_g = |module: G, file: &str| {
            let path = handle.dir.join(file);
            module.load_file(&path, &rec, device).map_err(record_err(&path))
        };
        let g = load_g(template.g, "g")?;
        let f = load_g(template.f, "f")?;
        let load_d = |module: D, file: &str| {
            let path = handle.dir.join(file);
            module.load_file(&path, &rec, device).map_err(record_err(&path))
        };
        let dy = load_d(template.dy, "dy")?;
        let dx = load_d(template.dx, "dx")?;
        Ok(CycleNetworks { g, f, dy, dx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        assert_eq!(checkpoint_name(7), "iter_00000007");
        assert_eq!(parse_checkpoint_name("iter_00000007"), Some(7));
        assert_eq!(parse_checkpoint_name(&checkpoint_name(123_456_789)), Some(123_456_789));
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert_eq!(parse_checkpoint_name("iter_00000007.partial"), None);
        assert_eq!(parse_checkpoint_name("iter_"), None);
        assert_eq!(parse_checkpoint_name("step_7"), None);
        assert_eq!(parse_checkpoint_name("iter_-1"), None);
    }

    #[test]
    fn test_open_removes_partials_and_list_skips_incomplete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("model");
        std::fs::create_dir_all(root.join("iter_00000005.partial")).unwrap();
        // Complete: has meta.json.
        std::fs::create_dir_all(root.join("iter_00000003")).unwrap();
        std::fs::write(root.join("iter_00000003/meta.json"), "{}").unwrap();
        // Incomplete: no meta.json.
        std::fs::create_dir_all(root.join("iter_00000009")).unwrap();
        std::fs::create_dir_all(root.join("unrelated")).unwrap();

        let store = CheckpointStore::open(&root).unwrap();
        assert!(!root.join("iter_00000005.partial").exists(), "stale partial must be removed");

        let handles = store.list().unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].iteration, 3);
        assert_eq!(store.latest().unwrap().unwrap().iteration, 3);
    }

    #[test]
    fn test_find_missing_iteration() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = CheckpointStore::open(tmp.path()).unwrap();
        assert!(store.latest().unwrap().is_none());
        let err = store.find(42).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { iteration: 42, .. }));
        assert!(err.to_string().contains("iteration 42"));
    }
}
