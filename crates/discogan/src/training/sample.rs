//! Visualization sinks for translated image grids.

use std::path::{Path, PathBuf};

use anyhow::Context;
use image_source::{save_grid, ImageBatch};

/// Receives an ordered set of same-shaped batches and renders them.
///
/// Each batch becomes one column; row `i` shows image `i` of every batch.
/// Errors are logged by the caller and never stop training.
pub trait SampleSink {
    fn write(&mut self, tag: &str, columns: &[ImageBatch]) -> anyhow::Result<()>;
}

/// Writes `{dir}/{tag}.png`.
#[derive(Debug, Clone)]
pub struct PngGridSink {
    dir: PathBuf,
}

impl PngGridSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SampleSink for PngGridSink {
    fn write(&mut self, tag: &str, columns: &[ImageBatch]) -> anyhow::Result<()> {
        let path = self.dir.join(format!("{tag}.png"));
        save_grid(&path, columns).with_context(|| format!("Failed to write sample grid {}", path.display()))?;
        tracing::debug!(path = %path.display(), columns = columns.len(), "Sample grid written");
        Ok(())
    }
}
