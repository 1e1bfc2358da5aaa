//! Image data plumbing for DiscoGAN training.
//!
//! Provides the [`BatchSource`] interface the trainer pulls from, a
//! folder-backed implementation with background producer threads, an
//! in-memory [`StaticSource`], a cooperative [`StopToken`], and PNG grid
//! rendering for sample artifacts.

pub mod folder;
pub mod grid;
pub mod prefetch;
pub mod source;
pub mod stop;
pub mod types;

pub use folder::{FileCycler, ImageFolder};
pub use grid::{render_grid, save_grid};
pub use prefetch::{DomainPrefetcher, PrefetchConfig};
pub use source::{BatchSource, DomainSpec, FolderSource, StaticSource};
pub use stop::StopToken;
pub use types::{Crop, Domain, ImageBatch, ImageShape, SourceError};
