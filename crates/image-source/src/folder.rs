//! Image folders: listing, fail-fast validation, decoding and shuffled cycling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::FilterType;
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::types::{Crop, ImageShape, SourceError};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A directory of images belonging to one domain.
///
/// Opening the folder lists its images and decodes the first one, so an
/// empty or unreadable directory is reported before training starts.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    shape: ImageShape,
    crop: Crop,
    files: Vec<PathBuf>,
}

impl ImageFolder {
    pub fn open(root: impl AsRef<Path>, shape: ImageShape, crop: Crop) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(SourceError::MissingDirectory(root));
        }
        if !root.is_dir() {
            return Err(SourceError::NotADirectory(root));
        }

        let entries = std::fs::read_dir(&root).map_err(|source| SourceError::Io {
            path: root.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::Io {
                path: root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(SourceError::EmptyDirectory(root));
        }
        // read_dir order is platform dependent; seeded shuffles need a stable base.
        files.sort();

        let folder = Self {
            root,
            shape,
            crop,
            files,
        };
        folder.decode(&folder.files[0])?;

        tracing::info!(
            root = %folder.root.display(),
            images = folder.files.len(),
            shape = %shape,
            crop = %crop,
            "Opened image folder"
        );
        Ok(folder)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Decode one file into `H * W * C` values in `[0, 1]`.
    pub fn decode(&self, path: &Path) -> Result<Vec<f32>, SourceError> {
        let image = image::open(path).map_err(|source| SourceError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(to_pixels(&image, self.shape, self.crop))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Crop, resize and normalize a decoded image.
fn to_pixels(image: &DynamicImage, shape: ImageShape, crop: Crop) -> Vec<f32> {
    let (w, h) = (image.width(), image.height());
    let half = (w / 2).max(1);
    let cropped = match crop {
        Crop::Full => image.clone(),
        Crop::Left => image.crop_imm(0, 0, half, h),
        Crop::Right => image.crop_imm(w - half, 0, half, h),
    };
    let resized = cropped.resize_exact(shape.width as u32, shape.height as u32, FilterType::Triangle);

    let raw = if shape.channels == 1 {
        resized.to_luma8().into_raw()
    } else {
        resized.to_rgb8().into_raw()
    };
    raw.into_iter().map(|v| v as f32 / 255.0).collect()
}

struct CyclerState {
    order: Vec<usize>,
    cursor: usize,
    epoch: u64,
    rng: StdRng,
    /// Decode failures reported per epoch, for the current and previous epoch.
    failures: HashMap<u64, usize>,
    exhausted: bool,
}

/// Infinite, epoch-reshuffled iteration over a folder's files.
///
/// Shared by all producer threads of one domain, so each file is handed out
/// once per epoch regardless of how many workers decode. Workers report
/// decode failures back with the epoch the path was handed out in; once every
/// file of one epoch has failed, the cycler is exhausted for the whole pool.
pub struct FileCycler {
    files: Vec<PathBuf>,
    state: Mutex<CyclerState>,
}

impl FileCycler {
    pub fn new(files: Vec<PathBuf>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..files.len()).collect();
        order.shuffle(&mut rng);
        Self {
            files,
            state: Mutex::new(CyclerState {
                order,
                cursor: 0,
                epoch: 0,
                rng,
                failures: HashMap::new(),
                exhausted: false,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The next file, reshuffling when an epoch is exhausted.
    pub fn next_path(&self) -> Option<PathBuf> {
        self.next_with_epoch().map(|(_, path)| path)
    }

    /// The next file and the epoch it belongs to.
    ///
    /// Returns `None` for an empty list or once [`record_failure`](Self::record_failure)
    /// has seen a full epoch fail.
    pub fn next_with_epoch(&self) -> Option<(u64, PathBuf)> {
        if self.files.is_empty() {
            return None;
        }
        let mut state = self.lock();
        if state.exhausted {
            return None;
        }
        if state.cursor >= state.order.len() {
            let CyclerState { order, rng, .. } = &mut *state;
            order.shuffle(rng);
            state.cursor = 0;
            state.epoch += 1;
            let current = state.epoch;
            state.failures.retain(|&epoch, _| epoch + 1 >= current);
            tracing::debug!(epoch = state.epoch, files = self.files.len(), "Reshuffled file order");
        }
        let index = state.order[state.cursor];
        state.cursor += 1;
        Some((state.epoch, self.files[index].clone()))
    }

    /// Record that a file handed out in `epoch` could not be decoded.
    ///
    /// Returns `true` when every file of that epoch failed, which marks the
    /// cycler exhausted.
    pub fn record_failure(&self, epoch: u64) -> bool {
        let mut state = self.lock();
        let failed = state.failures.entry(epoch).or_insert(0);
        *failed += 1;
        if *failed >= self.files.len() {
            state.exhausted = true;
        }
        state.exhausted
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CyclerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Completed passes over the file list.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }
}
