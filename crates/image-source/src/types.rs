//! Data types shared by the loaders, the prefetch pool and the trainer.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors that can occur while opening, decoding or batching images.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The configured data directory does not exist.
    #[error("data directory {0} does not exist")]
    MissingDirectory(PathBuf),

    /// The configured data path exists but is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    /// The data directory holds no decodable image files.
    #[error("data directory {0} contains no .png/.jpg/.jpeg images")]
    EmptyDirectory(PathBuf),

    /// Only grayscale (1) and RGB (3) images are supported.
    #[error("unsupported channel count {0} (expected 1 or 3)")]
    UnsupportedChannels(usize),

    /// Pixel buffer length does not match the declared batch shape.
    #[error("pixel buffer has {got} values, expected {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    /// Filesystem error while listing or reading a path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The image decoder rejected a file.
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Writing a rendered image failed.
    #[error("failed to write {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Batches placed side by side in a grid must share a shape and length.
    #[error("grid column {column} is {got}, expected {expected}")]
    GridMismatch {
        column: usize,
        expected: String,
        got: String,
    },

    /// Batch production was stopped by a [`StopToken`](crate::StopToken).
    #[error("batch production was cancelled")]
    Cancelled,

    /// Every producer for a domain exited without being cancelled.
    #[error("all batch producers for domain {0} exited")]
    ProducersExited(Domain),

    /// Tensor data could not be read back as `f32` pixels.
    #[error("tensor data is not readable as f32 pixels: {0}")]
    TensorData(String),
}

/// One of the two image domains being translated between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    X,
    Y,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "X"),
            Self::Y => write!(f, "Y"),
        }
    }
}

/// Which part of a source image to keep before resizing.
///
/// pix2pix-style datasets store each example as two images side by side;
/// `Left` and `Right` select one half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crop {
    #[default]
    Full,
    Left,
    Right,
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Fixed per-image shape, stored height-width-channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    /// Create a shape, rejecting channel counts other than 1 or 3.
    pub fn new(height: usize, width: usize, channels: usize) -> Result<Self, SourceError> {
        if channels != 1 && channels != 3 {
            return Err(SourceError::UnsupportedChannels(channels));
        }
        Ok(Self {
            height,
            width,
            channels,
        })
    }

    /// Number of `f32` values in one image.
    pub fn pixels_per_image(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// A batch of same-shaped images with values in `[0, 1]`.
///
/// Pixels are stored contiguously in `(N, H, W, C)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    shape: ImageShape,
    len: usize,
    pixels: Vec<f32>,
}

impl ImageBatch {
    /// Wrap a flat `(N, H, W, C)` pixel buffer.
    ///
    /// Fails when the buffer length is not a multiple of the image size.
    pub fn new(shape: ImageShape, pixels: Vec<f32>) -> Result<Self, SourceError> {
        let per_image = shape.pixels_per_image();
        if per_image == 0 || pixels.len() % per_image != 0 {
            return Err(SourceError::ShapeMismatch {
                expected: per_image,
                got: pixels.len(),
            });
        }
        Ok(Self {
            shape,
            len: pixels.len() / per_image,
            pixels,
        })
    }

    /// Build a batch from individually decoded images.
    pub fn from_images(shape: ImageShape, images: Vec<Vec<f32>>) -> Result<Self, SourceError> {
        let per_image = shape.pixels_per_image();
        let mut pixels = Vec::with_capacity(images.len() * per_image);
        for image in images {
            if image.len() != per_image {
                return Err(SourceError::ShapeMismatch {
                    expected: per_image,
                    got: image.len(),
                });
            }
            pixels.extend(image);
        }
        Self::new(shape, pixels)
    }

    /// A batch of `len` images filled with a constant value.
    pub fn filled(shape: ImageShape, len: usize, value: f32) -> Self {
        Self {
            shape,
            len,
            pixels: vec![value; len * shape.pixels_per_image()],
        }
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Number of images in the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `[N, H, W, C]` dimensions of the batch.
    pub fn dims(&self) -> [usize; 4] {
        [self.len, self.shape.height, self.shape.width, self.shape.channels]
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Pixels of the `index`-th image, or `None` past the end.
    pub fn image(&self, index: usize) -> Option<&[f32]> {
        if index >= self.len {
            return None;
        }
        let per_image = self.shape.pixels_per_image();
        Some(&self.pixels[index * per_image..(index + 1) * per_image])
    }

    /// The first `count` images (all of them if `count >= len`).
    pub fn take(&self, count: usize) -> Self {
        let count = count.min(self.len);
        let per_image = self.shape.pixels_per_image();
        Self {
            shape: self.shape,
            len: count,
            pixels: self.pixels[..count * per_image].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> ImageShape {
        ImageShape::new(2, 2, 1).unwrap()
    }

    #[test]
    fn test_shape_rejects_alpha_channel() {
        let err = ImageShape::new(8, 8, 4).unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedChannels(4)));
    }

    #[test]
    fn test_batch_len_from_buffer() {
        let batch = ImageBatch::new(shape(), vec![0.5; 12]).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.dims(), [3, 2, 2, 1]);
    }

    #[test]
    fn test_batch_rejects_ragged_buffer() {
        let err = ImageBatch::new(shape(), vec![0.0; 7]).unwrap_err();
        assert!(matches!(
            err,
            SourceError::ShapeMismatch { expected: 4, got: 7 }
        ));
    }

    #[test]
    fn test_from_images_checks_each_image() {
        let err = ImageBatch::from_images(shape(), vec![vec![0.0; 4], vec![0.0; 3]]).unwrap_err();
        assert!(matches!(err, SourceError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_image_and_take() {
        let pixels: Vec<f32> = (0..12).map(|v| v as f32 / 12.0).collect();
        let batch = ImageBatch::new(shape(), pixels.clone()).unwrap();

        assert_eq!(batch.image(1).unwrap(), &pixels[4..8]);
        assert!(batch.image(3).is_none());

        let head = batch.take(2);
        assert_eq!(head.len(), 2);
        assert_eq!(head.pixels(), &pixels[..8]);

        // Taking more than available keeps the whole batch.
        assert_eq!(batch.take(10).len(), 3);
    }
}
