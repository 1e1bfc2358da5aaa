//! Tensor bridge between `image-source` batches and burn tensors.
//!
//! Batches are stored `(N, H, W, C)`; burn convolutions want `(N, C, H, W)`.

use burn::prelude::*;
use burn::tensor::TensorData;
use image_source::{ImageBatch, ImageShape, SourceError};

/// Convert an image batch to a `(N, C, H, W)` tensor on `device`.
pub fn batch_to_tensor<B: Backend>(batch: &ImageBatch, device: &B::Device) -> Tensor<B, 4> {
    let dims = batch.dims();
    let nhwc = Tensor::<B, 4>::from_data(TensorData::new(batch.pixels().to_vec(), dims), device);
    nhwc.permute([0, 3, 1, 2])
}

/// Convert a `(N, C, H, W)` tensor back to an image batch.
pub fn tensor_to_batch<B: Backend>(tensor: Tensor<B, 4>) -> Result<ImageBatch, SourceError> {
    let [_, channels, height, width] = tensor.dims();
    let shape = ImageShape::new(height, width, channels)?;
    let pixels = read_pixels(tensor.permute([0, 2, 3, 1]).into_data().convert::<f32>())?;
    ImageBatch::new(shape, pixels)
}

fn read_pixels(data: TensorData) -> Result<Vec<f32>, SourceError> {
    data.to_vec::<f32>()
        .map_err(|e| SourceError::TensorData(format!("{e:?}")))
}

/// Extract a scalar loss as `f64`.
pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}
