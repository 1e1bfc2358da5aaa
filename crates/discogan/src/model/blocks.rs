//! Convolution building blocks shared by the generator and discriminator.

use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, InstanceNorm, InstanceNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, relu};

/// Slope of the leaky ReLU used throughout the encoders.
pub const LEAKY_SLOPE: f64 = 0.2;

/// Feature normalization applied after hidden convolutions.
#[derive(Config, Debug, PartialEq)]
pub enum NormKind {
    /// Batch statistics during training, running statistics in eval.
    Batch,
    /// Per-sample, per-channel statistics.
    Instance,
}

/// Either a batch or an instance norm over `(N, C, H, W)` feature maps.
#[derive(Module, Debug)]
pub struct Norm2d<B: Backend> {
    batch: Option<BatchNorm<B, 2>>,
    instance: Option<InstanceNorm<B>>,
}

impl<B: Backend> Norm2d<B> {
    pub fn new(kind: &NormKind, channels: usize, device: &B::Device) -> Self {
        match kind {
            NormKind::Batch => Self {
                batch: Some(BatchNormConfig::new(channels).init(device)),
                instance: None,
            },
            NormKind::Instance => Self {
                batch: None,
                instance: Some(InstanceNormConfig::new(channels).init(device)),
            },
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match (&self.batch, &self.instance) {
            (Some(norm), _) => norm.forward(x),
            (None, Some(norm)) => norm.forward(x),
            (None, None) => x,
        }
    }
}

/// Stride-2 convolution, optional norm, leaky ReLU. Halves resolution.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<Norm2d<B>>,
}

impl<B: Backend> DownBlock<B> {
    pub fn new(
        channels: [usize; 2],
        norm: Option<&NormKind>,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: Conv2dConfig::new(channels, [4, 4])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm: norm.map(|kind| Norm2d::new(kind, channels[1], device)),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        leaky_relu(x, LEAKY_SLOPE)
    }

    /// Kernel of the block's convolution, `[out, in, 4, 4]`.
    pub fn weight(&self) -> Tensor<B, 4> {
        self.conv.weight.val()
    }
}

/// Stride-2 transposed convolution, norm, ReLU. Doubles resolution.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: Norm2d<B>,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], norm: &NormKind, device: &B::Device) -> Self {
        Self {
            deconv: upsample_conv(channels, device),
            norm: Norm2d::new(norm, channels[1], device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.deconv.forward(x)))
    }
}

/// Kernel 4, stride 2, padding 1 transposed convolution: `H -> 2H`.
pub fn upsample_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_down_block_halves_resolution() {
        let device = Default::default();
        let block = DownBlock::<TestBackend>::new([3, 8], Some(&NormKind::Batch), &device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        assert_eq!(block.forward(x).dims(), [2, 8, 8, 8]);
    }

    #[test]
    fn test_up_block_doubles_resolution() {
        let device = Default::default();
        let block = UpBlock::<TestBackend>::new([8, 4], &NormKind::Instance, &device);
        let x = Tensor::<TestBackend, 4>::random([2, 8, 4, 4], Distribution::Default, &device);
        let y = block.forward(x);
        assert_eq!(y.dims(), [2, 4, 8, 8]);
        let min: f32 = y.min().into_scalar().elem();
        assert!(min >= 0.0, "ReLU output must be non-negative, got {min}");
    }

    #[test]
    fn test_norm_none_is_identity() {
        let device = Default::default();
        let norm = Norm2d::<TestBackend> {
            batch: None,
            instance: None,
        };
        let x = Tensor::<TestBackend, 4>::random([1, 2, 3, 3], Distribution::Default, &device);
        let diff: f32 = (norm.forward(x.clone()) - x).abs().max().into_scalar().elem();
        assert_eq!(diff, 0.0);
    }
}
