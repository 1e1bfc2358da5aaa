use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use crate::model::blocks::{DownBlock, NormKind};
use crate::model::PatchDiscriminator;

/// Configuration for the PatchGAN discriminator.
///
/// ```text
/// (N, C, H, W)
///   → Conv↓(C→f)                → LeakyReLU
///   → Conv↓(f→2f)   → Norm      → LeakyReLU
///   → Conv↓(2f→4f)  → Norm      → LeakyReLU
///   → Conv↓(4f→8f)  → Norm      → LeakyReLU
///   → Conv(8f→1, k4, s1, same)  → Sigmoid       (N, 1, H/16, W/16)
/// ```
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = "NormKind::Batch")]
    pub norm: NormKind,
}

/// Scores each receptive-field patch of an image with a probability of being real.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    encoder: Vec<DownBlock<B>>,
    head: Conv2d<B>,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let f = self.base_filters;
        Discriminator {
            encoder: vec![
                DownBlock::new([self.channels, f], None, device),
                DownBlock::new([f, 2 * f], Some(&self.norm), device),
                DownBlock::new([2 * f, 4 * f], Some(&self.norm), device),
                DownBlock::new([4 * f, 8 * f], Some(&self.norm), device),
            ],
            // Padded by hand in `forward`: burn's `Same` rejects even kernels.
            head: Conv2dConfig::new([8 * f, 1], [4, 4])
                .with_padding(PaddingConfig2d::Valid)
                .init(device),
        }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Input `(batch, channels, height, width)`, output `(batch, 1, height/16, width/16)`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for block in &self.encoder {
            x = block.forward(x);
        }
        // Same padding for an even kernel at stride 1: one before, two after.
        let x = x.pad((1, 2, 1, 2), 0.0);
        sigmoid(self.head.forward(x))
    }
}

impl<B: Backend> PatchDiscriminator<B> for Discriminator<B> {
    fn score(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }
}
