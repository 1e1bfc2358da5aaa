use burn::nn::conv::ConvTranspose2d;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;

use crate::model::blocks::{upsample_conv, DownBlock, NormKind, UpBlock};
use crate::model::ImageGenerator;

/// Configuration for the encoder-decoder generator.
///
/// ```text
/// (N, C, H, W)
///   → Conv↓(C→f)                 → LeakyReLU
///   → Conv↓(f→2f)   → Norm       → LeakyReLU
///   → Conv↓(2f→4f)  → Norm       → LeakyReLU
///   → Conv↓(4f→8f)  → Norm       → LeakyReLU      (N, 8f, H/16, W/16)
///   → Deconv↑(8f→4f) → Norm      → ReLU
///   → Deconv↑(4f→2f) → Norm      → ReLU
///   → Deconv↑(2f→f)  → Norm      → ReLU
///   → Deconv↑(f→C)               → Sigmoid         (N, C, H, W)
/// ```
///
/// All convolutions use kernel 4, stride 2, padding 1, so `H` and `W` must
/// be multiples of 16.
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    /// Image channels (1 or 3), both in and out.
    #[config(default = 3)]
    pub channels: usize,
    /// Filters of the first convolution; doubled at each encoder stage.
    #[config(default = 64)]
    pub base_filters: usize,
    #[config(default = "NormKind::Batch")]
    pub norm: NormKind,
}

/// Image-to-image translation network.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    encoder: Vec<DownBlock<B>>,
    decoder: Vec<UpBlock<B>>,
    output: ConvTranspose2d<B>,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let f = self.base_filters;
        let encoder = vec![
            DownBlock::new([self.channels, f], None, device),
            DownBlock::new([f, 2 * f], Some(&self.norm), device),
            DownBlock::new([2 * f, 4 * f], Some(&self.norm), device),
            DownBlock::new([4 * f, 8 * f], Some(&self.norm), device),
        ];
        let decoder = vec![
            UpBlock::new([8 * f, 4 * f], &self.norm, device),
            UpBlock::new([4 * f, 2 * f], &self.norm, device),
            UpBlock::new([2 * f, f], &self.norm, device),
        ];
        Generator {
            encoder,
            decoder,
            output: upsample_conv([f, self.channels], device),
        }
    }
}

impl<B: Backend> Generator<B> {
    /// Input and output shape: `(batch, channels, height, width)`, values in `[0, 1]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for block in &self.encoder {
            x = block.forward(x);
        }
        for block in &self.decoder {
            x = block.forward(x);
        }
        sigmoid(self.output.forward(x))
    }

    /// Kernel of the first encoder convolution.
    pub fn first_weight(&self) -> Tensor<B, 4> {
        self.encoder[0].weight()
    }
}

impl<B: Backend> ImageGenerator<B> for Generator<B> {
    fn generate(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }
}
