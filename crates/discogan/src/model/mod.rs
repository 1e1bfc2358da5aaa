//! DiscoGAN networks: the two generators, the two patch discriminators,
//! their shared building blocks, and the tensor bridge to image batches.

pub mod blocks;
pub mod bridge;
pub mod discriminator;
pub mod generator;

use burn::prelude::*;

pub use blocks::NormKind;
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};

/// A network mapping an image batch to an image batch of the same shape.
///
/// Tensors are `(batch, channels, height, width)` with values in `[0, 1]`.
pub trait ImageGenerator<B: Backend>: Module<B> {
    fn generate(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// A network mapping an image batch to per-patch probabilities of being real.
pub trait PatchDiscriminator<B: Backend>: Module<B> {
    fn score(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Shape of all four networks.
#[derive(Config, Debug)]
pub struct CycleGanConfig {
    #[config(default = 3)]
    pub channels: usize,
    /// First-layer filters of the generators.
    #[config(default = 64)]
    pub generator_filters: usize,
    /// First-layer filters of the discriminators.
    #[config(default = 64)]
    pub discriminator_filters: usize,
    #[config(default = "NormKind::Batch")]
    pub norm: NormKind,
}

impl CycleGanConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CycleNetworks<Generator<B>, Discriminator<B>> {
        let generator = GeneratorConfig::new()
            .with_channels(self.channels)
            .with_base_filters(self.generator_filters)
            .with_norm(self.norm.clone());
        let discriminator = DiscriminatorConfig::new()
            .with_channels(self.channels)
            .with_base_filters(self.discriminator_filters)
            .with_norm(self.norm.clone());
        CycleNetworks {
            g: generator.init(device),
            f: generator.init(device),
            dy: discriminator.init(device),
            dx: discriminator.init(device),
        }
    }
}

/// The four owned networks trained together.
///
/// - `g`: X → Y, judged by `dy`
/// - `f`: Y → X, judged by `dx`
#[derive(Debug, Clone)]
pub struct CycleNetworks<G, D> {
    pub g: G,
    pub f: G,
    pub dy: D,
    pub dx: D,
}

impl<G, D> CycleNetworks<G, D> {
    pub fn new(g: G, f: G, dy: D, dx: D) -> Self {
        Self { g, f, dy, dx }
    }

    /// Total trainable scalars across all four networks.
    pub fn num_params<B>(&self) -> usize
    where
        B: Backend,
        G: Module<B>,
        D: Module<B>,
    {
        self.g.num_params() + self.f.num_params() + self.dy.num_params() + self.dx.num_params()
    }
}
