//! The joint optimization step over all four networks.
//!
//! One step computes the four gradients against the same parameter
//! snapshot, then applies four independent Adam updates:
//!
//! | optimizer | parameters | objective                  |
//! |-----------|------------|----------------------------|
//! | `g`       | G          | G adversarial + cycle      |
//! | `dy`      | Dy         | Dy real/fake               |
//! | `f`       | F          | F adversarial + cycle      |
//! | `dx`      | Dx         | Dx real/fake               |
//!
//! Gradients come from two backward passes. The generator pass
//! differentiates `G_adv + F_adv + cycle`: since `G_adv` does not depend on
//! F and `F_adv` does not depend on G, extracting each generator's gradients
//! from that sum gives exactly the gradient of its own objective. The
//! discriminator pass differentiates `Dy + Dx` on detached fakes, so no
//! discriminator gradient flows into a generator or the other way round.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::model::bridge::scalar;
use crate::model::{CycleNetworks, ImageGenerator, PatchDiscriminator};
use crate::training::loss::{
    cycle_consistency_loss, discriminator_loss, generator_adversarial_loss, LossConfig,
};
use crate::training::metrics::StepLosses;

/// Shared Adam hyperparameters for the four optimizers.
#[derive(Config, Debug)]
pub struct JointOptimizerConfig {
    #[config(default = 2e-4)]
    pub learning_rate: f64,
    /// First-moment decay.
    #[config(default = 0.5)]
    pub beta_1: f64,
    /// Second-moment decay.
    #[config(default = 0.999)]
    pub beta_2: f64,
    #[config(default = 1e-8)]
    pub epsilon: f64,
}

impl JointOptimizerConfig {
    fn adam(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(self.beta_1 as f32)
            .with_beta_2(self.beta_2 as f32)
            .with_epsilon(self.epsilon as f32)
    }

    /// Fresh optimizers (zero moments) for generators of type `G` and
    /// discriminators of type `D`.
    pub fn init<B, G, D>(&self) -> JointOptimizer<impl Optimizer<G, B>, impl Optimizer<D, B>>
    where
        B: AutodiffBackend,
        G: AutodiffModule<B>,
        D: AutodiffModule<B>,
    {
        let adam = self.adam();
        JointOptimizer {
            g: adam.init::<B, G>(),
            dy: adam.init::<B, D>(),
            f: adam.init::<B, G>(),
            dx: adam.init::<B, D>(),
            learning_rate: self.learning_rate,
        }
    }
}

/// Four independent optimizers, one per network.
pub struct JointOptimizer<OG, OD> {
    pub g: OG,
    pub dy: OD,
    pub f: OG,
    pub dx: OD,
    learning_rate: f64,
}

impl<OG, OD> JointOptimizer<OG, OD> {
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// One joint step: consume the networks, return them updated.
    pub fn step<B, G, D>(
        &mut self,
        networks: CycleNetworks<G, D>,
        x: Tensor<B, 4>,
        y: Tensor<B, 4>,
        loss: &LossConfig,
    ) -> (CycleNetworks<G, D>, StepLosses)
    where
        B: AutodiffBackend,
        G: ImageGenerator<B> + AutodiffModule<B>,
        D: PatchDiscriminator<B> + AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let CycleNetworks { g, f, dy, dx } = networks;

        // Generator pass.
        let fake_y = g.generate(x.clone());
        let fake_x = f.generate(y.clone());
        let cycle = cycle_consistency_loss(
            x.clone(),
            f.generate(fake_y.clone()),
            y.clone(),
            g.generate(fake_x.clone()),
            loss,
        );
        let g_adv = generator_adversarial_loss(dy.score(fake_y.clone()), loss.eps);
        let f_adv = generator_adversarial_loss(dx.score(fake_x.clone()), loss.eps);

        let cycle_value = scalar(cycle.clone());
        let g_adv_value = scalar(g_adv.clone());
        let f_adv_value = scalar(f_adv.clone());

        let fake_y = fake_y.detach();
        let fake_x = fake_x.detach();

        let mut grads = (g_adv + f_adv + cycle).backward();
        let grads_g = GradientsParams::from_module(&mut grads, &g);
        let grads_f = GradientsParams::from_module(&mut grads, &f);

        // Discriminator pass, same parameters, fakes treated as data.
        let dy_loss = discriminator_loss(dy.score(y), dy.score(fake_y), loss.eps);
        let dx_loss = discriminator_loss(dx.score(x), dx.score(fake_x), loss.eps);
        let dy_value = scalar(dy_loss.clone());
        let dx_value = scalar(dx_loss.clone());

        let mut grads = (dy_loss + dx_loss).backward();
        let grads_dy = GradientsParams::from_module(&mut grads, &dy);
        let grads_dx = GradientsParams::from_module(&mut grads, &dx);

        let lr = self.learning_rate;
        let updated = CycleNetworks {
            g: self.g.step(lr, g, grads_g),
            f: self.f.step(lr, f, grads_f),
            dy: self.dy.step(lr, dy, grads_dy),
            dx: self.dx.step(lr, dx, grads_dx),
        };

        let losses = StepLosses {
            g: g_adv_value + cycle_value,
            dy: dy_value,
            f: f_adv_value + cycle_value,
            dx: dx_value,
        };
        tracing::trace!(?losses, cycle = cycle_value, "Joint step");
        (updated, losses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;

    use crate::model::{CycleGanConfig, Discriminator, Generator};

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_default_hyperparameters() {
        let config = JointOptimizerConfig::new();
        assert_eq!(config.learning_rate, 2e-4);
        assert_eq!(config.beta_1, 0.5);
        assert_eq!(config.beta_2, 0.999);
    }

    #[test]
    fn test_step_on_real_networks_updates_generators() {
        let device = Default::default();
        let nets = CycleGanConfig::new()
            .with_generator_filters(4)
            .with_discriminator_filters(4)
            .init::<TestAutodiffBackend>(&device);
        let before_g = nets.g.first_weight().inner();
        let before_f = nets.f.first_weight().inner();

        let mut optim = JointOptimizerConfig::new().init::<
            TestAutodiffBackend,
            Generator<TestAutodiffBackend>,
            Discriminator<TestAutodiffBackend>,
        >();
        let x = Tensor::<TestAutodiffBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        let y = Tensor::<TestAutodiffBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);

        let (nets, losses) = optim.step(nets, x, y, &LossConfig::new());
        assert!(losses.is_finite(), "losses must be finite: {losses:?}");
        assert!(losses.g > 0.0 && losses.f > 0.0 && losses.dy > 0.0 && losses.dx > 0.0);

        let moved_g: f32 = (nets.g.first_weight().inner() - before_g).abs().max().into_scalar().elem();
        let moved_f: f32 = (nets.f.first_weight().inner() - before_f).abs().max().into_scalar().elem();
        assert!(moved_g > 0.0, "G must be updated");
        assert!(moved_f > 0.0, "F must be updated");
    }
}
