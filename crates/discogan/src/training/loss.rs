//! Adversarial and cycle-consistency losses.
//!
//! All functions are generic over `B: Backend`. Score tensors come straight
//! from a discriminator (`(batch, 1, h, w)`, values in `(0, 1)`); every log
//! is offset by `eps` so it never sees zero.

use burn::prelude::*;

/// Loss weights and the numeric-stability offset.
#[derive(Config, Debug)]
pub struct LossConfig {
    /// Weight of `MSE(x, F(G(x)))`.
    #[config(default = 10.0)]
    pub lambda_x: f64,
    /// Weight of `MSE(y, G(F(y)))`.
    #[config(default = 10.0)]
    pub lambda_y: f64,
    /// Added inside every log.
    #[config(default = 1e-12)]
    pub eps: f64,
}

/// Generator adversarial loss: `-mean(log(D(fake) + eps))`.
pub fn generator_adversarial_loss<B: Backend>(fake_scores: Tensor<B, 4>, eps: f64) -> Tensor<B, 1> {
    fake_scores.add_scalar(eps).log().mean().neg()
}

/// Discriminator loss:
/// `0.5 * (-mean(log(D(real) + eps)) - mean(log(1 - D(fake) + eps)))`.
pub fn discriminator_loss<B: Backend>(
    real_scores: Tensor<B, 4>,
    fake_scores: Tensor<B, 4>,
    eps: f64,
) -> Tensor<B, 1> {
    let error_real = real_scores.add_scalar(eps).log().mean().neg();
    let error_fake = fake_scores
        .neg()
        .add_scalar(1.0)
        .add_scalar(eps)
        .log()
        .mean()
        .neg();
    (error_real + error_fake).mul_scalar(0.5)
}

/// Mean squared error over every element.
pub fn mse<B: Backend>(target: Tensor<B, 4>, prediction: Tensor<B, 4>) -> Tensor<B, 1> {
    (prediction - target).powf_scalar(2.0).mean()
}

/// Cycle-consistency loss:
/// `lambda_x * MSE(x, F(G(x))) + lambda_y * MSE(y, G(F(y)))`.
pub fn cycle_consistency_loss<B: Backend>(
    x: Tensor<B, 4>,
    x_reconstructed: Tensor<B, 4>,
    y: Tensor<B, 4>,
    y_reconstructed: Tensor<B, 4>,
    config: &LossConfig,
) -> Tensor<B, 1> {
    let forward = mse(x, x_reconstructed).mul_scalar(config.lambda_x);
    let backward = mse(y, y_reconstructed).mul_scalar(config.lambda_y);
    forward + backward
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn value(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    fn filled(v: f32) -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 4>::ones([2, 1, 2, 2], &Default::default()).mul_scalar(v)
    }

    #[test]
    fn test_generator_loss_known_value() {
        let loss = value(generator_adversarial_loss(filled(0.5), 1e-12));
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5, "got {loss}");
    }

    #[test]
    fn test_losses_finite_at_saturated_scores() {
        // D(fake) = 0 and D(real) = 0, D(fake) = 1 would hit log(0) without eps.
        let g = value(generator_adversarial_loss(filled(0.0), 1e-12));
        assert!(g.is_finite() && g > 20.0, "expected large finite loss, got {g}");

        let d = value(discriminator_loss(filled(0.0), filled(1.0), 1e-12));
        assert!(d.is_finite() && d > 20.0, "expected large finite loss, got {d}");
    }

    #[test]
    fn test_discriminator_loss_known_value() {
        // Perfect discriminator: D(real) = 1, D(fake) = 0.
        let perfect = value(discriminator_loss(filled(1.0), filled(0.0), 1e-12));
        assert!(perfect.abs() < 1e-5, "got {perfect}");

        // Undecided discriminator: both 0.5 gives ln 2.
        let undecided = value(discriminator_loss(filled(0.5), filled(0.5), 1e-12));
        assert!((undecided - std::f64::consts::LN_2).abs() < 1e-5, "got {undecided}");
    }

    #[test]
    fn test_cycle_loss_zero_on_exact_reconstruction() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random([2, 3, 4, 4], Distribution::Default, &device);
        let y = Tensor::<TestBackend, 4>::random([2, 3, 4, 4], Distribution::Default, &device);
        let loss = value(cycle_consistency_loss(
            x.clone(),
            x,
            y.clone(),
            y,
            &LossConfig::new(),
        ));
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_cycle_loss_weights() {
        // MSE(x) = 1, MSE(y) = 0.25.
        let config = LossConfig::new().with_lambda_x(2.0).with_lambda_y(4.0);
        let loss = value(cycle_consistency_loss(
            filled(0.0),
            filled(1.0),
            filled(0.0),
            filled(0.5),
            &config,
        ));
        assert!((loss - 3.0).abs() < 1e-6, "expected 2*1 + 4*0.25 = 3, got {loss}");
    }
}
