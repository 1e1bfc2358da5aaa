//! The training loop.
//!
//! Per iteration `i` (starting from the state's counter):
//! 1. stop requested → return [`RunOutcome::Interrupted`]
//! 2. `i % sample_interval == 0` → write a `[x, G(x), y, F(y)]` sample grid
//! 3. pull one batch per domain (blocking)
//! 4. one joint step over the four networks
//! 5. `i % print_interval == 0` → loss report to every metrics sink
//! 6. `(i + 1) % save_interval == 0` → checkpoint tagged `i`
//! 7. `i += 1`
//!
//! After the target iteration: round-trip translations in both directions,
//! then a final checkpoint. Checkpoints are written only after the step of
//! their iteration completed, so an interrupt never leaves one behind for a
//! step that did not finish.

use std::time::Instant;

use anyhow::Context;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use image_source::{BatchSource, Domain, ImageBatch, SourceError, StopToken};

use crate::inference::{write_translations, Translator};
use crate::model::bridge::batch_to_tensor;
use crate::model::{CycleNetworks, ImageGenerator, PatchDiscriminator};
use crate::training::checkpoint::CheckpointStore;
use crate::training::joint::JointOptimizerConfig;
use crate::training::loss::LossConfig;
use crate::training::metrics::{LossAverage, LossRecord, MetricsSink, StepLosses};
use crate::training::sample::SampleSink;
use crate::training::state::TrainingState;

/// Loop schedule and hyperparameters.
#[derive(Config, Debug)]
pub struct SolverConfig {
    /// Iteration count at which training stops.
    #[config(default = 200000)]
    pub iterations: usize,
    /// Loss report every N iterations (0 disables).
    #[config(default = 50)]
    pub print_interval: usize,
    /// Sample grid every N iterations (0 disables).
    #[config(default = 200)]
    pub sample_interval: usize,
    /// Checkpoint every N iterations (0 disables; the final one is always written).
    #[config(default = 10000)]
    pub save_interval: usize,
    /// Upper bound on images per in-loop sample grid.
    #[config(default = 4)]
    pub sample_batch: usize,
    /// Images per direction in the post-training translations.
    #[config(default = 5)]
    pub final_sample_count: usize,
    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,
    #[config(default = "JointOptimizerConfig::new()")]
    pub optimizer: JointOptimizerConfig,
}

/// Where the solver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    Initialized,
    Running,
    Sampling,
    Checkpointing,
    Completed,
    Interrupted,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The target was reached and the final checkpoint written.
    Completed { iterations: usize },
    /// A stop was requested; `iteration` is the first step that did not run.
    Interrupted { iteration: usize },
}

/// Drives the joint optimization loop with its side effects.
pub struct Solver<S> {
    config: SolverConfig,
    source: S,
    stop: StopToken,
    store: Option<CheckpointStore>,
    metrics: Vec<Box<dyn MetricsSink>>,
    samples: Option<Box<dyn SampleSink>>,
    dataset: String,
    phase: SolverPhase,
}

impl<S: BatchSource> Solver<S> {
    pub fn new(config: SolverConfig, source: S, stop: StopToken) -> Self {
        Self {
            config,
            source,
            stop,
            store: None,
            metrics: Vec::new(),
            samples: None,
            dataset: String::from("custom"),
            phase: SolverPhase::Initialized,
        }
    }

    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.metrics.push(Box::new(sink));
        self
    }

    pub fn with_samples(mut self, sink: impl SampleSink + 'static) -> Self {
        self.samples = Some(Box::new(sink));
        self
    }

    /// Dataset name carried in loss reports.
    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn phase(&self) -> SolverPhase {
        self.phase
    }

    /// Train from `state` until the target iteration or a stop request.
    ///
    /// The batch source is shut down before returning, whatever the outcome.
    pub fn run<B, G, D, OG, OD>(
        &mut self,
        state: TrainingState<G, D, OG, OD>,
        device: &B::Device,
    ) -> anyhow::Result<(TrainingState<G, D, OG, OD>, RunOutcome)>
    where
        B: AutodiffBackend,
        G: ImageGenerator<B> + AutodiffModule<B>,
        G::InnerModule: ImageGenerator<B::InnerBackend>,
        D: PatchDiscriminator<B> + AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let result = self.run_loop::<B, G, D, OG, OD>(state, device);
        self.source.shutdown();
        match &result {
            Ok((_, RunOutcome::Completed { .. })) => self.phase = SolverPhase::Completed,
            Ok((_, RunOutcome::Interrupted { .. })) => self.phase = SolverPhase::Interrupted,
            Err(_) => {}
        }
        result
    }

    fn run_loop<B, G, D, OG, OD>(
        &mut self,
        mut state: TrainingState<G, D, OG, OD>,
        device: &B::Device,
    ) -> anyhow::Result<(TrainingState<G, D, OG, OD>, RunOutcome)>
    where
        B: AutodiffBackend,
        G: ImageGenerator<B> + AutodiffModule<B>,
        G::InnerModule: ImageGenerator<B::InnerBackend>,
        D: PatchDiscriminator<B> + AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let target = self.config.iterations;
        let start_iteration = state.iteration;
        let train_start = Instant::now();
        let mut average = LossAverage::new();
        let mut last_losses: Option<StepLosses> = None;

        tracing::info!(
            start_iteration,
            target,
            learning_rate = state.optimizers.learning_rate(),
            print_interval = self.config.print_interval,
            sample_interval = self.config.sample_interval,
            save_interval = self.config.save_interval,
            dataset = %self.dataset,
            "Starting training"
        );
        self.phase = SolverPhase::Running;

        while state.iteration < target {
            let iteration = state.iteration;
            if self.stop.is_stopped() {
                return Ok(self.interrupted(state, iteration));
            }

            if is_due(iteration, self.config.sample_interval) && self.samples.is_some() {
                self.phase = SolverPhase::Sampling;
                let sampled = self.write_sample::<B, G, D>(&state.networks, iteration, device)?;
                self.phase = SolverPhase::Running;
                if !sampled {
                    return Ok(self.interrupted(state, iteration));
                }
            }

            let Some(x) = self.fetch(Domain::X, iteration)? else {
                return Ok(self.interrupted(state, iteration));
            };
            let Some(y) = self.fetch(Domain::Y, iteration)? else {
                return Ok(self.interrupted(state, iteration));
            };
            let batch_size = x.len();

            let (networks, losses) = state.optimizers.step(
                state.networks,
                batch_to_tensor::<B>(&x, device),
                batch_to_tensor::<B>(&y, device),
                &self.config.loss,
            );
            state.networks = networks;
            average.update(&losses);
            last_losses = Some(losses);
            tracing::debug!(iteration, g = losses.g, dy = losses.dy, f = losses.f, dx = losses.dx, "Step");

            if is_due(iteration, self.config.print_interval) {
                let record = LossRecord {
                    iteration,
                    target_iterations: target,
                    batch_size,
                    dataset: self.dataset.clone(),
                    losses,
                    average: average.mean().unwrap_or(losses),
                    elapsed_secs: train_start.elapsed().as_secs_f64(),
                };
                self.report(&record);
                average.reset();
            }

            if self.config.save_interval > 0 && (iteration + 1) % self.config.save_interval == 0 {
                self.checkpoint::<B, G, D, OG, OD>(&state, last_losses)?;
            }

            state.iteration += 1;
        }

        if let Some(sink) = self.samples.as_mut() {
            self.phase = SolverPhase::Sampling;
            let translator = Translator::<B::InnerBackend, _>::new(
                state.networks.g.valid(),
                state.networks.f.valid(),
                device.clone(),
            );
            let prefix = format!("final_{}_", state.iteration);
            match write_translations(
                &translator,
                &mut self.source,
                sink.as_mut(),
                &prefix,
                1,
                self.config.final_sample_count,
            ) {
                Ok(written) => tracing::info!(grids = written, "Final translations written"),
                Err(SourceError::Cancelled) => tracing::info!("Final translations skipped: stop requested"),
                Err(e) => tracing::warn!(error = %e, "Final translations failed"),
            }
        }

        // The final checkpoint is written even when the schedule disables periodic saves.
        self.checkpoint::<B, G, D, OG, OD>(&state, last_losses)?;

        let elapsed = train_start.elapsed().as_secs_f64();
        tracing::info!(
            iterations = state.iteration,
            trained = state.iteration - start_iteration,
            elapsed_secs = format!("{elapsed:.1}"),
            "Training complete"
        );
        let iterations = state.iteration;
        Ok((state, RunOutcome::Completed { iterations }))
    }

    fn interrupted<G, D, OG, OD>(
        &mut self,
        state: TrainingState<G, D, OG, OD>,
        iteration: usize,
    ) -> (TrainingState<G, D, OG, OD>, RunOutcome) {
        tracing::info!(iteration, "Training interrupted, no checkpoint written for this iteration");
        (state, RunOutcome::Interrupted { iteration })
    }

    /// `Ok(None)` when the source was cancelled.
    fn fetch(&mut self, domain: Domain, iteration: usize) -> anyhow::Result<Option<ImageBatch>> {
        match self.source.next_batch(domain) {
            Ok(batch) => Ok(Some(batch)),
            Err(SourceError::Cancelled) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("Failed to fetch domain {domain} batch at iteration {iteration}")),
        }
    }

    /// Returns `false` when the source was cancelled mid-sample.
    fn write_sample<B, G, D>(
        &mut self,
        networks: &CycleNetworks<G, D>,
        iteration: usize,
        device: &B::Device,
    ) -> anyhow::Result<bool>
    where
        B: AutodiffBackend,
        G: AutodiffModule<B>,
        G::InnerModule: ImageGenerator<B::InnerBackend>,
    {
        let Some(x) = self.fetch(Domain::X, iteration)? else {
            return Ok(false);
        };
        let Some(y) = self.fetch(Domain::Y, iteration)? else {
            return Ok(false);
        };
        let count = x.len().min(y.len()).min(self.config.sample_batch);
        let translator = Translator::<B::InnerBackend, _>::new(networks.g.valid(), networks.f.valid(), device.clone());

        let tag = format!("sample_{iteration}");
        let written = translator
            .sample_columns(&x.take(count), &y.take(count))
            .map_err(anyhow::Error::new)
            .and_then(|columns| match self.samples.as_mut() {
                Some(sink) => sink.write(&tag, &columns),
                None => Ok(()),
            });
        if let Err(e) = written {
            tracing::warn!(iteration, error = %e, "Failed to write sample grid");
        }
        Ok(true)
    }

    fn report(&mut self, record: &LossRecord) {
        for warning in record.losses.health_check() {
            tracing::warn!(iteration = record.iteration, "Health check: {warning}");
        }
        for sink in &mut self.metrics {
            if let Err(e) = sink.record(record) {
                tracing::warn!(iteration = record.iteration, error = %e, "Metrics sink failed");
            }
        }
    }

    fn checkpoint<B, G, D, OG, OD>(
        &mut self,
        state: &TrainingState<G, D, OG, OD>,
        last_losses: Option<StepLosses>,
    ) -> anyhow::Result<()>
    where
        B: AutodiffBackend,
        G: AutodiffModule<B>,
        D: AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let Some(store) = &self.store else {
            return Ok(());
        };
        self.phase = SolverPhase::Checkpointing;
        store
            .save::<B, G, D, OG, OD>(state, last_losses)
            .with_context(|| format!("Failed to save checkpoint at iteration {}", state.iteration))?;
        self.phase = SolverPhase::Running;
        Ok(())
    }
}

fn is_due(iteration: usize, interval: usize) -> bool {
    interval > 0 && iteration % interval == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SolverConfig::new();
        assert_eq!(config.iterations, 200_000);
        assert_eq!(config.print_interval, 50);
        assert_eq!(config.sample_interval, 200);
        assert_eq!(config.save_interval, 10_000);
        assert_eq!(config.sample_batch, 4);
        assert_eq!(config.loss.lambda_x, 10.0);
        assert_eq!(config.optimizer.learning_rate, 2e-4);
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(0, 50));
        assert!(is_due(100, 50));
        assert!(!is_due(51, 50));
        assert!(!is_due(0, 0), "interval 0 disables");
    }
}
