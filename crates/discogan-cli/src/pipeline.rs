//! Training, evaluation and checkpoint listing pipelines.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use indicatif::{ProgressBar, ProgressStyle};

use discogan::inference::{write_translations, Translator};
use discogan::model::{Discriminator, Generator};
use discogan::training::{
    CheckpointStore, JsonlMetrics, PngGridSink, RunOutcome, SampleSink, Solver, TracingMetrics,
    TrainingState,
};
use image_source::{BatchSource, FolderSource, ImageBatch, PrefetchConfig, SourceError, StopToken};

use crate::config::{build_run_config, load_discogan_toml, CliOverrides, RunConfig};

/// Backend used for training.
pub type TrainBackend = Autodiff<NdArray<f32>>;
/// Backend used for evaluation (no gradients).
pub type EvalBackend = NdArray<f32>;

/// Loss log file name inside the logs directory.
pub const LOSS_LOG: &str = "losses.jsonl";

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Path to the discogan config TOML file.
    pub config: PathBuf,
    /// Directory holding `{dataset}/{model,sample,logs,test}/{run}`.
    pub output: PathBuf,
    /// Run identifier to resume; a fresh timestamped run when `None`.
    pub load_model: Option<String>,
    /// Specific checkpoint iteration to resume from.
    pub resume_iteration: Option<usize>,
    pub overrides: CliOverrides,
}

/// Arguments for the `eval` subcommand.
#[derive(Debug)]
pub struct EvalArgs {
    pub config: PathBuf,
    pub output: PathBuf,
    /// Run identifier whose checkpoint is evaluated.
    pub load_model: String,
    pub resume_iteration: Option<usize>,
    pub dataset: Option<String>,
    /// Translation rounds per direction.
    pub rounds: usize,
    /// Images per round.
    pub count: usize,
}

/// Arguments for the `checkpoints` subcommand.
#[derive(Debug)]
pub struct CheckpointsArgs {
    pub config: PathBuf,
    pub output: PathBuf,
    pub load_model: String,
    pub dataset: Option<String>,
}

/// Where a run keeps its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    dataset_dir: PathBuf,
    run: String,
}

impl RunLayout {
    pub fn new(output: &Path, dataset: &str, run: &str) -> Self {
        Self {
            dataset_dir: output.join(dataset),
            run: run.to_string(),
        }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn model_dir(&self) -> PathBuf {
        self.dataset_dir.join("model").join(&self.run)
    }

    pub fn sample_dir(&self) -> PathBuf {
        self.dataset_dir.join("sample").join(&self.run)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dataset_dir.join("logs").join(&self.run)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.dataset_dir.join("test").join(&self.run)
    }
}

/// Run identifier for a fresh training run, e.g. `20240131-1742`.
pub fn timestamp_run_name() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M").to_string()
}

/// Which training state a run starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeFrom {
    /// Random initialization at iteration 0.
    Fresh,
    /// The newest checkpoint of the run; fresh init when none can be loaded.
    Latest,
    /// A specific checkpoint; failing to load it is fatal.
    Iteration(usize),
}

impl ResumeFrom {
    pub fn from_args(load_model: Option<&str>, resume_iteration: Option<usize>) -> anyhow::Result<Self> {
        match (load_model, resume_iteration) {
            (None, None) => Ok(Self::Fresh),
            (None, Some(_)) => anyhow::bail!("--resume-iteration requires --load-model"),
            (Some(_), None) => Ok(Self::Latest),
            (Some(_), Some(n)) => Ok(Self::Iteration(n)),
        }
    }
}

/// Restore a training state from `store`, or build a fresh one.
pub fn restore_state<G, D, OG, OD>(
    store: &CheckpointStore,
    resume: ResumeFrom,
    fresh: impl Fn() -> TrainingState<G, D, OG, OD>,
    device: &<TrainBackend as burn::prelude::Backend>::Device,
) -> anyhow::Result<TrainingState<G, D, OG, OD>>
where
    G: AutodiffModule<TrainBackend>,
    D: AutodiffModule<TrainBackend>,
    OG: Optimizer<G, TrainBackend>,
    OD: Optimizer<D, TrainBackend>,
{
    match resume {
        ResumeFrom::Fresh => Ok(fresh()),
        ResumeFrom::Latest => {
            let handle = match store.latest() {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    tracing::warn!(dir = %store.root().display(), "No prior state found, starting fresh");
                    return Ok(fresh());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to list checkpoints, starting fresh");
                    return Ok(fresh());
                }
            };
            match store.load::<TrainBackend, _, _, _, _>(&handle, fresh(), device) {
                Ok(state) => Ok(state),
                Err(e) => {
                    tracing::warn!(
                        iteration = handle.iteration,
                        error = %e,
                        "Latest checkpoint is unreadable, starting fresh"
                    );
                    Ok(fresh())
                }
            }
        }
        ResumeFrom::Iteration(iteration) => {
            let handle = store.find(iteration)?;
            store
                .load::<TrainBackend, _, _, _, _>(&handle, fresh(), device)
                .with_context(|| format!("Failed to resume from checkpoint {iteration}"))
        }
    }
}

fn resolve(config: &Path, overrides: &CliOverrides) -> anyhow::Result<RunConfig> {
    let toml = load_discogan_toml(config)?;
    build_run_config(&toml, overrides)
}

/// Train DiscoGAN until the target iteration or an interrupt.
pub fn run_train(args: TrainArgs, stop: StopToken) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Resolve config and run layout
    let config = resolve(&args.config, &args.overrides)?;
    let resume = ResumeFrom::from_args(args.load_model.as_deref(), args.resume_iteration)?;
    let run = args.load_model.clone().unwrap_or_else(timestamp_run_name);
    let layout = RunLayout::new(&args.output, &config.dataset.name, &run);
    if args.load_model.is_some() && !layout.model_dir().is_dir() {
        anyhow::bail!("No model directory for run `{run}` at {}", layout.model_dir().display());
    }
    tracing::info!(
        dataset = %config.dataset.name,
        run = %run,
        x_dir = %config.dataset.x.dir.display(),
        x_side = %config.dataset.x.crop,
        y_dir = %config.dataset.y.dir.display(),
        y_side = %config.dataset.y.crop,
        shape = %config.shape,
        batch_size = config.batch_size(),
        "Training run"
    );

    // 2. Open the batch source before anything touches the run directories
    let source = FolderSource::open(&config.dataset.x, &config.dataset.y, config.shape, config.prefetch, &stop)
        .context("Failed to open the training data")?;

    // 3. Build or restore the training state
    let device = Default::default();
    let store = CheckpointStore::open(layout.model_dir())?;
    let fresh = || {
        TrainingState::fresh(
            config.model.init::<TrainBackend>(&device),
            config
                .solver
                .optimizer
                .init::<TrainBackend, Generator<TrainBackend>, Discriminator<TrainBackend>>(),
        )
    };
    let state = restore_state(&store, resume, fresh, &device)?;
    let start_iteration = state.iteration;
    tracing::info!(
        iteration = start_iteration,
        params = state.networks.num_params::<TrainBackend>(),
        "Training state ready"
    );

    // 4. Run the solver
    let loss_log = JsonlMetrics::open(layout.logs_dir().join(LOSS_LOG))?;
    tracing::info!(path = %loss_log.path().display(), "Appending loss records");
    let mut solver = Solver::new(config.solver.clone(), source, stop)
        .with_checkpoints(store)
        .with_metrics(TracingMetrics::new(start_iteration))
        .with_metrics(loss_log)
        .with_samples(PngGridSink::new(layout.sample_dir()))
        .with_dataset(config.dataset.name.clone());
    let (state, outcome) = solver.run::<TrainBackend, _, _, _, _>(state, &device)?;

    // 5. Print summary
    let elapsed = start.elapsed();
    println!("\n--- Training Summary ---");
    println!("Dataset: {}", config.dataset.name);
    println!("Run: {}", layout.run());
    match outcome {
        RunOutcome::Completed { iterations } => println!("Completed: {iterations} iterations"),
        RunOutcome::Interrupted { iteration } => println!("Interrupted at iteration {iteration}"),
    }
    println!("Trained: {} iterations", state.iteration - start_iteration);
    println!("Checkpoints: {}", layout.model_dir().display());
    println!("Samples: {}", layout.sample_dir().display());
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Counts written grids on a progress bar.
struct ProgressSink<S> {
    inner: S,
    pb: ProgressBar,
}

impl<S: SampleSink> SampleSink for ProgressSink<S> {
    fn write(&mut self, tag: &str, columns: &[ImageBatch]) -> anyhow::Result<()> {
        self.pb.set_message(tag.to_string());
        let result = self.inner.write(tag, columns);
        self.pb.inc(1);
        result
    }
}

fn check_eval_sizes(rounds: usize, count: usize) -> anyhow::Result<()> {
    if rounds == 0 {
        anyhow::bail!("rounds must be positive");
    }
    if count == 0 {
        anyhow::bail!("count must be positive");
    }
    Ok(())
}

/// Translate a few images per domain with a trained run; no optimizer step.
pub fn run_eval(args: EvalArgs, stop: StopToken) -> anyhow::Result<()> {
    check_eval_sizes(args.rounds, args.count)?;
    let overrides = CliOverrides {
        dataset: args.dataset.clone(),
        ..Default::default()
    };
    let config = resolve(&args.config, &overrides)?;
    let layout = RunLayout::new(&args.output, &config.dataset.name, &args.load_model);

    let model_dir = layout.model_dir();
    if !model_dir.is_dir() {
        anyhow::bail!("No model directory for run `{}` at {}", args.load_model, model_dir.display());
    }
    let store = CheckpointStore::open(&model_dir)?;
    let handle = match args.resume_iteration {
        Some(iteration) => store.find(iteration)?,
        None => store
            .latest()?
            .ok_or_else(|| anyhow::anyhow!("No checkpoint found in {}", model_dir.display()))?,
    };

    let device = Default::default();
    let networks = store
        .load_networks::<EvalBackend, _, _>(&handle, config.model.init::<EvalBackend>(&device), &device)
        .with_context(|| format!("Failed to load checkpoint {}", handle.iteration))?;
    tracing::info!(iteration = handle.iteration, run = %args.load_model, "Loaded generators for evaluation");
    let translator = Translator::<EvalBackend, _>::new(networks.g, networks.f, device);

    let prefetch = PrefetchConfig {
        batch_size: args.count,
        ..config.prefetch
    };
    let mut source = FolderSource::open(&config.dataset.x, &config.dataset.y, config.shape, prefetch, &stop)
        .context("Failed to open the evaluation data")?;

    let pb = ProgressBar::new((args.rounds * 2) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid progress bar template")
            .progress_chars("=> "),
    );
    let mut sink = ProgressSink {
        inner: PngGridSink::new(layout.test_dir()),
        pb: pb.clone(),
    };

    let result = write_translations(&translator, &mut source, &mut sink, "test_", args.rounds, args.count);
    source.shutdown();
    pb.finish_with_message("done");

    let written = match result {
        Ok(written) => written,
        Err(SourceError::Cancelled) => {
            tracing::info!("Evaluation interrupted");
            pb.position() as usize
        }
        Err(e) => return Err(e).context("Evaluation failed"),
    };

    println!("\n--- Evaluation Summary ---");
    println!("Run: {} (iteration {})", args.load_model, handle.iteration);
    println!("Grids: {written}");
    println!("Output: {}", sink.inner.dir().display());

    Ok(())
}

/// Print the checkpoints of a run.
pub fn run_checkpoints(args: CheckpointsArgs) -> anyhow::Result<()> {
    let overrides = CliOverrides {
        dataset: args.dataset.clone(),
        ..Default::default()
    };
    let config = resolve(&args.config, &overrides)?;
    let layout = RunLayout::new(&args.output, &config.dataset.name, &args.load_model);
    let model_dir = layout.model_dir();
    if !model_dir.is_dir() {
        anyhow::bail!("No model directory for run `{}` at {}", args.load_model, model_dir.display());
    }

    let store = CheckpointStore::open(&model_dir)?;
    let handles = store.list()?;
    println!("--- Checkpoints ---");
    println!("Run: {}", args.load_model);
    println!("Directory: {}", model_dir.display());
    if handles.is_empty() {
        println!("(none)");
    }
    for handle in &handles {
        match store.meta(handle) {
            Ok(meta) => match meta.last_losses {
                Some(l) => println!(
                    "iteration {:>8}  G={:.4} Dy={:.4} F={:.4} Dx={:.4}",
                    meta.iteration, l.g, l.dy, l.f, l.dx
                ),
                None => println!("iteration {:>8}", meta.iteration),
            },
            Err(e) => println!("iteration {:>8}  (unreadable: {e})", handle.iteration),
        }
    }
    Ok(())
}
