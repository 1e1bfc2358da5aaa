//! TOML config loading for the discogan CLI.
//!
//! Deserializes `configs/discogan.toml`, which has `[dataset]`, `[train]`,
//! `[model]` and `[loader]` sections, then merges it with CLI overrides.
//! Priority chain: built-in defaults < TOML values < CLI flags.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use discogan::model::{CycleGanConfig, NormKind};
use discogan::training::{JointOptimizerConfig, LossConfig, SolverConfig};
use image_source::{Crop, DomainSpec, ImageShape, PrefetchConfig};

/// Dataset used when neither the TOML nor the CLI names one.
pub const DEFAULT_DATASET: &str = "edges2shoes";

/// Spatial stride of the generator's encoder; image sides must be a multiple.
const GENERATOR_STRIDE: usize = 16;

/// Top-level structure matching `configs/discogan.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoToml {
    #[serde(default)]
    pub dataset: DatasetToml,
    #[serde(default)]
    pub train: TrainToml,
    #[serde(default)]
    pub model: ModelToml,
    #[serde(default)]
    pub loader: LoaderToml,
}

/// `[dataset]`: which images to train on.
#[derive(Debug, Default, Deserialize)]
pub struct DatasetToml {
    /// Preset name (`edges2shoes`, `edges2handbags`, `handbags2shoes`) or any
    /// custom name when `x_dir` and `y_dir` are given.
    pub name: Option<String>,
    /// Directory holding the preset dataset folders.
    pub root: Option<PathBuf>,
    /// Height and width images are resized to.
    pub image_size: Option<usize>,
    /// 1 (grayscale) or 3 (RGB).
    pub channels: Option<usize>,
    pub x_dir: Option<PathBuf>,
    pub y_dir: Option<PathBuf>,
    /// Part of each X image to keep before resizing.
    pub x_side: Option<Crop>,
    /// Part of each Y image to keep before resizing.
    pub y_side: Option<Crop>,
}

/// `[train]`: optimization schedule and hyperparameters.
#[derive(Debug, Default, Deserialize)]
pub struct TrainToml {
    pub batch_size: Option<usize>,
    pub iterations: Option<usize>,
    pub learning_rate: Option<f64>,
    pub beta_1: Option<f64>,
    pub beta_2: Option<f64>,
    pub print_interval: Option<usize>,
    pub sample_interval: Option<usize>,
    pub save_interval: Option<usize>,
    pub sample_batch: Option<usize>,
    pub final_sample_count: Option<usize>,
    pub lambda_x: Option<f64>,
    pub lambda_y: Option<f64>,
}

/// `[model]`: network widths and normalization.
#[derive(Debug, Default, Deserialize)]
pub struct ModelToml {
    pub generator_filters: Option<usize>,
    pub discriminator_filters: Option<usize>,
    pub norm: Option<NormChoice>,
}

/// Normalization as spelled in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormChoice {
    Batch,
    Instance,
}

impl From<NormChoice> for NormKind {
    fn from(choice: NormChoice) -> Self {
        match choice {
            NormChoice::Batch => NormKind::Batch,
            NormChoice::Instance => NormKind::Instance,
        }
    }
}

/// `[loader]`: background decoding pool.
#[derive(Debug, Default, Deserialize)]
pub struct LoaderToml {
    pub num_workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub seed: Option<u64>,
}

/// Values given on the command line; `None` leaves the TOML value in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dataset: Option<String>,
    pub batch_size: Option<usize>,
    pub iterations: Option<usize>,
    pub learning_rate: Option<f64>,
    pub beta_1: Option<f64>,
    pub beta_2: Option<f64>,
    pub print_interval: Option<usize>,
    pub sample_interval: Option<usize>,
    pub save_interval: Option<usize>,
    pub image_size: Option<usize>,
    pub num_workers: Option<usize>,
}

/// The two image folders of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPlan {
    pub name: String,
    pub x: DomainSpec,
    pub y: DomainSpec,
}

/// Everything a train or eval run needs, fully resolved.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dataset: DatasetPlan,
    pub shape: ImageShape,
    pub model: CycleGanConfig,
    pub solver: SolverConfig,
    pub prefetch: PrefetchConfig,
}

impl RunConfig {
    pub fn batch_size(&self) -> usize {
        self.prefetch.batch_size
    }
}

/// Load and deserialize a `DiscoToml` from a TOML file.
pub fn load_discogan_toml(path: &Path) -> anyhow::Result<DiscoToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: DiscoToml =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded discogan config");
    Ok(config)
}

/// Resolve the dataset folders for `name`.
///
/// Presets read pix2pix side-by-side pairs under `root`; explicit directories
/// and sides replace the preset's. Other names need both directories.
pub fn resolve_dataset(name: &str, dataset: &DatasetToml) -> anyhow::Result<DatasetPlan> {
    let root = dataset.root.clone().unwrap_or_else(|| PathBuf::from("data"));
    let shoes = root.join("edges2shoes").join("train");
    let handbags = root.join("edges2handbags").join("train");

    let preset = match name {
        "edges2shoes" => Some((shoes.clone(), Crop::Left, shoes, Crop::Right)),
        "edges2handbags" => Some((handbags.clone(), Crop::Left, handbags, Crop::Right)),
        "handbags2shoes" => Some((handbags, Crop::Right, shoes, Crop::Right)),
        _ => None,
    };

    let (x_dir, x_side, y_dir, y_side) = match preset {
        Some((x_dir, x_side, y_dir, y_side)) => (
            dataset.x_dir.clone().unwrap_or(x_dir),
            dataset.x_side.unwrap_or(x_side),
            dataset.y_dir.clone().unwrap_or(y_dir),
            dataset.y_side.unwrap_or(y_side),
        ),
        None => {
            let (Some(x_dir), Some(y_dir)) = (dataset.x_dir.clone(), dataset.y_dir.clone()) else {
                anyhow::bail!(
                    "Dataset `{name}` is not a preset (edges2shoes, edges2handbags, handbags2shoes); \
                     set dataset.x_dir and dataset.y_dir"
                );
            };
            (
                x_dir,
                dataset.x_side.unwrap_or_default(),
                y_dir,
                dataset.y_side.unwrap_or_default(),
            )
        }
    };

    Ok(DatasetPlan {
        name: name.to_string(),
        x: DomainSpec {
            dir: x_dir,
            crop: x_side,
        },
        y: DomainSpec {
            dir: y_dir,
            crop: y_side,
        },
    })
}

/// Merge built-in defaults, TOML values and CLI flags into a [`RunConfig`].
pub fn build_run_config(toml: &DiscoToml, cli: &CliOverrides) -> anyhow::Result<RunConfig> {
    let name = cli
        .dataset
        .clone()
        .or_else(|| toml.dataset.name.clone())
        .unwrap_or_else(|| DEFAULT_DATASET.to_string());
    let dataset = resolve_dataset(&name, &toml.dataset)?;

    let image_size = cli.image_size.or(toml.dataset.image_size).unwrap_or(64);
    if image_size == 0 || image_size % GENERATOR_STRIDE != 0 {
        anyhow::bail!("image_size must be a positive multiple of {GENERATOR_STRIDE}, got {image_size}");
    }
    let channels = toml.dataset.channels.unwrap_or(3);
    let shape = ImageShape::new(image_size, image_size, channels)?;

    let train = &toml.train;
    let batch_size = cli.batch_size.or(train.batch_size).unwrap_or(200);
    if batch_size == 0 {
        anyhow::bail!("batch_size must be positive");
    }

    let defaults = JointOptimizerConfig::new();
    let optimizer = JointOptimizerConfig::new()
        .with_learning_rate(cli.learning_rate.or(train.learning_rate).unwrap_or(defaults.learning_rate))
        .with_beta_1(cli.beta_1.or(train.beta_1).unwrap_or(defaults.beta_1))
        .with_beta_2(cli.beta_2.or(train.beta_2).unwrap_or(defaults.beta_2));
    if optimizer.learning_rate <= 0.0 {
        anyhow::bail!("learning_rate must be positive, got {}", optimizer.learning_rate);
    }

    let loss_defaults = LossConfig::new();
    let loss = LossConfig::new()
        .with_lambda_x(train.lambda_x.unwrap_or(loss_defaults.lambda_x))
        .with_lambda_y(train.lambda_y.unwrap_or(loss_defaults.lambda_y));

    let solver_defaults = SolverConfig::new();
    let solver = SolverConfig::new()
        .with_iterations(cli.iterations.or(train.iterations).unwrap_or(solver_defaults.iterations))
        .with_print_interval(
            cli.print_interval
                .or(train.print_interval)
                .unwrap_or(solver_defaults.print_interval),
        )
        .with_sample_interval(
            cli.sample_interval
                .or(train.sample_interval)
                .unwrap_or(solver_defaults.sample_interval),
        )
        .with_save_interval(
            cli.save_interval
                .or(train.save_interval)
                .unwrap_or(solver_defaults.save_interval),
        )
        .with_sample_batch(train.sample_batch.unwrap_or(solver_defaults.sample_batch))
        .with_final_sample_count(train.final_sample_count.unwrap_or(solver_defaults.final_sample_count))
        .with_loss(loss)
        .with_optimizer(optimizer);

    let model_defaults = CycleGanConfig::new();
    let model = CycleGanConfig::new()
        .with_channels(channels)
        .with_generator_filters(toml.model.generator_filters.unwrap_or(model_defaults.generator_filters))
        .with_discriminator_filters(
            toml.model
                .discriminator_filters
                .unwrap_or(model_defaults.discriminator_filters),
        )
        .with_norm(toml.model.norm.map(NormKind::from).unwrap_or(model_defaults.norm));

    let loader_defaults = PrefetchConfig::default();
    let prefetch = PrefetchConfig {
        batch_size,
        num_workers: cli
            .num_workers
            .or(toml.loader.num_workers)
            .unwrap_or(loader_defaults.num_workers),
        queue_capacity: toml.loader.queue_capacity.unwrap_or(loader_defaults.queue_capacity),
        seed: toml.loader.seed.unwrap_or(loader_defaults.seed),
    };

    Ok(RunConfig {
        dataset,
        shape,
        model,
        solver,
        prefetch,
    })
}
