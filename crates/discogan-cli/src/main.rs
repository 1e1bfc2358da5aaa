mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use image_source::StopToken;
use tracing_subscriber::EnvFilter;

use config::CliOverrides;
use pipeline::{CheckpointsArgs, EvalArgs, TrainArgs};

/// discogan: unpaired cross-domain image translation with coupled GANs.
#[derive(Parser)]
#[command(name = "discogan", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training, evaluation and checkpoint inspection.
#[derive(Subcommand)]
enum Command {
    /// Train the four networks, resuming a run when `--load-model` is given.
    Train {
        /// Path to the discogan config TOML file.
        #[arg(long, default_value = "configs/discogan.toml")]
        config: PathBuf,
        /// Root directory for model, sample, logs and test outputs.
        #[arg(long, default_value = "runs")]
        output: PathBuf,
        /// Dataset preset or custom name (overrides the TOML).
        #[arg(long)]
        dataset: Option<String>,
        /// Run identifier to resume (e.g. 20240131-1742). Must exist; starts fresh if it has no loadable checkpoint.
        #[arg(long)]
        load_model: Option<String>,
        /// Resume from this checkpoint iteration instead of the latest. Fatal if absent.
        #[arg(long)]
        resume_iteration: Option<usize>,
        /// Override the target iteration count.
        #[arg(long)]
        iterations: Option<usize>,
        /// Override the batch size.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override the Adam learning rate.
        #[arg(long)]
        lr: Option<f64>,
        /// Override Adam's first-moment decay.
        #[arg(long)]
        beta1: Option<f64>,
        /// Override Adam's second-moment decay.
        #[arg(long)]
        beta2: Option<f64>,
        /// Override the loss report interval.
        #[arg(long)]
        print_interval: Option<usize>,
        /// Override the sample grid interval.
        #[arg(long)]
        sample_interval: Option<usize>,
        /// Override the checkpoint interval.
        #[arg(long)]
        save_interval: Option<usize>,
        /// Override the image side length (multiple of 16).
        #[arg(long)]
        image_size: Option<usize>,
        /// Override the number of decoding workers per domain.
        #[arg(long)]
        num_workers: Option<usize>,
    },
    /// Translate images in both directions with a trained run; no training.
    Eval {
        /// Path to the discogan config TOML file.
        #[arg(long, default_value = "configs/discogan.toml")]
        config: PathBuf,
        /// Root directory for model, sample, logs and test outputs.
        #[arg(long, default_value = "runs")]
        output: PathBuf,
        /// Dataset preset or custom name (overrides the TOML).
        #[arg(long)]
        dataset: Option<String>,
        /// Run identifier to evaluate.
        #[arg(long)]
        load_model: String,
        /// Checkpoint iteration to evaluate instead of the latest.
        #[arg(long)]
        resume_iteration: Option<usize>,
        /// Translation rounds per direction.
        #[arg(long, default_value_t = 20)]
        rounds: usize,
        /// Images per round.
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
    /// List the checkpoints of a run.
    Checkpoints {
        /// Path to the discogan config TOML file.
        #[arg(long, default_value = "configs/discogan.toml")]
        config: PathBuf,
        /// Root directory for model, sample, logs and test outputs.
        #[arg(long, default_value = "runs")]
        output: PathBuf,
        /// Dataset preset or custom name (overrides the TOML).
        #[arg(long)]
        dataset: Option<String>,
        /// Run identifier to inspect.
        #[arg(long)]
        load_model: String,
    },
}

/// Stop `stop` on the first Ctrl-C; the current step finishes before the loop exits.
fn spawn_interrupt_handler(stop: StopToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            stop.stop();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            output,
            dataset,
            load_model,
            resume_iteration,
            iterations,
            batch_size,
            lr,
            beta1,
            beta2,
            print_interval,
            sample_interval,
            save_interval,
            image_size,
            num_workers,
        } => {
            let args = TrainArgs {
                config,
                output,
                load_model,
                resume_iteration,
                overrides: CliOverrides {
                    dataset,
                    batch_size,
                    iterations,
                    learning_rate: lr,
                    beta_1: beta1,
                    beta_2: beta2,
                    print_interval,
                    sample_interval,
                    save_interval,
                    image_size,
                    num_workers,
                },
            };
            let stop = StopToken::new();
            spawn_interrupt_handler(stop.clone());
            tokio::task::spawn_blocking(move || pipeline::run_train(args, stop)).await?
        }
        Command::Eval {
            config,
            output,
            dataset,
            load_model,
            resume_iteration,
            rounds,
            count,
        } => {
            let args = EvalArgs {
                config,
                output,
                load_model,
                resume_iteration,
                dataset,
                rounds,
                count,
            };
            let stop = StopToken::new();
            spawn_interrupt_handler(stop.clone());
            tokio::task::spawn_blocking(move || pipeline::run_eval(args, stop)).await?
        }
        Command::Checkpoints {
            config,
            output,
            dataset,
            load_model,
        } => pipeline::run_checkpoints(CheckpointsArgs {
            config,
            output,
            load_model,
            dataset,
        }),
    }
}
