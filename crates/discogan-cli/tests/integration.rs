//! End-to-end tests for the `discogan` binary.
//!
//! Each test writes a tiny image dataset and config into a temp directory and
//! runs the real binary on it, with networks shrunk to two base filters at
//! 16x16 grayscale so a full train/resume/eval cycle takes seconds.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

fn discogan(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_discogan"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to spawn discogan binary")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "discogan failed\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Write `count` 32x16 side-by-side images with a per-image gradient.
fn write_images(dir: &Path, count: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let img = RgbImage::from_fn(32, 16, |x, y| {
            let v = ((x * 7 + y * 3 + i as u32 * 40) % 256) as u8;
            Rgb([v, v / 2, 255 - v])
        });
        img.save(dir.join(format!("{i:03}.png"))).unwrap();
    }
}

struct Fixture {
    _tmp: TempDir,
    config: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let x_dir = tmp.path().join("data/x");
        let y_dir = tmp.path().join("data/y");
        write_images(&x_dir, 4);
        write_images(&y_dir, 3);
        Self::with_dirs(tmp, &x_dir, &y_dir)
    }

    fn with_dirs(tmp: TempDir, x_dir: &Path, y_dir: &Path) -> Self {
        let config = tmp.path().join("discogan.toml");
        let toml = format!(
            r#"
[dataset]
name = "toy"
image_size = 16
channels = 1
x_dir = {x:?}
y_dir = {y:?}
x_side = "left"
y_side = "right"

[train]
batch_size = 2
iterations = 3
print_interval = 1
sample_interval = 2
save_interval = 2
sample_batch = 2
final_sample_count = 2

[model]
generator_filters = 2
discriminator_filters = 2

[loader]
num_workers = 1
queue_capacity = 2
seed = 5
"#,
            x = x_dir.display().to_string(),
            y = y_dir.display().to_string(),
        );
        std::fs::write(&config, toml).unwrap();
        let output = tmp.path().join("runs");
        Self {
            _tmp: tmp,
            config,
            output,
        }
    }

    fn config(&self) -> &str {
        self.config.to_str().unwrap()
    }

    fn output(&self) -> &str {
        self.output.to_str().unwrap()
    }

    fn dataset_dir(&self, kind: &str) -> PathBuf {
        self.output.join("toy").join(kind)
    }

    fn only_run(&self) -> String {
        let runs: Vec<String> = std::fs::read_dir(self.dataset_dir("model"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(runs.len(), 1, "expected exactly one run, got {runs:?}");
        runs.into_iter().next().unwrap()
    }

    fn loss_log(&self, run: &str) -> Vec<serde_json::Value> {
        let text = std::fs::read_to_string(self.dataset_dir("logs").join(run).join("losses.jsonl")).unwrap();
        text.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }
}

fn checkpoint_iterations(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Train, resume, evaluate, list
// ---------------------------------------------------------------------------

#[test]
fn test_train_resume_eval_and_list() {
    let fx = Fixture::new();

    // Fresh run: 3 iterations, save at 1, final at 3.
    let out = discogan(&["train", "--config", fx.config(), "--output", fx.output()]);
    assert_success(&out);
    assert!(stdout(&out).contains("Completed: 3 iterations"), "stdout: {}", stdout(&out));

    let run = fx.only_run();
    let model_dir = fx.dataset_dir("model").join(&run);
    assert_eq!(checkpoint_iterations(&model_dir), vec!["iter_00000001", "iter_00000003"]);

    let sample_dir = fx.dataset_dir("sample").join(&run);
    for name in ["sample_0.png", "sample_2.png", "final_3_x2y_0.png", "final_3_y2x_0.png"] {
        assert!(sample_dir.join(name).is_file(), "{name} missing");
    }

    let log = fx.loss_log(&run);
    assert_eq!(log.len(), 3, "one loss line per iteration");
    assert_eq!(log[2]["iteration"], 2);
    assert_eq!(log[2]["dataset"], "toy");
    assert!(log[2]["losses"]["g"].as_f64().unwrap().is_finite());

    // Resume the same run to 5 iterations.
    let out = discogan(&[
        "train", "--config", fx.config(), "--output", fx.output(), "--load-model", &run, "--iterations", "5",
    ]);
    assert_success(&out);
    assert!(stdout(&out).contains("Completed: 5 iterations"), "stdout: {}", stdout(&out));
    assert!(stdout(&out).contains("Trained: 2 iterations"), "resume must continue from 3");

    let log = fx.loss_log(&run);
    assert_eq!(log.len(), 5, "loss log is appended, not replaced");
    assert_eq!(log[3]["iteration"], 3);
    assert_eq!(log[4]["iteration"], 4);

    // Evaluate: 2 rounds of 2 images per direction.
    let out = discogan(&[
        "eval", "--config", fx.config(), "--output", fx.output(), "--load-model", &run, "--rounds", "2",
        "--count", "2",
    ]);
    assert_success(&out);
    let test_dir = fx.dataset_dir("test").join(&run);
    for name in ["test_x2y_0.png", "test_y2x_0.png", "test_x2y_1.png", "test_y2x_1.png"] {
        assert!(test_dir.join(name).is_file(), "{name} missing");
    }
    let grid = image::open(test_dir.join("test_x2y_0.png")).unwrap();
    assert_eq!((grid.width(), grid.height()), (3 * 18 + 2, 2 * 18 + 2));

    // List checkpoints.
    let out = discogan(&["checkpoints", "--config", fx.config(), "--output", fx.output(), "--load-model", &run]);
    assert_success(&out);
    let text = stdout(&out);
    let lines: Vec<&str> = text.lines().filter(|l| l.starts_with("iteration")).collect();
    assert_eq!(lines.len(), 3, "checkpoints 1, 3 and 5 expected:\n{text}");
    assert!(lines[2].contains('5') && lines[2].contains("G="), "unexpected line: {}", lines[2]);
}

// ---------------------------------------------------------------------------
// Resume edge cases
// ---------------------------------------------------------------------------

#[test]
fn test_missing_resume_iteration_is_fatal() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dataset_dir("model").join("nope")).unwrap();
    let out = discogan(&[
        "train", "--config", fx.config(), "--output", fx.output(), "--load-model", "nope",
        "--resume-iteration", "7",
    ]);
    assert!(!out.status.success(), "a missing requested checkpoint must fail");
    assert!(stderr(&out).contains("iteration 7"), "stderr: {}", stderr(&out));
}

#[test]
fn test_load_model_without_checkpoint_starts_fresh() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.dataset_dir("model").join("empty-run")).unwrap();
    let out = discogan(&[
        "train", "--config", fx.config(), "--output", fx.output(), "--load-model", "empty-run", "--iterations",
        "1",
    ]);
    assert_success(&out);
    assert!(stdout(&out).contains("Trained: 1 iterations"), "stdout: {}", stdout(&out));
    assert!(fx.dataset_dir("model").join("empty-run/iter_00000001").is_dir());
}

#[test]
fn test_load_model_unknown_run_fails() {
    let fx = Fixture::new();
    let out = discogan(&["train", "--config", fx.config(), "--output", fx.output(), "--load-model", "typo-run"]);
    assert!(!out.status.success(), "resuming a run that does not exist must fail");
    assert!(stderr(&out).contains("typo-run"), "stderr: {}", stderr(&out));
    assert!(
        !fx.dataset_dir("model").join("typo-run").exists(),
        "no run directory is created for an unknown run"
    );
}

// ---------------------------------------------------------------------------
// Startup failures
// ---------------------------------------------------------------------------

#[test]
fn test_missing_data_directory_fails_before_training() {
    let tmp = TempDir::new().unwrap();
    let x_dir = tmp.path().join("data/x");
    write_images(&x_dir, 2);
    let y_dir = tmp.path().join("data/missing");
    let fx = Fixture::with_dirs(tmp, &x_dir, &y_dir);

    let out = discogan(&["train", "--config", fx.config(), "--output", fx.output()]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("does not exist"), "stderr: {}", stderr(&out));
    assert!(!fx.dataset_dir("model").exists(), "no run directory for a run that never started");
}

#[test]
fn test_eval_unknown_run_fails() {
    let fx = Fixture::new();
    let out = discogan(&["eval", "--config", fx.config(), "--output", fx.output(), "--load-model", "ghost"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("ghost"), "stderr: {}", stderr(&out));
}

#[test]
fn test_eval_rejects_zero_count() {
    let fx = Fixture::new();
    let out = discogan(&[
        "eval", "--config", fx.config(), "--output", fx.output(), "--load-model", "any", "--count", "0",
    ]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("count must be positive"), "stderr: {}", stderr(&out));
}

#[test]
fn test_checkpoints_unknown_run_fails() {
    let fx = Fixture::new();
    let out = discogan(&["checkpoints", "--config", fx.config(), "--output", fx.output(), "--load-model", "ghost"]);
    assert!(!out.status.success());
}
