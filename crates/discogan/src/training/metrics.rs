//! Loss values, running averages with health checks, and the sinks that
//! receive periodic loss reports.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// The four objectives after one joint step.
///
/// `g` and `f` include the full cycle-consistency term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepLosses {
    pub g: f64,
    pub dy: f64,
    pub f: f64,
    pub dx: f64,
}

impl StepLosses {
    pub fn is_finite(&self) -> bool {
        self.g.is_finite() && self.dy.is_finite() && self.f.is_finite() && self.dx.is_finite()
    }

    /// Check for degenerate training. Returns warning messages (empty = healthy).
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, value) in [("G", self.g), ("Dy", self.dy), ("F", self.f), ("Dx", self.dx)] {
            if !value.is_finite() {
                warnings.push(format!("{name} loss is {value}"));
            }
        }
        for (name, value) in [("Dy", self.dy), ("Dx", self.dx)] {
            if value.is_finite() && value < COLLAPSE_THRESHOLD {
                warnings.push(format!(
                    "{name} loss {value:.2e} below {COLLAPSE_THRESHOLD:.0e}: discriminator separates real and fake perfectly"
                ));
            }
        }
        warnings
    }
}

/// Discriminator losses below this mean its generator gets no gradient signal.
const COLLAPSE_THRESHOLD: f64 = 1e-3;

/// Mean of the losses seen since the last reset.
#[derive(Debug, Clone, Default)]
pub struct LossAverage {
    g: f64,
    dy: f64,
    f: f64,
    dx: f64,
    count: usize,
}

impl LossAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, losses: &StepLosses) {
        self.g += losses.g;
        self.dy += losses.dy;
        self.f += losses.f;
        self.dx += losses.dx;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<StepLosses> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(StepLosses {
            g: self.g / n,
            dy: self.dy / n,
            f: self.f / n,
            dx: self.dx / n,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// One periodic loss report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub iteration: usize,
    pub target_iterations: usize,
    pub batch_size: usize,
    pub dataset: String,
    /// Losses of this iteration's step.
    pub losses: StepLosses,
    /// Mean since the previous report.
    pub average: StepLosses,
    pub elapsed_secs: f64,
}

impl LossRecord {
    /// Seconds left at the current pace, given the iteration training started from.
    pub fn eta_secs(&self, start_iteration: usize) -> f64 {
        let done = self.iteration.saturating_sub(start_iteration) + 1;
        let remaining = self.target_iterations.saturating_sub(self.iteration + 1);
        self.elapsed_secs * remaining as f64 / done as f64
    }
}

/// Receives loss reports at the print interval.
///
/// Errors are logged by the caller and never stop training.
pub trait MetricsSink {
    fn record(&mut self, record: &LossRecord) -> anyhow::Result<()>;
}

/// Emits each report as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingMetrics {
    start_iteration: usize,
}

impl TracingMetrics {
    pub fn new(start_iteration: usize) -> Self {
        Self { start_iteration }
    }
}

impl MetricsSink for TracingMetrics {
    fn record(&mut self, record: &LossRecord) -> anyhow::Result<()> {
        let eta = format_duration(record.eta_secs(self.start_iteration));
        tracing::info!(
            iteration = record.iteration,
            target = record.target_iterations,
            batch_size = record.batch_size,
            dataset = %record.dataset,
            g_loss = format!("{:.4}", record.losses.g),
            dy_loss = format!("{:.4}", record.losses.dy),
            f_loss = format!("{:.4}", record.losses.f),
            dx_loss = format!("{:.4}", record.losses.dx),
            eta,
            "avg G={:.4} Dy={:.4} F={:.4} Dx={:.4}",
            record.average.g,
            record.average.dy,
            record.average.f,
            record.average.dx,
        );
        Ok(())
    }
}

/// Appends each report as one JSON line.
pub struct JsonlMetrics {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlMetrics {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open loss log {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlMetrics {
    fn record(&mut self, record: &LossRecord) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Human-readable duration: `42s`, `17m`, `3.2h`.
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{secs:.0}s")
    } else if secs < 3600.0 {
        format!("{:.0}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn losses(g: f64, dy: f64, f: f64, dx: f64) -> StepLosses {
        StepLosses { g, dy, f, dx }
    }

    fn record(iteration: usize) -> LossRecord {
        LossRecord {
            iteration,
            target_iterations: 100,
            batch_size: 4,
            dataset: "edges2shoes".to_string(),
            losses: losses(1.0, 0.7, 1.2, 0.6),
            average: losses(1.1, 0.7, 1.3, 0.6),
            elapsed_secs: 10.0,
        }
    }

    #[test]
    fn test_health_check_healthy() {
        assert!(losses(3.0, 0.69, 2.5, 0.7).health_check().is_empty());
    }

    #[test]
    fn test_health_check_non_finite() {
        let warnings = losses(f64::NAN, 0.7, f64::INFINITY, 0.7).health_check();
        assert_eq!(warnings.len(), 2, "got {warnings:?}");
        assert!(warnings[0].starts_with("G loss"));
        assert!(warnings[1].starts_with("F loss"));
    }

    #[test]
    fn test_health_check_collapsed_discriminator() {
        let warnings = losses(20.0, 1e-5, 2.0, 0.5).health_check();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Dy"), "got {warnings:?}");
    }

    #[test]
    fn test_loss_average() {
        let mut avg = LossAverage::new();
        assert!(avg.mean().is_none());
        avg.update(&losses(1.0, 2.0, 3.0, 4.0));
        avg.update(&losses(3.0, 4.0, 5.0, 6.0));
        assert_eq!(avg.count(), 2);
        assert_eq!(avg.mean().unwrap(), losses(2.0, 3.0, 4.0, 5.0));
        avg.reset();
        assert_eq!(avg.count(), 0);
    }

    #[test]
    fn test_eta() {
        // 10 iterations done in 10s, 90 remaining.
        let eta = record(9).eta_secs(0);
        assert!((eta - 90.0).abs() < 1e-9, "got {eta}");
        // Resumed at 5: 5 iterations in 10s.
        let eta = record(9).eta_secs(5);
        assert!((eta - 180.0).abs() < 1e-9, "got {eta}");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(600.0), "10m");
        assert_eq!(format_duration(7200.0), "2.0h");
    }

    #[test]
    fn test_jsonl_appends_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("logs/losses.jsonl");

        let mut sink = JsonlMetrics::open(&path).unwrap();
        sink.record(&record(0)).unwrap();
        sink.record(&record(50)).unwrap();
        drop(sink);

        // Reopening appends rather than truncating.
        let mut sink = JsonlMetrics::open(&path).unwrap();
        sink.record(&record(100)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<LossRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], record(50));
        assert_eq!(parsed[2].iteration, 100);
    }
}
