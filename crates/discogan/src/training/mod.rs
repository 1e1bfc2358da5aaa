//! DiscoGAN training: losses, the four-optimizer joint step, metrics and
//! sample sinks, the checkpoint store, and the solver loop tying them together.

pub mod checkpoint;
pub mod joint;
pub mod loss;
pub mod metrics;
pub mod sample;
pub mod solver;
pub mod state;

pub use checkpoint::{CheckpointError, CheckpointHandle, CheckpointMeta, CheckpointStore};
pub use joint::{JointOptimizer, JointOptimizerConfig};
pub use loss::LossConfig;
pub use metrics::{JsonlMetrics, LossRecord, MetricsSink, StepLosses, TracingMetrics};
pub use sample::{PngGridSink, SampleSink};
pub use solver::{RunOutcome, Solver, SolverConfig, SolverPhase};
pub use state::TrainingState;
