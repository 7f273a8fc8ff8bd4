//! Summaries of finished jobs
//!
//! `result.json` is built from the files a workflow leaves in the project's `output/` directory,
//! `run_stats.json` from the engine's job metadata.

/// Per-category result layouts
pub mod outputs;
/// Call timings from engine metadata
pub mod stats;

pub use outputs::write_result;
pub use stats::write_run_stats;
