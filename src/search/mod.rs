//! Search orchestration module
//!
//! Runs provider tiers in priority order, feeds each tier through the
//! result pipeline and reports progress along the way.

mod models;
mod orchestrator;
mod progress;

pub use models::*;
pub use orchestrator::Orchestrator;
pub use progress::{ProgressCallback, ProgressEvent, ProgressReporter, ProviderPhase};
