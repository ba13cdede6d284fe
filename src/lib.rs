//! TierSearch: a tiered metasearch orchestrator
//!
//! Providers are grouped into priority tiers and queried tier by tier.
//! Every tier's results pass through safety filtering, deduplication and
//! relevance ranking, and the running session can be checkpointed to disk
//! and resumed later.

pub mod config;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod providers;
pub mod results;
pub mod search;
pub mod state;

pub use config::Settings;
pub use error::{Error, ProviderError, Result};
pub use pipeline::Pipeline;
pub use providers::{Provider, ProviderRegistry};
pub use results::SearchResult;
pub use search::{Orchestrator, SearchOptions, SearchOutcome};
pub use state::{SessionHandle, SessionStatus, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
