//! Tier outcomes and search request/response models

use crate::config::SearchSettings;
use crate::results::SearchResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of one tier within a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierStatus {
    Pending,
    Running,
    Complete,
    Skipped,
    Failed,
}

impl TierStatus {
    /// Whether the tier has reached an outcome that will not change
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for TierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened in one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierOutcome {
    pub number: u32,
    pub name: String,
    pub status: TierStatus,
    /// Raw results collected from the tier's providers
    pub result_count: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Providers that were not dispatched, with the reason
    pub skipped: BTreeMap<String, String>,
    /// Per-provider wall time in seconds
    pub timings: BTreeMap<String, f64>,
    pub elapsed_secs: f64,
    pub errors: Vec<String>,
}

impl TierOutcome {
    pub fn new(number: u32, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            status: TierStatus::Pending,
            result_count: 0,
            succeeded: vec![],
            failed: vec![],
            skipped: BTreeMap::new(),
            timings: BTreeMap::new(),
            elapsed_secs: 0.0,
            errors: vec![],
        }
    }

    /// A tier that never dispatched anything
    pub fn skipped(number: u32, name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(number, name);
        outcome.status = TierStatus::Skipped;
        outcome.errors.push(reason.into());
        outcome
    }

    /// Derive the final status from the provider lists
    pub fn settle(&mut self) {
        self.status = if !self.succeeded.is_empty() {
            TierStatus::Complete
        } else if !self.failed.is_empty() {
            TierStatus::Failed
        } else {
            TierStatus::Skipped
        };
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Totals across all tiers of a search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierSummary {
    pub total_tiers: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub raw_results: usize,
    pub providers_succeeded: usize,
    pub providers_failed: usize,
    pub elapsed_secs: f64,
}

impl TierSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a TierOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.total_tiers += 1;
            match outcome.status {
                TierStatus::Complete => summary.completed += 1,
                TierStatus::Skipped => summary.skipped += 1,
                TierStatus::Failed => summary.failed += 1,
                TierStatus::Pending | TierStatus::Running => {}
            }
            summary.raw_results += outcome.result_count;
            summary.providers_succeeded += outcome.succeeded.len();
            summary.providers_failed += outcome.failed.len();
            summary.elapsed_secs += outcome.elapsed_secs;
        }
        summary
    }
}

/// Per-request search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub max_results_per_provider: usize,
    /// Skip remaining tiers once this many results are accumulated (0 = never)
    pub stop_on_results: usize,
    /// Providers in flight at once within a tier
    pub parallelism: usize,
    /// Restrict dispatch to these provider ids
    pub providers: Option<Vec<String>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_settings(&SearchSettings::default())
    }
}

impl SearchOptions {
    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self {
            max_results_per_provider: settings.max_results_per_provider,
            stop_on_results: settings.stop_on_results,
            parallelism: settings.parallelism,
            providers: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.max_results_per_provider = limit;
        self
    }

    pub fn with_stop_on_results(mut self, count: usize) -> Self {
        self.stop_on_results = count;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Whether the caller allows this provider to run
    pub fn allows(&self, provider_id: &str) -> bool {
        self.providers
            .as_ref()
            .map(|list| list.iter().any(|p| p == provider_id))
            .unwrap_or(true)
    }
}

/// Final product of a search run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub session_id: String,
    pub query: String,
    /// Safe, deduplicated results, best first
    pub results: Vec<SearchResult>,
    /// Results rejected by the safety filter, kept for audit
    pub flagged: Vec<SearchResult>,
    pub tiers: BTreeMap<u32, TierOutcome>,
    pub duplicates_removed: usize,
    /// The run stopped early on a pause request
    pub interrupted: bool,
}

impl SearchOutcome {
    pub fn summary(&self) -> TierSummary {
        TierSummary::from_outcomes(self.tiers.values())
    }

    pub fn tier(&self, number: u32) -> Option<&TierOutcome> {
        self.tiers.get(&number)
    }
}
