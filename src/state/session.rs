//! Session model and its state machine

use crate::error::{Error, ProviderError, Result};
use crate::results::SearchResult;
use crate::search::TierOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of a search session
///
/// ```text
/// Initialized -> Running -> Paused -> Running
///                        -> Completed | Failed | Cancelled
///                          Paused -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initialized, Running | Failed | Cancelled)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States a checkpoint can be resumed from
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Initialized | Self::Running | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overlay networks the caller opted into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFlags {
    pub include_tor: bool,
    pub include_i2p: bool,
}

/// One failure recorded for later audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// Provider id, or `system` for session-level faults
    pub provider: String,
    pub tier: Option<u32>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Full mutable state of one search
///
/// `pending`, `completed` and `failed` partition `scheduled`. A provider
/// that is unavailable in a run stays pending (with a reason in `skipped`)
/// so a later resume can try it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSession {
    pub session_id: String,
    pub query: String,
    pub normalized_query: String,
    #[serde(default)]
    pub flags: SessionFlags,
    pub status: SessionStatus,
    pub current_tier: u32,
    pub current_provider: Option<String>,
    /// Share of scheduled providers that reached an outcome, in [0, 1]
    pub progress: f64,

    /// Raw results of every provider, in completion order
    pub results: Vec<SearchResult>,
    pub results_by_provider: BTreeMap<String, Vec<SearchResult>>,
    /// Pipeline output accumulated over the finished tiers
    pub final_results: Vec<SearchResult>,
    pub flagged: Vec<SearchResult>,
    pub duplicates_removed: usize,
    pub tiers: BTreeMap<u32, TierOutcome>,

    pub scheduled: Vec<String>,
    pub pending: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub checkpoints: Vec<String>,
    pub error_log: Vec<ErrorLogEntry>,
}

impl SearchSession {
    pub fn new(
        session_id: impl Into<String>,
        query: impl Into<String>,
        providers: Vec<String>,
        flags: SessionFlags,
    ) -> Self {
        let query = query.into();
        let mut scheduled: Vec<String> = Vec::with_capacity(providers.len());
        for provider in providers {
            if !scheduled.contains(&provider) {
                scheduled.push(provider);
            }
        }
        Self {
            session_id: session_id.into(),
            normalized_query: normalize_query(&query),
            query,
            flags,
            status: SessionStatus::Initialized,
            current_tier: 0,
            current_provider: None,
            progress: 0.0,
            results: vec![],
            results_by_provider: BTreeMap::new(),
            final_results: vec![],
            flagged: vec![],
            duplicates_removed: 0,
            tiers: BTreeMap::new(),
            pending: scheduled.clone(),
            scheduled,
            completed: vec![],
            failed: vec![],
            skipped: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            resumed_at: None,
            completed_at: None,
            checkpoints: vec![],
            error_log: vec![],
        }
    }

    /// Move to `next`, stamping the matching timestamp
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            SessionStatus::Running if self.started_at.is_none() => self.started_at = Some(now),
            SessionStatus::Running => self.resumed_at = Some(now),
            SessionStatus::Paused => self.paused_at = Some(now),
            SessionStatus::Completed => {
                self.completed_at = Some(now);
                self.progress = 1.0;
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn is_pending(&self, provider_id: &str) -> bool {
        self.pending.iter().any(|p| p == provider_id)
    }

    /// Merge one provider's outcome
    ///
    /// Returns `false` (and changes nothing) unless the session is running
    /// and the provider is still pending.
    pub fn apply_update(
        &mut self,
        provider_id: &str,
        tier: u32,
        outcome: std::result::Result<Vec<SearchResult>, ProviderError>,
    ) -> bool {
        if self.status != SessionStatus::Running || !self.is_pending(provider_id) {
            return false;
        }

        self.pending.retain(|p| p != provider_id);
        self.current_provider = Some(provider_id.to_string());
        self.current_tier = tier;

        match outcome {
            Ok(results) => {
                self.results.extend(results.iter().cloned());
                self.results_by_provider
                    .entry(provider_id.to_string())
                    .or_default()
                    .extend(results);
                self.completed.push(provider_id.to_string());
            }
            Err(err) => {
                self.log_error(provider_id, Some(tier), err.to_string());
                self.failed.push(provider_id.to_string());
            }
        }
        self.skipped.remove(provider_id);
        self.recompute_progress();
        true
    }

    pub fn log_error(&mut self, provider: &str, tier: Option<u32>, error: impl Into<String>) {
        self.error_log.push(ErrorLogEntry {
            provider: provider.to_string(),
            tier,
            error: error.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn recompute_progress(&mut self) {
        self.progress = if self.scheduled.is_empty() {
            0.0
        } else {
            (self.completed.len() + self.failed.len()) as f64 / self.scheduled.len() as f64
        };
    }

    /// Rebuild `pending` as scheduled minus completed minus failed
    pub fn restore_pending(&mut self) {
        self.pending = self
            .scheduled
            .iter()
            .filter(|p| !self.completed.contains(p) && !self.failed.contains(p))
            .cloned()
            .collect();
    }

    /// Whether the provider sets still partition the scheduled set
    pub fn sets_consistent(&self) -> bool {
        let mut seen: Vec<&String> = self
            .pending
            .iter()
            .chain(&self.completed)
            .chain(&self.failed)
            .collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        if seen.len() != total {
            return false;
        }
        let mut scheduled: Vec<&String> = self.scheduled.iter().collect();
        scheduled.sort();
        scheduled.dedup();
        seen == scheduled
    }

    pub fn summary(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.session_id.clone(),
            query: self.query.clone(),
            normalized_query: self.normalized_query.clone(),
            flags: self.flags,
            status: self.status,
            current_tier: self.current_tier,
            progress: self.progress,
            result_count: self.results.len(),
            final_result_count: self.final_results.len(),
            scheduled: self.scheduled.clone(),
            pending: self.pending.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            skipped: self.skipped.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            paused_at: self.paused_at,
            resumed_at: self.resumed_at,
            completed_at: self.completed_at,
            checkpoints: self.checkpoints.clone(),
            error_log: self.error_log.clone(),
        }
    }
}

/// Lowercase and collapse whitespace
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lightweight view of a session persisted as `state.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub query: String,
    pub normalized_query: String,
    #[serde(default)]
    pub flags: SessionFlags,
    pub status: SessionStatus,
    pub current_tier: u32,
    pub progress: f64,
    pub result_count: usize,
    pub final_result_count: usize,
    pub scheduled: Vec<String>,
    pub pending: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    #[serde(default)]
    pub skipped: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub checkpoints: Vec<String>,
    #[serde(default)]
    pub error_log: Vec<ErrorLogEntry>,
}
