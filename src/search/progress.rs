//! Progress events emitted while a search runs

use super::models::TierStatus;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Phase of a single provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPhase {
    Starting,
    Parsing,
    Progress,
    Complete,
    Error,
    Skipped,
}

impl fmt::Display for ProviderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Parsing => "parsing",
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A discrete progress notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProgressEvent {
    Provider {
        provider_id: String,
        phase: ProviderPhase,
        message: String,
    },
    Tier {
        tier_number: u32,
        tier_name: String,
        status: TierStatus,
    },
}

/// Caller supplied sink for progress events
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Emits provider events on behalf of one provider
#[derive(Clone)]
pub struct ProgressReporter {
    provider_id: String,
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(provider_id: impl Into<String>, callback: Option<ProgressCallback>) -> Self {
        Self {
            provider_id: provider_id.into(),
            callback,
        }
    }

    /// Reporter that drops every event
    pub fn silent(provider_id: impl Into<String>) -> Self {
        Self::new(provider_id, None)
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn emit(&self, phase: ProviderPhase, message: impl Into<String>) {
        if let Some(callback) = &self.callback {
            callback(&ProgressEvent::Provider {
                provider_id: self.provider_id.clone(),
                phase,
                message: message.into(),
            });
        }
    }

    pub fn starting(&self, message: impl Into<String>) {
        self.emit(ProviderPhase::Starting, message);
    }

    pub fn parsing(&self, message: impl Into<String>) {
        self.emit(ProviderPhase::Parsing, message);
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.emit(ProviderPhase::Progress, message);
    }

    pub fn complete(&self, message: impl Into<String>) {
        self.emit(ProviderPhase::Complete, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProviderPhase::Error, message);
    }

    pub fn skipped(&self, message: impl Into<String>) {
        self.emit(ProviderPhase::Skipped, message);
    }
}

/// Emit a tier transition through an optional callback
pub(crate) fn emit_tier(
    callback: Option<&ProgressCallback>,
    tier_number: u32,
    tier_name: &str,
    status: TierStatus,
) {
    if let Some(callback) = callback {
        callback(&ProgressEvent::Tier {
            tier_number,
            tier_name: tier_name.to_string(),
            status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reporter_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        let reporter = ProgressReporter::new("wikipedia", Some(callback.clone()));
        reporter.parsing("Parsing results");
        emit_tier(Some(&callback), 2, "Archives", TierStatus::Running);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ProgressEvent::Provider {
                provider_id: "wikipedia".into(),
                phase: ProviderPhase::Parsing,
                message: "Parsing results".into(),
            }
        );
        assert!(matches!(
            events[1],
            ProgressEvent::Tier { tier_number: 2, status: TierStatus::Running, .. }
        ));
    }

    #[test]
    fn silent_reporter_is_noop() {
        ProgressReporter::silent("x").error("ignored");
    }
}
