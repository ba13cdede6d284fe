//! Session lifecycle, persistence and checkpoints

use super::session::{SearchSession, SessionFlags, SessionMetadata, SessionStatus};
use super::store::{is_valid_id, CheckpointInfo, SessionStore};
use crate::config::StateSettings;
use crate::error::{Error, ProviderError, Result};
use crate::pipeline::PipelineOutput;
use crate::results::SearchResult;
use crate::search::TierOutcome;
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of merging one provider outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// False when the session was not running or the provider not pending
    pub accepted: bool,
    /// Id of the auto-checkpoint this update triggered
    pub checkpoint: Option<String>,
}

/// Owns session persistence and the checkpoint policy
///
/// Every mutating method persists `state.json` before returning; terminal
/// transitions and pauses also write a labeled checkpoint.
#[derive(Debug, Clone)]
pub struct StateManager {
    store: SessionStore,
    auto_checkpoint: bool,
    checkpoint_interval: usize,
}

impl StateManager {
    pub fn new(settings: &StateSettings) -> Result<Self> {
        Ok(Self {
            store: SessionStore::new(&settings.sessions_dir)?,
            auto_checkpoint: settings.auto_checkpoint,
            checkpoint_interval: settings.checkpoint_interval.max(1),
        })
    }

    pub fn sessions_dir(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Allocate a session in `Initialized` and persist its metadata
    ///
    /// Without an explicit id a random UUID is used.
    pub fn create_session(
        &self,
        session_id: Option<&str>,
        query: &str,
        providers: Vec<String>,
        flags: SessionFlags,
    ) -> Result<SearchSession> {
        let session_id = match session_id {
            Some(id) if !is_valid_id(id) => {
                return Err(Error::Configuration(format!("invalid session id: {id:?}")));
            }
            Some(id) if self.store.exists(id) => {
                return Err(Error::Configuration(format!("session {id} already exists")));
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let session = SearchSession::new(session_id, query, providers, flags);
        self.store.prepare(&session.session_id)?;
        self.save_metadata(&session)?;
        info!(
            "Created session {} for {:?} ({} providers)",
            session.session_id,
            session.query,
            session.scheduled.len()
        );
        Ok(session)
    }

    /// `Initialized -> Running`
    pub fn start(&self, session: &mut SearchSession) -> Result<()> {
        session.transition(SessionStatus::Running)?;
        self.save_metadata(session)?;
        info!("Session {} running", session.session_id);
        Ok(())
    }

    pub fn save_metadata(&self, session: &SearchSession) -> Result<()> {
        self.store.write_metadata(&session.summary())
    }

    /// Write an immutable snapshot of the session
    ///
    /// The new id is part of the snapshot itself. If writing fails the id is
    /// removed again and the session is left as it was.
    pub fn checkpoint(&self, session: &mut SearchSession, label: &str) -> Result<String> {
        let label = sanitize_label(label);
        let checkpoint_id = format!(
            "{}_{:04}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            session.checkpoints.len() + 1,
            label
        );

        session.checkpoints.push(checkpoint_id.clone());
        if let Err(e) = self.store.write_checkpoint(session, &checkpoint_id, &label) {
            session.checkpoints.pop();
            warn!("Checkpoint {} failed: {}", checkpoint_id, e);
            return Err(e);
        }
        self.save_metadata(session)?;

        debug!(
            "Checkpoint {} written for session {}",
            checkpoint_id, session.session_id
        );
        Ok(checkpoint_id)
    }

    /// Persisted metadata, for listing and inspection
    pub fn load_session(&self, session_id: &str) -> Result<SessionMetadata> {
        self.store.read_metadata(session_id)
    }

    /// Full snapshot, for resuming
    pub fn load_checkpoint(&self, session_id: &str, checkpoint_id: &str) -> Result<SearchSession> {
        if !self.store.exists(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        Ok(self.store.read_checkpoint(session_id, checkpoint_id)?.session)
    }

    pub fn latest_checkpoint(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.store.checkpoint_ids(session_id)?.pop())
    }

    /// `Running -> Paused`, followed by a `paused_tier<N>` checkpoint
    pub fn pause(&self, session: &mut SearchSession) -> Result<String> {
        session.transition(SessionStatus::Paused)?;
        let label = format!("paused_tier{}", session.current_tier);
        let checkpoint_id = self.checkpoint(session, &label)?;
        info!(
            "Session {} paused at tier {} ({}/{} providers done)",
            session.session_id,
            session.current_tier,
            session.completed.len() + session.failed.len(),
            session.scheduled.len()
        );
        Ok(checkpoint_id)
    }

    /// Restore a snapshot and set it running again
    ///
    /// Uses the latest checkpoint when none is given. Providers that already
    /// completed or failed are not scheduled again.
    pub fn resume(&self, session_id: &str, checkpoint_id: Option<&str>) -> Result<SearchSession> {
        if !self.store.exists(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        let checkpoint_id = match checkpoint_id {
            Some(id) => id.to_string(),
            None => self
                .latest_checkpoint(session_id)?
                .ok_or_else(|| Error::CheckpointNotFound {
                    session_id: session_id.to_string(),
                    checkpoint_id: "latest".to_string(),
                })?,
        };

        let mut session = self.load_checkpoint(session_id, &checkpoint_id)?;
        if !session.status.is_resumable() {
            return Err(Error::InvalidTransition {
                from: session.status,
                to: SessionStatus::Running,
            });
        }

        session.restore_pending();
        if session.started_at.is_none() {
            session.started_at = Some(Utc::now());
        } else {
            session.resumed_at = Some(Utc::now());
        }
        session.status = SessionStatus::Running;
        self.save_metadata(&session)?;

        info!(
            "Resumed session {} from {} ({} providers pending)",
            session_id,
            checkpoint_id,
            session.pending.len()
        );
        Ok(session)
    }

    /// Merge one provider's outcome, auto-checkpointing on cadence
    pub fn update_progress(
        &self,
        session: &mut SearchSession,
        provider_id: &str,
        tier: u32,
        outcome: std::result::Result<Vec<SearchResult>, ProviderError>,
    ) -> Result<ProgressUpdate> {
        let succeeded = outcome.is_ok();
        if !session.apply_update(provider_id, tier, outcome) {
            debug!(
                "Ignored update from {} (session {}, provider pending: {})",
                provider_id,
                session.status,
                session.is_pending(provider_id)
            );
            return Ok(ProgressUpdate {
                accepted: false,
                checkpoint: None,
            });
        }

        let due = self.auto_checkpoint
            && succeeded
            && session.completed.len() % self.checkpoint_interval == 0;
        let checkpoint = if due {
            let label = format!("auto_tier{}", tier);
            Some(self.checkpoint(session, &label)?)
        } else {
            self.save_metadata(session)?;
            None
        };

        Ok(ProgressUpdate {
            accepted: true,
            checkpoint,
        })
    }

    /// Record why a provider was not dispatched; it stays pending
    pub fn skip_provider(
        &self,
        session: &mut SearchSession,
        provider_id: &str,
        reason: &str,
    ) -> Result<()> {
        if session.is_pending(provider_id) {
            session
                .skipped
                .insert(provider_id.to_string(), reason.to_string());
            self.save_metadata(session)?;
        }
        Ok(())
    }

    pub fn enter_tier(&self, session: &mut SearchSession, tier: u32) -> Result<()> {
        session.current_tier = tier;
        self.save_metadata(session)
    }

    /// Store a finished tier and the pipeline output it produced
    pub fn record_tier(
        &self,
        session: &mut SearchSession,
        outcome: TierOutcome,
        output: PipelineOutput,
    ) -> Result<()> {
        apply_tier(session, outcome, output);
        self.save_metadata(session)
    }

    /// `-> Completed`, followed by a `final` checkpoint
    pub fn complete(&self, session: &mut SearchSession) -> Result<String> {
        session.transition(SessionStatus::Completed)?;
        let checkpoint_id = self.checkpoint(session, "final")?;
        info!(
            "Session {} completed with {} results",
            session.session_id,
            session.final_results.len()
        );
        Ok(checkpoint_id)
    }

    /// `-> Failed`, logging the reason, followed by a `failed` checkpoint
    pub fn fail(&self, session: &mut SearchSession, reason: &str) -> Result<String> {
        session.transition(SessionStatus::Failed)?;
        session.log_error("system", Some(session.current_tier), reason);
        let checkpoint_id = self.checkpoint(session, "failed")?;
        warn!("Session {} failed: {}", session.session_id, reason);
        Ok(checkpoint_id)
    }

    /// `-> Cancelled`, followed by a `cancelled` checkpoint
    pub fn cancel(&self, session: &mut SearchSession) -> Result<String> {
        session.transition(SessionStatus::Cancelled)?;
        let checkpoint_id = self.checkpoint(session, "cancelled")?;
        info!("Session {} cancelled", session.session_id);
        Ok(checkpoint_id)
    }

    /// Every readable session, newest first
    pub fn list_sessions(&self, include_completed: bool) -> Result<Vec<SessionMetadata>> {
        let mut sessions = Vec::new();
        for id in self.store.session_ids()? {
            match self.store.read_metadata(&id) {
                Ok(meta) => {
                    if include_completed || meta.status != SessionStatus::Completed {
                        sessions.push(meta);
                    }
                }
                Err(e) => warn!("Skipping unreadable session {}: {}", id, e),
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Sessions in a state a resume can continue from
    pub fn resumable_sessions(&self) -> Result<Vec<SessionMetadata>> {
        Ok(self
            .list_sessions(false)?
            .into_iter()
            .filter(|s| s.status.is_resumable())
            .collect())
    }

    /// Checkpoints of a session, newest first
    pub fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>> {
        let mut infos = self.store.checkpoint_infos(session_id)?;
        infos.reverse();
        Ok(infos)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let deleted = self.store.delete(session_id)?;
        if deleted {
            info!("Deleted session {}", session_id);
        }
        Ok(deleted)
    }
}

/// In-memory half of `record_tier`
pub(crate) fn apply_tier(session: &mut SearchSession, outcome: TierOutcome, output: PipelineOutput) {
    session.current_tier = outcome.number;
    session.tiers.insert(outcome.number, outcome);
    session.final_results = output.results;
    session.flagged.extend(output.flagged);
    session.duplicates_removed += output.duplicates_removed;
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "checkpoint".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::TierStatus;

    fn manager(dir: &tempfile::TempDir) -> StateManager {
        StateManager::new(&StateSettings {
            sessions_dir: dir.path().join("sessions"),
            auto_checkpoint: true,
            checkpoint_interval: 3,
        })
        .unwrap()
    }

    fn providers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|p| p.to_string()).collect()
    }

    fn hits(provider: &str, n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| SearchResult::new(format!("https://{provider}.example/{i}"), format!("{provider} {i}"), provider))
            .collect()
    }

    #[test]
    fn create_persists_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let session = mgr
            .create_session(Some("s1"), "rust", providers(&["a", "b"]), SessionFlags::default())
            .unwrap();

        let meta = mgr.load_session("s1").unwrap();
        assert_eq!(meta.status, SessionStatus::Initialized);
        assert_eq!(meta.pending, session.pending);

        assert!(matches!(
            mgr.create_session(Some("s1"), "again", vec![], SessionFlags::default()),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            mgr.create_session(Some("../x"), "bad", vec![], SessionFlags::default()),
            Err(Error::Configuration(_))
        ));

        let generated = mgr
            .create_session(None, "q", vec![], SessionFlags::default())
            .unwrap();
        assert!(uuid::Uuid::parse_str(&generated.session_id).is_ok());
    }

    #[test]
    fn unknown_session_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        assert!(matches!(mgr.load_session("nope"), Err(Error::SessionNotFound(_))));
        assert!(matches!(mgr.resume("nope", None), Err(Error::SessionNotFound(_))));

        mgr.create_session(Some("s1"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        assert!(matches!(
            mgr.resume("s1", None),
            Err(Error::CheckpointNotFound { .. })
        ));
        assert!(matches!(
            mgr.load_checkpoint("s1", "missing"),
            Err(Error::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn auto_checkpoint_every_third_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut s = mgr
            .create_session(Some("s1"), "q", providers(&["a", "b", "c", "d"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut s).unwrap();

        let u1 = mgr.update_progress(&mut s, "a", 1, Ok(hits("a", 1))).unwrap();
        let u2 = mgr.update_progress(&mut s, "d", 1, Err(ProviderError::Timeout)).unwrap();
        let u3 = mgr.update_progress(&mut s, "b", 1, Ok(hits("b", 1))).unwrap();
        let u4 = mgr.update_progress(&mut s, "c", 1, Ok(hits("c", 1))).unwrap();
        assert!(u1.accepted && u2.accepted && u3.accepted && u4.accepted);
        assert!(u1.checkpoint.is_none() && u2.checkpoint.is_none() && u3.checkpoint.is_none());
        let auto = u4.checkpoint.unwrap();
        assert!(auto.ends_with("_auto_tier1"));
        assert_eq!(s.checkpoints, vec![auto.clone()]);

        let snapshot = mgr.load_checkpoint("s1", &auto).unwrap();
        assert_eq!(snapshot.completed.len(), 3);
        assert_eq!(snapshot.checkpoints, vec![auto]);

        let rejected = mgr.update_progress(&mut s, "c", 1, Ok(vec![])).unwrap();
        assert!(!rejected.accepted);
    }

    #[test]
    fn pause_resume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = StateSettings {
            sessions_dir: dir.path().join("sessions"),
            auto_checkpoint: false,
            checkpoint_interval: 3,
        };
        let mgr = StateManager::new(&settings).unwrap();
        let mut s = mgr
            .create_session(
                Some("round"),
                "tiered search",
                providers(&["a", "b", "c", "d", "e"]),
                SessionFlags::default(),
            )
            .unwrap();
        mgr.start(&mut s).unwrap();
        for p in ["a", "b", "c"] {
            assert!(mgr.update_progress(&mut s, p, 1, Ok(hits(p, 2))).unwrap().accepted);
        }
        let before_pause = s.clone();

        let paused_id = mgr.pause(&mut s).unwrap();
        assert!(paused_id.ends_with("_paused_tier1"));
        assert_eq!(mgr.load_session("round").unwrap().status, SessionStatus::Paused);

        // a paused session accepts nothing
        assert!(!mgr.update_progress(&mut s, "d", 1, Ok(vec![])).unwrap().accepted);

        // a different manager instance on the same directory
        settings.auto_checkpoint = true;
        let resumed = StateManager::new(&settings).unwrap().resume("round", None).unwrap();

        assert_eq!(resumed.status, SessionStatus::Running);
        assert_eq!(resumed.completed.len(), 3);
        assert_eq!(resumed.completed, before_pause.completed);
        assert_eq!(resumed.pending, before_pause.pending);
        assert_eq!(resumed.failed, before_pause.failed);
        assert_eq!(resumed.results, before_pause.results);
        assert_eq!(resumed.results_by_provider, before_pause.results_by_provider);
        assert_eq!(resumed.progress, before_pause.progress);
        assert_eq!(resumed.query, before_pause.query);
        assert!(resumed.resumed_at.is_some());
        assert!(resumed.sets_consistent());
        assert_eq!(mgr.load_session("round").unwrap().status, SessionStatus::Running);
    }

    #[test]
    fn terminal_checkpoints_are_not_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut s = mgr
            .create_session(Some("done"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut s).unwrap();
        mgr.update_progress(&mut s, "a", 1, Ok(hits("a", 1))).unwrap();

        let mut outcome = TierOutcome::new(1, "Web");
        outcome.succeeded.push("a".into());
        outcome.settle();
        mgr.record_tier(
            &mut s,
            outcome,
            PipelineOutput {
                results: hits("a", 1),
                flagged: vec![],
                duplicates_removed: 0,
            },
        )
        .unwrap();
        assert_eq!(s.tiers[&1].status, TierStatus::Complete);

        let final_id = mgr.complete(&mut s).unwrap();
        assert!(final_id.ends_with("_final"));
        assert!(matches!(
            mgr.resume("done", Some(&final_id)),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(mgr.cancel(&mut s).is_err());
    }

    #[test]
    fn fail_and_cancel_write_labeled_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let mut failing = mgr
            .create_session(Some("f"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut failing).unwrap();
        let id = mgr.fail(&mut failing, "disk on fire").unwrap();
        assert!(id.ends_with("_failed"));
        assert_eq!(failing.error_log.last().unwrap().provider, "system");

        let mut paused = mgr
            .create_session(Some("c"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut paused).unwrap();
        mgr.pause(&mut paused).unwrap();
        let id = mgr.cancel(&mut paused).unwrap();
        assert!(id.ends_with("_cancelled"));

        let checkpoints = mgr.list_checkpoints("c").unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].label, "cancelled");
        assert_eq!(checkpoints[1].label, "paused_tier0");
    }

    #[test]
    fn listing_and_deleting_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);

        let mut done = mgr
            .create_session(Some("done"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut done).unwrap();
        mgr.complete(&mut done).unwrap();

        let mut paused = mgr
            .create_session(Some("paused"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut paused).unwrap();
        mgr.pause(&mut paused).unwrap();

        let mut failed = mgr
            .create_session(Some("failed"), "q", providers(&["a"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut failed).unwrap();
        mgr.fail(&mut failed, "boom").unwrap();

        assert_eq!(mgr.list_sessions(true).unwrap().len(), 3);
        assert_eq!(mgr.list_sessions(false).unwrap().len(), 2);
        let resumable: Vec<_> = mgr
            .resumable_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(resumable, vec!["paused"]);

        assert!(mgr.delete_session("paused").unwrap());
        assert!(matches!(mgr.load_session("paused"), Err(Error::SessionNotFound(_))));
        assert!(!mgr.delete_session("paused").unwrap());
    }

    #[test]
    fn skipped_providers_stay_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir);
        let mut s = mgr
            .create_session(Some("s"), "q", providers(&["web", "onion"]), SessionFlags::default())
            .unwrap();
        mgr.start(&mut s).unwrap();
        mgr.skip_provider(&mut s, "onion", "tor unreachable").unwrap();
        assert!(s.is_pending("onion"));
        assert_eq!(s.skipped["onion"], "tor unreachable");
        assert!(s.sets_consistent());
    }

    #[test]
    fn labels_are_path_safe() {
        assert_eq!(sanitize_label("paused tier/2"), "paused-tier-2");
        assert_eq!(sanitize_label(""), "checkpoint");
    }
}
