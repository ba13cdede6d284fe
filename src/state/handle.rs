//! Shared, serialized access to one live session

use super::manager::{apply_tier, ProgressUpdate, StateManager};
use super::session::{SearchSession, SessionStatus};
use crate::error::{ProviderError, Result};
use crate::pipeline::PipelineOutput;
use crate::results::SearchResult;
use crate::search::TierOutcome;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The single point through which a running search mutates its session
///
/// Concurrent provider completions each take the lock, apply their update
/// and (when persistent) write metadata or a checkpoint before releasing it,
/// so a checkpoint never observes a half-applied update.
///
/// A detached handle has no [`StateManager`]: the same state machine runs
/// in memory and nothing is written to disk.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    session: Arc<Mutex<SearchSession>>,
    manager: Option<Arc<StateManager>>,
}

impl SessionHandle {
    pub fn new(session: SearchSession, manager: Arc<StateManager>) -> Self {
        Self {
            session_id: session.session_id.clone(),
            session: Arc::new(Mutex::new(session)),
            manager: Some(manager),
        }
    }

    pub fn detached(session: SearchSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            session: Arc::new(Mutex::new(session)),
            manager: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn is_persistent(&self) -> bool {
        self.manager.is_some()
    }

    /// Copy of the current session state
    pub async fn snapshot(&self) -> SearchSession {
        self.session.lock().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.session.lock().await.status
    }

    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.start(&mut session),
            None => session.transition(SessionStatus::Running),
        }
    }

    pub async fn update_progress(
        &self,
        provider_id: &str,
        tier: u32,
        outcome: std::result::Result<Vec<SearchResult>, ProviderError>,
    ) -> Result<ProgressUpdate> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.update_progress(&mut session, provider_id, tier, outcome),
            None => Ok(ProgressUpdate {
                accepted: session.apply_update(provider_id, tier, outcome),
                checkpoint: None,
            }),
        }
    }

    pub async fn skip_provider(&self, provider_id: &str, reason: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.skip_provider(&mut session, provider_id, reason),
            None => {
                if session.is_pending(provider_id) {
                    session
                        .skipped
                        .insert(provider_id.to_string(), reason.to_string());
                }
                Ok(())
            }
        }
    }

    pub async fn enter_tier(&self, tier: u32) -> Result<()> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.enter_tier(&mut session, tier),
            None => {
                session.current_tier = tier;
                Ok(())
            }
        }
    }

    pub async fn record_tier(&self, outcome: TierOutcome, output: PipelineOutput) -> Result<()> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.record_tier(&mut session, outcome, output),
            None => {
                apply_tier(&mut session, outcome, output);
                Ok(())
            }
        }
    }

    /// Returns the pause checkpoint id when persistent
    pub async fn pause(&self) -> Result<Option<String>> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.pause(&mut session).map(Some),
            None => session.transition(SessionStatus::Paused).map(|_| None),
        }
    }

    pub async fn complete(&self) -> Result<Option<String>> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.complete(&mut session).map(Some),
            None => session.transition(SessionStatus::Completed).map(|_| None),
        }
    }

    pub async fn fail(&self, reason: &str) -> Result<Option<String>> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.fail(&mut session, reason).map(Some),
            None => {
                session.transition(SessionStatus::Failed)?;
                let tier = session.current_tier;
                session.log_error("system", Some(tier), reason);
                Ok(None)
            }
        }
    }

    pub async fn cancel(&self) -> Result<Option<String>> {
        let mut session = self.session.lock().await;
        match &self.manager {
            Some(manager) => manager.cancel(&mut session).map(Some),
            None => session.transition(SessionStatus::Cancelled).map(|_| None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateSettings;
    use crate::state::SessionFlags;

    fn session(providers: &[&str]) -> SearchSession {
        SearchSession::new(
            "h1",
            "query",
            providers.iter().map(|p| p.to_string()).collect(),
            SessionFlags::default(),
        )
    }

    #[tokio::test]
    async fn concurrent_updates_are_serialized() {
        let ids: Vec<String> = (0..32).map(|i| format!("p{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let handle = SessionHandle::detached(session(&refs));
        handle.start().await.unwrap();

        let mut tasks = Vec::new();
        for id in ids.clone() {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let hit = SearchResult::new(format!("https://{id}.example/"), id.clone(), id.clone());
                handle.update_progress(&id, 1, Ok(vec![hit])).await.unwrap()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().accepted);
        }

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.completed.len(), 32);
        assert_eq!(snapshot.results.len(), 32);
        assert!(snapshot.pending.is_empty());
        assert!(snapshot.sets_consistent());
        assert_eq!(snapshot.progress, 1.0);
    }

    #[tokio::test]
    async fn persistent_handle_checkpoints_on_pause() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(
            StateManager::new(&StateSettings {
                sessions_dir: dir.path().to_path_buf(),
                auto_checkpoint: false,
                checkpoint_interval: 3,
            })
            .unwrap(),
        );
        let s = manager
            .create_session(Some("h2"), "q", vec!["a".into(), "b".into()], SessionFlags::default())
            .unwrap();
        let handle = SessionHandle::new(s, manager.clone());
        assert!(handle.is_persistent());

        handle.start().await.unwrap();
        handle.enter_tier(1).await.unwrap();
        handle.update_progress("a", 1, Ok(vec![])).await.unwrap();
        let checkpoint = handle.pause().await.unwrap().unwrap();

        let update = handle.update_progress("b", 1, Ok(vec![])).await.unwrap();
        assert!(!update.accepted);

        let restored = manager.load_checkpoint("h2", &checkpoint).unwrap();
        assert_eq!(restored.status, SessionStatus::Paused);
        assert_eq!(restored.completed, vec!["a"]);
        assert_eq!(restored.pending, vec!["b"]);
    }

    #[tokio::test]
    async fn detached_handle_runs_the_same_state_machine() {
        let handle = SessionHandle::detached(session(&["a"]));
        assert!(handle.complete().await.is_err());
        handle.start().await.unwrap();
        assert_eq!(handle.pause().await.unwrap(), None);
        assert_eq!(handle.status().await, SessionStatus::Paused);
        assert_eq!(handle.cancel().await.unwrap(), None);
        assert_eq!(handle.status().await, SessionStatus::Cancelled);
    }
}
