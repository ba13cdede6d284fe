//! Tiered search execution

use super::models::{SearchOptions, SearchOutcome, TierOutcome, TierStatus};
use super::progress::{emit_tier, ProgressCallback, ProgressReporter};
use crate::config::{Settings, TierDefinition};
use crate::error::{Error, ProviderError, Result};
use crate::network::{OverlayNetwork, ReachabilityCheck};
use crate::pipeline::Pipeline;
use crate::providers::{Provider, ProviderRegistry};
use crate::results::SearchResult;
use crate::state::{SearchSession, SessionFlags, SessionHandle, SessionStatus, StateManager};
use futures::stream::{self, StreamExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type DispatchLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// What one tier produced before the pipeline runs
struct TierRun {
    outcome: TierOutcome,
    raw: Vec<SearchResult>,
    /// Providers dispatched now or completed in an earlier run
    ran: bool,
    interrupted: bool,
}

/// Runs tiers in ascending order, providers within a tier concurrently
pub struct Orchestrator {
    tiers: Vec<TierDefinition>,
    registry: Arc<ProviderRegistry>,
    reachability: Arc<dyn ReachabilityCheck>,
    pipeline: Pipeline,
    progress: Option<ProgressCallback>,
    inter_tier_delay: Duration,
    limiter: Option<Arc<DispatchLimiter>>,
    defaults: SearchOptions,
}

impl Orchestrator {
    pub fn new(
        settings: &Settings,
        registry: ProviderRegistry,
        reachability: Arc<dyn ReachabilityCheck>,
    ) -> Result<Self> {
        settings.validate()?;

        let mut tiers = settings.tiers.clone();
        tiers.sort_by_key(|t| t.number);
        for tier in &tiers {
            for id in &tier.providers {
                if !registry.contains(id) {
                    warn!("Tier {} references unknown provider {}", tier.number, id);
                }
            }
        }

        let limiter = settings
            .search
            .dispatch_per_second
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

        Ok(Self {
            tiers,
            registry: Arc::new(registry),
            reachability,
            pipeline: Pipeline::new(settings)?,
            progress: None,
            inter_tier_delay: Duration::from_millis(settings.search.inter_tier_delay_ms),
            limiter,
            defaults: SearchOptions::from_settings(&settings.search),
        })
    }

    /// Receive provider and tier progress events
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Enable or disable the tiers bound to an overlay network
    pub fn with_overlay(mut self, tor: bool, i2p: bool) -> Self {
        for tier in &mut self.tiers {
            match tier.requires_network {
                Some(OverlayNetwork::Tor) => tier.enabled = tor,
                Some(OverlayNetwork::I2p) => tier.enabled = i2p,
                None => {}
            }
        }
        self
    }

    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Options built from the loaded settings
    pub fn default_options(&self) -> SearchOptions {
        self.defaults.clone()
    }

    /// Providers a new session schedules, in tier order
    pub fn scheduled_providers(&self, options: &SearchOptions) -> Vec<String> {
        let mut scheduled: Vec<String> = Vec::new();
        for tier in self.tiers.iter().filter(|t| t.enabled) {
            for id in &tier.providers {
                if options.allows(id) && self.registry.contains(id) && !scheduled.contains(id) {
                    scheduled.push(id.clone());
                }
            }
        }
        scheduled
    }

    /// Overlay flags reflecting the enabled tiers
    pub fn flags(&self) -> SessionFlags {
        let enabled = |network| {
            self.tiers
                .iter()
                .any(|t| t.enabled && t.requires_network == Some(network))
        };
        SessionFlags {
            include_tor: enabled(OverlayNetwork::Tor),
            include_i2p: enabled(OverlayNetwork::I2p),
        }
    }

    /// Run a one-off search with in-memory session state
    pub async fn execute_search(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        self.check_options(options)?;
        let session = SearchSession::new(
            uuid::Uuid::new_v4().to_string(),
            query,
            self.scheduled_providers(options),
            self.flags(),
        );
        let handle = SessionHandle::detached(session);
        handle.start().await?;
        self.run_session(&handle, options, cancel).await
    }

    /// Create and start a persistent session
    pub fn start_session(
        &self,
        manager: Arc<StateManager>,
        session_id: Option<&str>,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SessionHandle> {
        self.check_options(options)?;
        let mut session = manager.create_session(
            session_id,
            query,
            self.scheduled_providers(options),
            self.flags(),
        )?;
        manager.start(&mut session)?;
        Ok(SessionHandle::new(session, manager))
    }

    /// Restore a persistent session from a checkpoint, ready to run
    pub fn resume_session(
        &self,
        manager: Arc<StateManager>,
        session_id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<SessionHandle> {
        let session = manager.resume(session_id, checkpoint_id)?;
        Ok(SessionHandle::new(session, manager))
    }

    /// Drive a session through the remaining tiers
    ///
    /// Tiers already recorded in the session are reused as they are. A
    /// cancelled token pauses the session; in-flight provider calls are
    /// dropped and their results never merged.
    pub async fn run_session(
        &self,
        handle: &SessionHandle,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        self.check_options(options)?;
        match handle.status().await {
            SessionStatus::Running => {}
            SessionStatus::Initialized => handle.start().await?,
            status => {
                return Err(Error::InvalidTransition {
                    from: status,
                    to: SessionStatus::Running,
                })
            }
        }

        match self.run_tiers(handle, options, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Session {} failed: {}", handle.id(), e);
                if let Err(fail_err) = handle.fail(&e.to_string()).await {
                    warn!("Could not mark session {} failed: {}", handle.id(), fail_err);
                }
                Err(e)
            }
        }
    }

    fn check_options(&self, options: &SearchOptions) -> Result<()> {
        if options.parallelism == 0 {
            return Err(Error::Configuration("parallelism must be > 0".into()));
        }
        match &options.providers {
            Some(ids) => self.registry.validate_ids(ids),
            None => Ok(()),
        }
    }

    async fn run_tiers(
        &self,
        handle: &SessionHandle,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome> {
        let snapshot = handle.snapshot().await;
        let query = snapshot.query.clone();
        let mut accumulated = snapshot.final_results.clone();
        let mut outcomes: BTreeMap<u32, TierOutcome> = BTreeMap::new();
        let mut interrupted = false;

        info!(
            "Searching '{}' across {} tiers (session {})",
            query,
            self.tiers.len(),
            handle.id()
        );

        for tier in &self.tiers {
            if !snapshot.tiers.contains_key(&tier.number) {
                self.emit_tier(tier, TierStatus::Pending);
            }
        }

        for (index, tier) in self.tiers.iter().enumerate() {
            if let Some(done) = snapshot.tiers.get(&tier.number) {
                debug!("Tier {} already recorded as {}", tier.number, done.status);
                self.emit_tier(tier, done.status);
                outcomes.insert(tier.number, done.clone());
                continue;
            }

            if !tier.enabled {
                self.skip_tier(tier, "tier disabled", &mut outcomes);
                continue;
            }

            if options.stop_on_results > 0 && accumulated.len() >= options.stop_on_results {
                info!(
                    "Stop condition reached with {} results, skipping remaining tiers",
                    accumulated.len()
                );
                for rest in &self.tiers[index..] {
                    if !snapshot.tiers.contains_key(&rest.number) {
                        self.skip_tier(rest, "stop condition reached", &mut outcomes);
                    }
                }
                break;
            }

            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let run = self.run_tier(tier, handle, &snapshot, options, cancel).await?;
            let mut outcome = run.outcome;

            if run.interrupted {
                self.emit_tier(tier, TierStatus::Pending);
                outcomes.insert(tier.number, outcome);
                interrupted = true;
                break;
            }

            if !run.ran {
                info!("Tier {} ({}) skipped: no available providers", tier.number, tier.name);
                outcome.status = TierStatus::Skipped;
                self.emit_tier(tier, TierStatus::Skipped);
                outcomes.insert(tier.number, outcome);
                continue;
            }

            let output = self
                .pipeline
                .process(&query, std::mem::take(&mut accumulated), run.raw);
            accumulated = output.results.clone();
            self.emit_tier(tier, outcome.status);
            handle.record_tier(outcome.clone(), output).await?;
            outcomes.insert(tier.number, outcome);

            if !self.inter_tier_delay.is_zero() && index + 1 < self.tiers.len() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.inter_tier_delay) => {}
                }
            }
        }

        if interrupted {
            let checkpoint = handle.pause().await?;
            info!(
                "Session {} paused{}",
                handle.id(),
                checkpoint
                    .map(|id| format!(" at checkpoint {id}"))
                    .unwrap_or_default()
            );
        } else {
            handle.complete().await?;
        }

        let session = handle.snapshot().await;
        info!(
            "Search '{}' finished with {} results ({} flagged, {} duplicates removed)",
            query,
            session.final_results.len(),
            session.flagged.len(),
            session.duplicates_removed
        );

        Ok(SearchOutcome {
            session_id: session.session_id,
            query,
            results: session.final_results,
            flagged: session.flagged,
            tiers: outcomes,
            duplicates_removed: session.duplicates_removed,
            interrupted,
        })
    }

    async fn run_tier(
        &self,
        tier: &TierDefinition,
        handle: &SessionHandle,
        snapshot: &SearchSession,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<TierRun> {
        let started = Instant::now();
        let mut outcome = TierOutcome::new(tier.number, &tier.name);
        let mut raw: Vec<SearchResult> = Vec::new();
        handle.enter_tier(tier.number).await?;

        // Providers finished in an earlier run contribute their stored results
        for id in &tier.providers {
            if snapshot.completed.contains(id) {
                if let Some(results) = snapshot.results_by_provider.get(id) {
                    raw.extend(results.iter().cloned());
                }
                outcome.succeeded.push(id.clone());
            } else if snapshot.failed.contains(id) {
                outcome.failed.push(id.clone());
            }
        }
        let seeded = outcome.attempted() > 0;

        let mut available: Vec<Arc<dyn Provider>> = Vec::new();
        for id in &tier.providers {
            if !snapshot.is_pending(id) {
                continue;
            }
            match self.availability(tier, id, options).await {
                Ok(provider) => available.push(provider),
                Err(reason) => {
                    debug!("Skipping {} in tier {}: {}", id, tier.number, reason);
                    ProgressReporter::new(id.as_str(), self.progress.clone()).skipped(&reason);
                    handle.skip_provider(id, &reason).await?;
                    outcome.skipped.insert(id.clone(), reason);
                }
            }
        }

        if available.is_empty() && !seeded {
            return Ok(TierRun {
                outcome,
                raw,
                ran: false,
                interrupted: false,
            });
        }

        info!(
            "Tier {} ({}): dispatching {} providers",
            tier.number,
            tier.name,
            available.len()
        );
        self.emit_tier(tier, TierStatus::Running);

        let deadline = tokio::time::Instant::now() + tier.timeout()?;
        let limit = options.max_results_per_provider;
        let query = snapshot.query.as_str();
        let calls = stream::iter(available.into_iter().map(|provider| {
            let reporter = ProgressReporter::new(provider.id(), self.progress.clone());
            async move {
                if let Some(limiter) = &self.limiter {
                    limiter.until_ready().await;
                }
                reporter.starting(format!("Searching {}", provider.id()));
                let started = Instant::now();
                let result = match timeout_at(deadline, provider.search(query, limit, &reporter)).await
                {
                    Ok(Ok(mut results)) => {
                        results.truncate(limit);
                        Ok(results)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ProviderError::Timeout),
                };
                match &result {
                    Ok(results) => reporter.complete(format!("{} results", results.len())),
                    Err(e) => reporter.error(e.to_string()),
                }
                (provider.id().to_string(), result, started.elapsed())
            }
        }))
        .buffer_unordered(options.parallelism.max(1));
        let mut calls = std::pin::pin!(calls);

        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Tier {} interrupted", tier.number);
                    interrupted = true;
                    break;
                }
                next = calls.next() => {
                    let Some((id, result, elapsed)) = next else { break };
                    outcome.timings.insert(id.clone(), elapsed.as_secs_f64());
                    let result = result.map(|results| {
                        results
                            .into_iter()
                            .map(|r| r.with_tier(tier.number))
                            .collect::<Vec<_>>()
                    });
                    match &result {
                        Ok(results) => {
                            info!("Provider {} returned {} results", id, results.len());
                            raw.extend(results.iter().cloned());
                            outcome.succeeded.push(id.clone());
                        }
                        Err(e) => {
                            warn!("Provider {} failed: {}", id, e);
                            outcome.failed.push(id.clone());
                            outcome.errors.push(format!("{id}: {e}"));
                        }
                    }
                    handle.update_progress(&id, tier.number, result).await?;
                }
            }
        }

        outcome.result_count = raw.len();
        outcome.elapsed_secs = started.elapsed().as_secs_f64();
        if interrupted {
            outcome.status = TierStatus::Pending;
        } else {
            outcome.settle();
            info!(
                "Tier {} ({}) {}: {} results, {} succeeded, {} failed in {:.2}s",
                tier.number,
                tier.name,
                outcome.status,
                outcome.result_count,
                outcome.succeeded.len(),
                outcome.failed.len(),
                outcome.elapsed_secs
            );
        }

        Ok(TierRun {
            outcome,
            raw,
            ran: true,
            interrupted,
        })
    }

    /// The provider to dispatch, or why it cannot run right now
    async fn availability(
        &self,
        tier: &TierDefinition,
        id: &str,
        options: &SearchOptions,
    ) -> std::result::Result<Arc<dyn Provider>, String> {
        if !options.allows(id) {
            return Err("not selected for this search".to_string());
        }
        let Some(provider) = self.registry.get(id) else {
            warn!("Provider {} is not registered", id);
            return Err("provider not registered".to_string());
        };
        if !self.registry.is_enabled(id) {
            return Err("provider disabled".to_string());
        }
        let network = tier.requires_network.or_else(|| self.registry.network_of(id));
        if let Some(network) = network {
            if !self.reachability.is_reachable(network).await {
                return Err(ProviderError::NetworkUnavailable(network.to_string()).to_string());
            }
        }
        Ok(provider.clone())
    }

    fn skip_tier(
        &self,
        tier: &TierDefinition,
        reason: &str,
        outcomes: &mut BTreeMap<u32, TierOutcome>,
    ) {
        debug!("Tier {} ({}) skipped: {}", tier.number, tier.name, reason);
        self.emit_tier(tier, TierStatus::Skipped);
        outcomes.insert(tier.number, TierOutcome::skipped(tier.number, &tier.name, reason));
    }

    fn emit_tier(&self, tier: &TierDefinition, status: TierStatus) {
        emit_tier(self.progress.as_ref(), tier.number, &tier.name, status);
    }
}
