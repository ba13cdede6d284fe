//! TierSearch command line entry point
//!
//! Results are printed to stdout as JSON; logs and progress go to stderr.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tiersearch::{
    config::{self, Settings},
    network::ProxyReachability,
    providers::ProviderLoader,
    search::{ProgressCallback, ProgressEvent},
    Orchestrator, SearchOptions, SearchOutcome, SessionHandle, StateManager,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Tiered metasearch with safety filtering, deduplication and resumable sessions
#[derive(Parser, Debug)]
#[command(name = "tiersearch", version, about)]
#[command(after_help = "ENVIRONMENT VARIABLES:
    TIERSEARCH_SETTINGS_PATH  Path to settings file
    TIERSEARCH_TOR_PROXY      Tor SOCKS proxy URL
    TIERSEARCH_I2P_PROXY      I2P HTTP proxy URL
    RUST_LOG                  Log filter")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run a new search session
    Search {
        /// Query words, joined with spaces
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Include Tor hidden service tiers
        #[arg(long)]
        tor: bool,

        /// Include I2P tiers
        #[arg(long)]
        i2p: bool,

        /// Results requested per provider
        #[arg(long)]
        limit: Option<usize>,

        /// Skip remaining tiers after N results
        #[arg(long)]
        stop: Option<usize>,

        /// Providers in flight per tier
        #[arg(long)]
        parallel: Option<usize>,

        /// Only dispatch these providers
        #[arg(long, value_delimiter = ',')]
        providers: Option<Vec<String>>,

        /// Use this session id
        #[arg(long = "session")]
        session_id: Option<String>,
    },

    /// Continue a paused or interrupted session
    Resume {
        session_id: String,
        /// Checkpoint to resume from (latest when omitted)
        checkpoint_id: Option<String>,
    },

    /// List resumable sessions
    Sessions {
        /// Include finished sessions
        #[arg(long)]
        all: bool,
    },

    /// List a session's checkpoints
    Checkpoints { session_id: String },

    /// Remove a session and its checkpoints
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref())?;
    init_logging(&settings);
    info!("TierSearch v{}", tiersearch::VERSION);

    let manager = Arc::new(StateManager::new(&settings.state)?);

    match cli.command {
        Command::Search {
            query,
            tor,
            i2p,
            limit,
            stop,
            parallel,
            providers,
            session_id,
        } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                bail!("search needs a query");
            }
            let providers = providers.map(|list| {
                list.into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            });

            let orchestrator = build_orchestrator(&settings)?.with_overlay(tor, i2p);
            let mut options = orchestrator.default_options();
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            if let Some(stop) = stop {
                options = options.with_stop_on_results(stop);
            }
            if let Some(parallel) = parallel {
                options = options.with_parallelism(parallel);
            }
            if let Some(providers) = providers {
                options = options.with_providers(providers);
            }

            let handle =
                orchestrator.start_session(manager, session_id.as_deref(), &query, &options)?;
            info!("Session {} started for '{}'", handle.id(), query);
            run(&orchestrator, &handle, &options).await?;
        }
        Command::Resume {
            session_id,
            checkpoint_id,
        } => {
            let orchestrator = build_orchestrator(&settings)?;
            let handle =
                orchestrator.resume_session(manager, &session_id, checkpoint_id.as_deref())?;
            let flags = handle.snapshot().await.flags;
            let orchestrator = orchestrator.with_overlay(flags.include_tor, flags.include_i2p);
            let options = orchestrator.default_options();
            run(&orchestrator, &handle, &options).await?;
        }
        Command::Sessions { all } => {
            let sessions = manager.list_sessions(all)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Command::Checkpoints { session_id } => {
            let checkpoints = manager.list_checkpoints(&session_id)?;
            println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        }
        Command::Delete { session_id } => {
            if manager.delete_session(&session_id)? {
                info!("Deleted session {}", session_id);
            } else {
                bail!("session not found: {}", session_id);
            }
        }
    }

    Ok(())
}

fn init_logging(settings: &Settings) {
    let default_level = if settings.general.debug {
        "debug"
    } else {
        settings.general.log_level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(settings: &Settings) -> Result<Orchestrator> {
    let registry = ProviderLoader::load(settings)?;
    info!("Loaded {} providers", registry.len());

    let reachability = Arc::new(ProxyReachability::new(&settings.outgoing)?);
    let progress: ProgressCallback = Arc::new(|event: &ProgressEvent| match event {
        ProgressEvent::Provider {
            provider_id,
            phase,
            message,
        } => info!("[{}] {}: {}", provider_id, phase, message),
        ProgressEvent::Tier {
            tier_number,
            tier_name,
            status,
        } => info!("Tier {} ({}) {}", tier_number, tier_name, status),
    });

    Ok(Orchestrator::new(settings, registry, reachability)?.with_progress(progress))
}

/// Run a session until it finishes or Ctrl-C pauses it
async fn run(
    orchestrator: &Orchestrator,
    handle: &SessionHandle,
    options: &SearchOptions,
) -> Result<SearchOutcome> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, pausing session");
            on_signal.cancel();
        }
    });

    let outcome = orchestrator.run_session(handle, options, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.interrupted {
        info!(
            "Session {} paused; continue with: tiersearch resume {}",
            outcome.session_id, outcome.session_id
        );
    } else {
        let summary = outcome.summary();
        info!(
            "{} results from {}/{} tiers ({} flagged, {} duplicates removed)",
            outcome.results.len(),
            summary.completed,
            summary.total_tiers,
            outcome.flagged.len(),
            outcome.duplicates_removed
        );
    }
    Ok(outcome)
}
