//! Settings structures for TierSearch configuration

use crate::error::{Error, Result as CrateResult};
use crate::network::OverlayNetwork;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main settings structure, loaded once and passed to each component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub search: SearchSettings,
    pub tiers: Vec<TierDefinition>,
    pub providers: Vec<ProviderConfig>,
    pub ranking: RankingWeights,
    pub dedup: DedupSettings,
    pub safety: SafetySettings,
    pub state: StateSettings,
    pub outgoing: OutgoingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            search: SearchSettings::default(),
            tiers: default_tiers(),
            providers: default_providers(),
            ranking: RankingWeights::default(),
            dedup: DedupSettings::default(),
            safety: SafetySettings::default(),
            state: StateSettings::default(),
            outgoing: OutgoingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Merge with environment variables (TIERSEARCH_* prefix)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("TIERSEARCH_DEBUG") {
            self.general.debug = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("TIERSEARCH_SESSIONS_DIR") {
            self.state.sessions_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TIERSEARCH_PARALLELISM") {
            if let Ok(n) = val.parse() {
                self.search.parallelism = n;
            }
        }
        if let Ok(val) = std::env::var("TIERSEARCH_TOR_PROXY") {
            self.outgoing.tor_proxy = val;
        }
        if let Ok(val) = std::env::var("TIERSEARCH_I2P_PROXY") {
            self.outgoing.i2p_proxy = val;
        }
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> CrateResult<()> {
        let mut numbers = HashSet::new();
        let mut owners: HashMap<&str, u32> = HashMap::new();
        for tier in &self.tiers {
            for id in &tier.providers {
                if let Some(other) = owners.insert(id.as_str(), tier.number) {
                    return Err(Error::Configuration(format!(
                        "provider {} is listed in tiers {} and {}",
                        id, other, tier.number
                    )));
                }
            }
            if !numbers.insert(tier.number) {
                return Err(Error::Configuration(format!(
                    "duplicate tier number {}",
                    tier.number
                )));
            }
            tier.timeout()?;
        }
        self.outgoing.request_timeout()?;
        self.outgoing.connect_timeout()?;
        if self.search.parallelism == 0 {
            return Err(Error::Configuration("parallelism must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return Err(Error::Configuration(
                "dedup threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.safety.min_score) {
            return Err(Error::Configuration(
                "safety min_score must be within [0, 1]".into(),
            ));
        }
        if self.state.auto_checkpoint && self.state.checkpoint_interval == 0 {
            return Err(Error::Configuration(
                "checkpoint_interval must be > 0 when auto_checkpoint is on".into(),
            ));
        }
        self.ranking.normalized()?;
        Ok(())
    }

    /// Get provider config by id
    pub fn get_provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Get a tier by its number
    pub fn get_tier(&self, number: u32) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.number == number)
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Enable debug logging
    pub debug: bool,
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

/// Search dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Results requested from each provider
    pub max_results_per_provider: usize,
    /// Skip remaining tiers once this many results are collected (0 = never)
    pub stop_on_results: usize,
    /// Providers in flight at once within a tier
    pub parallelism: usize,
    /// Pause between tiers, in milliseconds
    pub inter_tier_delay_ms: u64,
    /// Optional cap on provider dispatches per second
    pub dispatch_per_second: Option<u32>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results_per_provider: 30,
            stop_on_results: 0,
            parallelism: 3,
            inter_tier_delay_ms: 0,
            dispatch_per_second: None,
        }
    }
}

/// A priority group of providers executed together
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierDefinition {
    /// Display name
    pub name: String,
    /// Priority; lower numbers run first
    pub number: u32,
    /// Provider ids in this tier
    pub providers: Vec<String>,
    /// Deadline for the whole tier, in seconds
    pub timeout_secs: f64,
    pub enabled: bool,
    /// Overlay network every provider in this tier needs
    pub requires_network: Option<OverlayNetwork>,
}

impl Default for TierDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            number: 0,
            providers: vec![],
            timeout_secs: 60.0,
            enabled: true,
            requires_network: None,
        }
    }
}

impl TierDefinition {
    pub fn new(number: u32, name: impl Into<String>, providers: &[&str]) -> Self {
        Self {
            name: name.into(),
            number,
            providers: providers.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_network(mut self, network: OverlayNetwork) -> Self {
        self.requires_network = Some(network);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout(&self) -> CrateResult<Duration> {
        timeout_from_secs(&format!("tier {} timeout", self.number), self.timeout_secs)
    }
}

/// Longest timeout any setting accepts, in seconds
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Convert a configured number of seconds into a `Duration`
///
/// Rejects zero, negative, non-finite and over-long values.
pub fn timeout_from_secs(what: &str, secs: f64) -> CrateResult<Duration> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_TIMEOUT_SECS {
        return Err(Error::Configuration(format!(
            "{} must be within (0, {}] seconds, got {}",
            what, MAX_TIMEOUT_SECS, secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| Error::Configuration(format!("{}: {}", what, e)))
}

/// Individual provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider id (unique identifier, referenced by tiers)
    pub id: String,
    /// Adapter to use
    pub kind: String,
    /// Whether the provider is disabled
    pub disabled: bool,
    /// Override of the adapter's base URL
    pub base_url: Option<String>,
    /// Override of the adapter's network requirement
    pub network: Option<OverlayNetwork>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: String::new(),
            disabled: false,
            base_url: None,
            network: None,
        }
    }
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }
}

/// Weights of the seven ranking factors
///
/// Any positive numbers are accepted; they are normalized to sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingWeights {
    pub source_authority: f64,
    pub keyword_density: f64,
    pub keyword_proximity: f64,
    pub title_match: f64,
    pub domain_relevance: f64,
    pub content_freshness: f64,
    pub content_quality: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            source_authority: 25.0,
            keyword_density: 15.0,
            keyword_proximity: 10.0,
            title_match: 20.0,
            domain_relevance: 10.0,
            content_freshness: 10.0,
            content_quality: 10.0,
        }
    }
}

impl RankingWeights {
    fn as_array(&self) -> [(&'static str, f64); 7] {
        [
            ("source_authority", self.source_authority),
            ("keyword_density", self.keyword_density),
            ("keyword_proximity", self.keyword_proximity),
            ("title_match", self.title_match),
            ("domain_relevance", self.domain_relevance),
            ("content_freshness", self.content_freshness),
            ("content_quality", self.content_quality),
        ]
    }

    /// Scale the weights so they sum to 1
    pub fn normalized(&self) -> CrateResult<Self> {
        for (name, weight) in self.as_array() {
            if !(weight.is_finite() && weight > 0.0) {
                return Err(Error::Configuration(format!(
                    "ranking weight {name} must be a positive number, got {weight}"
                )));
            }
        }
        let total: f64 = self.as_array().iter().map(|(_, w)| w).sum();
        Ok(Self {
            source_authority: self.source_authority / total,
            keyword_density: self.keyword_density / total,
            keyword_proximity: self.keyword_proximity / total,
            title_match: self.title_match / total,
            domain_relevance: self.domain_relevance / total,
            content_freshness: self.content_freshness / total,
            content_quality: self.content_quality / total,
        })
    }
}

/// How duplicates are detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    UrlOnly,
    ContentOnly,
    #[default]
    UrlAndContent,
}

/// Deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// Similarity at which two results count as near-duplicates
    pub threshold: f64,
    pub method: DedupMethod,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            method: DedupMethod::default(),
        }
    }
}

/// Safety filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub enabled: bool,
    /// Plain text blacklist, one domain or URL per line, `#` comments
    pub blacklist_file: Option<PathBuf>,
    /// Extra blacklist entries
    pub blacklist: Vec<String>,
    /// Domains that always pass
    pub whitelist: Vec<String>,
    /// Minimum combined score a result needs to be kept
    pub min_score: f64,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            blacklist_file: None,
            blacklist: vec![],
            whitelist: vec![],
            min_score: 0.3,
        }
    }
}

/// Session persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Root directory holding one sub-directory per session
    pub sessions_dir: PathBuf,
    pub auto_checkpoint: bool,
    /// Checkpoint after every N providers move to completed
    pub checkpoint_interval: usize,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            sessions_dir: dirs::data_dir()
                .map(|d| d.join("tiersearch").join("sessions"))
                .unwrap_or_else(|| PathBuf::from("sessions")),
            auto_checkpoint: true,
            checkpoint_interval: 3,
        }
    }
}

/// Outgoing request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingSettings {
    /// Default request timeout in seconds
    pub request_timeout: f64,
    /// Verify SSL certificates
    pub verify_ssl: bool,
    /// Proxy for clearnet traffic
    pub proxy: Option<String>,
    /// Tor SOCKS proxy
    pub tor_proxy: String,
    /// I2P HTTP proxy
    pub i2p_proxy: String,
    /// Connect timeout of the overlay reachability check
    pub connect_timeout_secs: f64,
    /// How long a reachability answer is reused
    pub reachability_cache_secs: u64,
}

impl Default for OutgoingSettings {
    fn default() -> Self {
        Self {
            request_timeout: 30.0,
            verify_ssl: true,
            proxy: None,
            tor_proxy: "socks5h://127.0.0.1:9050".to_string(),
            i2p_proxy: "http://127.0.0.1:4444".to_string(),
            connect_timeout_secs: 5.0,
            reachability_cache_secs: 60,
        }
    }
}

impl OutgoingSettings {
    pub fn request_timeout(&self) -> CrateResult<Duration> {
        timeout_from_secs("request_timeout", self.request_timeout)
    }

    pub fn connect_timeout(&self) -> CrateResult<Duration> {
        timeout_from_secs("connect_timeout_secs", self.connect_timeout_secs)
    }

    /// Proxy URL for an overlay network
    pub fn overlay_proxy(&self, network: OverlayNetwork) -> &str {
        match network {
            OverlayNetwork::Tor => &self.tor_proxy,
            OverlayNetwork::I2p => &self.i2p_proxy,
        }
    }
}

/// Default tier layout
fn default_tiers() -> Vec<TierDefinition> {
    vec![
        TierDefinition::new(1, "Major Search Engines", &["duckduckgo"])
            .with_timeout(Duration::from_secs(60)),
        TierDefinition::new(2, "Specialized & Archives", &["wikipedia"])
            .with_timeout(Duration::from_secs(120)),
        TierDefinition::new(3, "Tor Hidden Services", &["ahmia"])
            .with_timeout(Duration::from_secs(300))
            .with_network(OverlayNetwork::Tor)
            .disabled(),
    ]
}

/// Default provider configurations
fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("duckduckgo", "duckduckgo"),
        ProviderConfig::new("wikipedia", "wikipedia"),
        ProviderConfig::new("ahmia", "ahmia"),
    ]
}
