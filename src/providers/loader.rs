//! Provider loader for building adapters from configuration

use super::registry::ProviderRegistry;
use super::traits::Provider;
use super::{ahmia, duckduckgo, wikipedia};
use crate::config::{OutgoingSettings, ProviderConfig, Settings};
use crate::network::{HttpClient, OverlayNetwork};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Loader for initializing providers from configuration
pub struct ProviderLoader;

/// HTTP clients shared by every adapter built in one load
struct ClientPool<'a> {
    outgoing: &'a OutgoingSettings,
    clearnet: HttpClient,
    overlay: HashMap<OverlayNetwork, HttpClient>,
}

impl<'a> ClientPool<'a> {
    fn new(outgoing: &'a OutgoingSettings) -> Result<Self> {
        Ok(Self {
            outgoing,
            clearnet: HttpClient::with_settings(outgoing)?,
            overlay: HashMap::new(),
        })
    }

    fn client_for(&mut self, network: Option<OverlayNetwork>) -> Result<HttpClient> {
        let Some(network) = network else {
            return Ok(self.clearnet.clone());
        };
        if let Some(client) = self.overlay.get(&network) {
            return Ok(client.clone());
        }
        let client = HttpClient::for_overlay(self.outgoing, network)?;
        self.overlay.insert(network, client.clone());
        Ok(client)
    }
}

impl ProviderLoader {
    /// Load all configured providers
    ///
    /// Disabled providers are still registered so tiers can report them as
    /// unavailable; unknown kinds are logged and left out.
    pub fn load(settings: &Settings) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        let mut clients = ClientPool::new(&settings.outgoing)?;

        for config in &settings.providers {
            match Self::create_provider(config, &mut clients) {
                Ok(provider) => {
                    if config.disabled {
                        info!("Registered disabled provider: {}", config.id);
                    } else {
                        info!("Loaded provider: {} ({})", config.id, config.kind);
                    }
                    registry.register(provider, config.clone());
                }
                Err(e) => {
                    warn!("Failed to load provider {}: {}", config.id, e);
                }
            }
        }

        info!("Loaded {} providers", registry.len());
        Ok(registry)
    }

    /// Create a provider instance by kind
    fn create_provider(
        config: &ProviderConfig,
        clients: &mut ClientPool<'_>,
    ) -> Result<Arc<dyn Provider>> {
        let provider: Arc<dyn Provider> = match config.kind.as_str() {
            "wikipedia" => {
                let client = clients.client_for(config.network)?;
                let url = config
                    .base_url
                    .as_deref()
                    .unwrap_or(wikipedia::Wikipedia::DEFAULT_API_URL);
                Arc::new(wikipedia::Wikipedia::with_api_url(client, url).with_id(&config.id))
            }
            "duckduckgo" => {
                let client = clients.client_for(config.network)?;
                let url = config
                    .base_url
                    .as_deref()
                    .unwrap_or(duckduckgo::DuckDuckGo::DEFAULT_HTML_URL);
                Arc::new(duckduckgo::DuckDuckGo::with_html_url(client, url).with_id(&config.id))
            }
            "ahmia" => {
                let url = config
                    .base_url
                    .as_deref()
                    .unwrap_or(ahmia::Ahmia::DEFAULT_SEARCH_URL);
                let network = config
                    .network
                    .or_else(|| ahmia::is_onion(url).then_some(OverlayNetwork::Tor));
                let client = clients.client_for(network)?;
                Arc::new(
                    ahmia::Ahmia::with_search_url(client, url)
                        .with_network(network)
                        .with_id(&config.id),
                )
            }
            _ => {
                return Err(anyhow::anyhow!("Unknown provider kind: {}", config.kind));
            }
        };

        Ok(provider)
    }

    /// Get list of available provider kinds
    pub fn available_kinds() -> Vec<&'static str> {
        vec!["wikipedia", "duckduckgo", "ahmia"]
    }
}
