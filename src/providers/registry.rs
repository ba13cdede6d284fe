//! Provider registry mapping ids to implementations

use super::traits::Provider;
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::network::OverlayNetwork;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of all known providers
pub struct ProviderRegistry {
    /// Providers by id
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Provider configurations
    configs: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            configs: HashMap::new(),
        }
    }

    /// Register a provider under its own id
    pub fn register(&mut self, provider: Arc<dyn Provider>, config: ProviderConfig) {
        let id = provider.id().to_string();
        self.providers.insert(id.clone(), provider);
        self.configs.insert(id, config);
    }

    /// Register a provider with a default config
    pub fn register_default(&mut self, provider: Arc<dyn Provider>) {
        let config = ProviderConfig::new(provider.id(), provider.id());
        self.register(provider, config);
    }

    /// Get a provider by id
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(id)
    }

    /// Get provider config
    pub fn get_config(&self, id: &str) -> Option<&ProviderConfig> {
        self.configs.get(id)
    }

    /// Whether a provider exists and is not disabled
    pub fn is_enabled(&self, id: &str) -> bool {
        self.providers.contains_key(id)
            && self.configs.get(id).map(|c| !c.disabled).unwrap_or(true)
    }

    /// Overlay network a provider needs; config overrides the provider
    pub fn network_of(&self, id: &str) -> Option<OverlayNetwork> {
        self.configs
            .get(id)
            .and_then(|c| c.network)
            .or_else(|| self.providers.get(id).and_then(|p| p.network()))
    }

    /// All enabled providers
    pub fn enabled(&self) -> Vec<&Arc<dyn Provider>> {
        let mut ids: Vec<&String> = self
            .providers
            .keys()
            .filter(|id| self.is_enabled(id))
            .collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.providers.get(id)).collect()
    }

    /// All provider ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a provider exists
    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Reject any id that is not registered
    pub fn validate_ids(&self, ids: &[String]) -> Result<()> {
        match ids.iter().find(|id| !self.contains(id)) {
            Some(unknown) => Err(Error::Configuration(format!(
                "unknown provider: {}",
                unknown
            ))),
            None => Ok(()),
        }
    }

    /// Get number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::results::SearchResult;
    use crate::search::ProgressReporter;
    use async_trait::async_trait;

    struct Onion;

    #[async_trait]
    impl Provider for Onion {
        fn id(&self) -> &str {
            "onion"
        }

        fn network(&self) -> Option<OverlayNetwork> {
            Some(OverlayNetwork::Tor)
        }

        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _progress: &ProgressReporter,
        ) -> std::result::Result<Vec<SearchResult>, ProviderError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_registry() {
        let mut registry = ProviderRegistry::new();
        registry.register_default(Arc::new(Onion));

        assert!(registry.contains("onion"));
        assert!(registry.is_enabled("onion"));
        assert_eq!(registry.network_of("onion"), Some(OverlayNetwork::Tor));
        assert_eq!(registry.ids(), vec!["onion"]);
    }

    #[test]
    fn disabled_config_hides_provider() {
        let mut registry = ProviderRegistry::new();
        let mut config = ProviderConfig::new("onion", "onion");
        config.disabled = true;
        config.network = Some(OverlayNetwork::I2p);
        registry.register(Arc::new(Onion), config);

        assert!(!registry.is_enabled("onion"));
        assert!(registry.enabled().is_empty());
        assert_eq!(registry.network_of("onion"), Some(OverlayNetwork::I2p));
    }

    #[test]
    fn unknown_ids_are_configuration_errors() {
        let mut registry = ProviderRegistry::new();
        registry.register_default(Arc::new(Onion));

        assert!(registry.validate_ids(&["onion".into()]).is_ok());
        let err = registry
            .validate_ids(&["onion".into(), "nope".into()])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("nope")));
    }
}
