//! Provider capability trait

use crate::error::ProviderError;
use crate::network::OverlayNetwork;
use crate::results::SearchResult;
use crate::search::ProgressReporter;
use async_trait::async_trait;

/// A search source the orchestrator can dispatch to
///
/// Implementations hold their own HTTP collaborator; there is no shared
/// base type. Errors stay isolated to the call that produced them.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id, referenced by tier definitions
    fn id(&self) -> &str;

    /// Short description of the provider
    fn about(&self) -> ProviderAbout {
        ProviderAbout::default()
    }

    /// Overlay network this provider can only be reached through
    fn network(&self) -> Option<OverlayNetwork> {
        None
    }

    /// Run a query and return at most `max_results` raw results
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        progress: &ProgressReporter,
    ) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Provider metadata
#[derive(Debug, Clone, Default)]
pub struct ProviderAbout {
    /// Website URL
    pub website: Option<String>,
    /// Whether it uses the official API
    pub use_official_api: bool,
    /// Result format (HTML, JSON)
    pub results: String,
}

impl ProviderAbout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn website(mut self, url: impl Into<String>) -> Self {
        self.website = Some(url.into());
        self
    }

    pub fn official_api(mut self, uses: bool) -> Self {
        self.use_official_api = uses;
        self
    }

    pub fn results_format(mut self, format: impl Into<String>) -> Self {
        self.results = format.into();
        self
    }
}
