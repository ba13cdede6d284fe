//! Wikipedia provider (MediaWiki search API)

use super::traits::*;
use crate::error::ProviderError;
use crate::network::HttpClient;
use crate::results::SearchResult;
use crate::search::ProgressReporter;
use async_trait::async_trait;
use scraper::Html;

/// Wikipedia search provider
pub struct Wikipedia {
    id: String,
    client: HttpClient,
    api_url: String,
}

impl Wikipedia {
    pub const DEFAULT_API_URL: &'static str = "https://en.wikipedia.org/w/api.php";

    pub fn new(client: HttpClient) -> Self {
        Self::with_api_url(client, Self::DEFAULT_API_URL)
    }

    pub fn with_api_url(client: HttpClient, api_url: impl Into<String>) -> Self {
        Self {
            id: "wikipedia".to_string(),
            client,
            api_url: api_url.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// `https://en.wikipedia.org/w/api.php` -> `https://en.wikipedia.org/wiki/Title`
    fn article_url(&self, title: &str) -> String {
        let site = self.api_url.trim_end_matches("/w/api.php");
        format!(
            "{}/wiki/{}",
            site,
            urlencoding::encode(&title.replace(' ', "_"))
        )
    }

    fn parse_results(
        &self,
        json: &serde_json::Value,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let items = json
            .get("query")
            .and_then(|q| q.get("search"))
            .and_then(|s| s.as_array())
            .ok_or_else(|| ProviderError::Parse("missing query.search".into()))?;

        let mut results = Vec::new();
        for item in items.iter().take(max_results) {
            let title = item
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let snippet = item
                .get("snippet")
                .and_then(|s| s.as_str())
                .map(clean_snippet)
                .unwrap_or_default();

            let mut result = SearchResult::new(self.article_url(title), title, self.id.clone())
                .with_snippet(snippet);

            // Last edit time; only the date part feeds freshness scoring
            if let Some(date) = item
                .get("timestamp")
                .and_then(|t| t.as_str())
                .and_then(|t| t.get(..10))
            {
                result = result.with_published_date(date);
            }

            results.push(result);
        }

        Ok(results)
    }
}

/// Drop the search-match markup and decode entities
fn clean_snippet(snippet: &str) -> String {
    Html::parse_fragment(snippet)
        .root_element()
        .text()
        .collect::<String>()
}

#[async_trait]
impl Provider for Wikipedia {
    fn id(&self) -> &str {
        &self.id
    }

    fn about(&self) -> ProviderAbout {
        ProviderAbout::new()
            .website("https://www.wikipedia.org")
            .official_api(true)
            .results_format("JSON")
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        progress: &ProgressReporter,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let limit = max_results.to_string();
        let params = [
            ("action", "query"),
            ("list", "search"),
            ("srsearch", query),
            ("srlimit", limit.as_str()),
            ("format", "json"),
        ];

        let response = self
            .client
            .get(&self.api_url, &params)
            .await?
            .error_for_status()?;

        progress.parsing("Parsing Wikipedia results...");
        let json: serde_json::Value = response.json()?;
        self.parse_results(&json, max_results)
    }
}
