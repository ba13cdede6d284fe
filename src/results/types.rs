//! Result type definitions

use serde::{Deserialize, Serialize};
use url::Url;

/// A single search result
///
/// Created raw by a provider, then enriched in place by the safety filter,
/// the deduplicator and the ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The title of the result
    pub title: String,
    /// The URL of the result
    pub url: String,
    /// Content snippet/description
    #[serde(default)]
    pub snippet: String,
    /// Provider that returned this result
    pub provider: String,
    /// All providers that returned this result (after merging duplicates)
    #[serde(default)]
    pub sources: Vec<String>,
    /// Tier the result came from
    #[serde(default)]
    pub tier: u32,
    /// Published date, if the provider exposes one
    #[serde(default)]
    pub published_date: Option<String>,
    /// Composite relevance score in [0, 100]
    #[serde(default)]
    pub relevance_score: f64,
    /// Per-factor score breakdown
    #[serde(default)]
    pub ranking_factors: Option<RankingFactors>,
    /// Safety assessment
    #[serde(default)]
    pub safety: Option<SafetyAssessment>,
    /// Canonical URL used for duplicate detection
    #[serde(default)]
    pub normalized_url: Option<String>,
    /// Hash of the normalized title and snippet
    #[serde(default)]
    pub content_fingerprint: Option<String>,
}

impl SearchResult {
    /// Create a new result
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: String::new(),
            provider: provider.into(),
            sources: vec![],
            tier: 0,
            published_date: None,
            relevance_score: 0.0,
            ranking_factors: None,
            safety: None,
            normalized_url: None,
            content_fingerprint: None,
        }
    }

    /// Add a snippet to the result
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Add a published date
    pub fn with_published_date(mut self, date: impl Into<String>) -> Self {
        self.published_date = Some(date.into());
        self
    }

    /// Set the tier of origin
    pub fn with_tier(mut self, tier: u32) -> Self {
        self.tier = tier;
        self
    }

    /// Get the lowercased hostname from the URL
    pub fn hostname(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    }

    /// Record another provider as a source of this result
    pub fn add_source(&mut self, provider: &str) {
        if self.sources.is_empty() && !self.provider.is_empty() {
            self.sources.push(self.provider.clone());
        }
        if !provider.is_empty() && !self.sources.iter().any(|s| s == provider) {
            self.sources.push(provider.to_string());
        }
    }

    /// Whether the safety filter marked this result safe
    pub fn is_safe(&self) -> bool {
        self.safety.as_ref().map(|s| s.is_safe).unwrap_or(true)
    }
}

/// Individual ranking factor scores, each in [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingFactors {
    pub source_authority: f64,
    pub keyword_density: f64,
    pub keyword_proximity: f64,
    pub title_match: f64,
    pub domain_relevance: f64,
    pub content_freshness: f64,
    pub content_quality: f64,
}

impl RankingFactors {
    /// Round every factor to two decimals for display and persistence
    pub fn rounded(self) -> Self {
        let r = |v: f64| (v * 100.0).round() / 100.0;
        Self {
            source_authority: r(self.source_authority),
            keyword_density: r(self.keyword_density),
            keyword_proximity: r(self.keyword_proximity),
            title_match: r(self.title_match),
            domain_relevance: r(self.domain_relevance),
            content_freshness: r(self.content_freshness),
            content_quality: r(self.content_quality),
        }
    }
}

/// Three-way safety classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyVerdict {
    Safe,
    Caution,
    Unsafe,
}

impl SafetyVerdict {
    /// Classify a score in [0, 1]
    pub fn classify(score: f64) -> Self {
        if score < 0.3 {
            Self::Unsafe
        } else if score < 0.5 {
            Self::Caution
        } else {
            Self::Safe
        }
    }

    /// Caution still passes; only unsafe fails
    pub fn passes(self) -> bool {
        !matches!(self, Self::Unsafe)
    }
}

/// Outcome of a single safety sub-check (URL or content)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub verdict: SafetyVerdict,
    pub score: f64,
    pub reason: String,
}

impl CheckResult {
    pub fn new(verdict: SafetyVerdict, score: f64, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            score,
            reason: reason.into(),
        }
    }

    /// Build a result whose verdict follows from the score
    pub fn scored(score: f64, reason: impl Into<String>) -> Self {
        Self::new(SafetyVerdict::classify(score), score, reason)
    }

    pub fn passed(&self) -> bool {
        self.verdict.passes()
    }
}

/// Safety annotation attached to every filtered result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub is_safe: bool,
    /// `0.6 * url + 0.4 * content`
    pub score: f64,
    pub url_check: CheckResult,
    pub content_check: CheckResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_lowercased() {
        let r = SearchResult::new("https://Docs.Example.ORG/x", "t", "p");
        assert_eq!(r.hostname().as_deref(), Some("docs.example.org"));
    }

    #[test]
    fn add_source_seeds_origin_provider() {
        let mut r = SearchResult::new("https://a.com", "A", "bing");
        r.add_source("brave");
        r.add_source("bing");
        assert_eq!(r.sources, vec!["bing".to_string(), "brave".to_string()]);
    }

    #[test]
    fn verdict_thresholds() {
        assert_eq!(SafetyVerdict::classify(0.29), SafetyVerdict::Unsafe);
        assert_eq!(SafetyVerdict::classify(0.3), SafetyVerdict::Caution);
        assert_eq!(SafetyVerdict::classify(0.49), SafetyVerdict::Caution);
        assert_eq!(SafetyVerdict::classify(0.5), SafetyVerdict::Safe);
        assert!(SafetyVerdict::Caution.passes());
    }
}
