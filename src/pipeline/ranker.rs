//! Multi-factor relevance ranking

use crate::config::RankingWeights;
use crate::error::Result;
use crate::results::{RankingFactors, SearchResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Authority of well-known domains, 0-100
const AUTHORITY_DOMAINS: &[(&str, f64)] = &[
    // Major tech
    ("github.com", 85.0),
    ("stackoverflow.com", 85.0),
    ("microsoft.com", 80.0),
    ("apple.com", 80.0),
    ("google.com", 80.0),
    // Academic / research
    ("arxiv.org", 90.0),
    ("scholar.google.com", 85.0),
    ("pubmed.ncbi.nlm.nih.gov", 90.0),
    ("ncbi.nlm.nih.gov", 90.0),
    ("researchgate.net", 75.0),
    ("semanticscholar.org", 80.0),
    ("nature.com", 90.0),
    ("sciencedirect.com", 85.0),
    ("ieee.org", 85.0),
    ("acm.org", 85.0),
    // News
    ("reuters.com", 80.0),
    ("bbc.com", 75.0),
    ("nytimes.com", 75.0),
    ("washingtonpost.com", 75.0),
    ("theguardian.com", 75.0),
    // Docs and reference
    ("docs.python.org", 85.0),
    ("developer.mozilla.org", 85.0),
    ("docs.rs", 85.0),
    ("w3.org", 90.0),
    ("wikipedia.org", 75.0),
    // Archives
    ("archive.org", 80.0),
    ("web.archive.org", 80.0),
    // Community
    ("reddit.com", 60.0),
    ("medium.com", 55.0),
    ("dev.to", 60.0),
    ("news.ycombinator.com", 65.0),
];

const AUTHORITY_TLDS: &[(&str, f64)] = &[(".gov", 95.0), (".edu", 90.0), (".org", 70.0)];

const DEFAULT_AUTHORITY: f64 = 50.0;

const QUALITY_POSITIVE: &[&str] = &[
    "documentation",
    "tutorial",
    "guide",
    "official",
    "reference",
    "manual",
    "specification",
    "research",
    "peer-reviewed",
    "published",
    "study",
    "analysis",
];

const QUALITY_NEGATIVE: &[&str] = &[
    "spam",
    "click here",
    "buy now",
    "advertisement",
    "sponsored",
    "affiliate",
    "cheap",
    "discount",
    "limited time",
    "act now",
    "free trial",
];

const BOOLEAN_OPERATORS: &[&str] = &["AND", "OR", "NOT"];

const FILTER_PREFIXES: &[&str] = &[
    "site:",
    "filetype:",
    "intitle:",
    "inurl:",
    "after:",
    "before:",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%B %d, %Y", "%d %B %Y"];

/// Coarse label for a relevance score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Excellent,
    High,
    Good,
    Fair,
    Average,
    Low,
}

impl QualityTier {
    pub fn of(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 80.0 {
            Self::High
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 60.0 {
            Self::Fair
        } else if score >= 50.0 {
            Self::Average
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::High => "high",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Average => "average",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query terms used for scoring
///
/// Boolean operators, exclusions (`-term`) and filters (`site:` etc.) are
/// dropped; the rest is lowercased, split on quoting/grouping characters and
/// de-duplicated in order. Single-character terms are ignored.
pub fn extract_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query.split_whitespace() {
        if BOOLEAN_OPERATORS.contains(&token) || token.starts_with('-') {
            continue;
        }
        let token = token.to_lowercase();
        if FILTER_PREFIXES.iter().any(|p| token.starts_with(p)) {
            continue;
        }
        let cleaned: String = token
            .chars()
            .map(|c| if matches!(c, '+' | '"' | '(' | ')') { ' ' } else { c })
            .collect();
        for term in cleaned.split_whitespace() {
            if term.chars().count() > 1 && !terms.iter().any(|t| t == term) {
                terms.push(term.to_string());
            }
        }
    }
    terms
}

/// Scores results on seven factors and orders them by the weighted sum
#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankingWeights,
    reference_date: Option<NaiveDate>,
}

impl Ranker {
    /// Weights are normalized to sum to 1; non-positive weights are rejected
    pub fn new(weights: &RankingWeights) -> Result<Self> {
        Ok(Self {
            weights: weights.normalized()?,
            reference_date: None,
        })
    }

    /// Fix "today" for freshness scoring
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Score every result and stable-sort by relevance, highest first
    pub fn rank(&self, mut results: Vec<SearchResult>, query: &str) -> Vec<SearchResult> {
        let terms = extract_terms(query);
        for result in &mut results {
            self.score(result, query, &terms);
        }
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        results
    }

    /// Annotate one result with its factors and composite score
    pub fn score(&self, result: &mut SearchResult, query: &str, terms: &[String]) {
        let factors = self.factors(result, query, terms);
        result.relevance_score = round2(self.composite(&factors));
        result.ranking_factors = Some(factors.rounded());
    }

    pub fn factors(&self, result: &SearchResult, query: &str, terms: &[String]) -> RankingFactors {
        let combined = format!("{} {}", result.title, result.snippet);
        RankingFactors {
            source_authority: source_authority(&result.url),
            keyword_density: keyword_density(&result.title, &result.snippet, terms),
            keyword_proximity: keyword_proximity(&combined, terms),
            title_match: title_match(&result.title, terms, query),
            domain_relevance: domain_relevance(&result.url, terms),
            content_freshness: freshness(
                result.published_date.as_deref(),
                &result.snippet,
                self.today(),
            ),
            content_quality: content_quality(&result.title, &result.snippet, &result.url),
        }
    }

    fn composite(&self, f: &RankingFactors) -> f64 {
        let w = &self.weights;
        let score = f.source_authority * w.source_authority
            + f.keyword_density * w.keyword_density
            + f.keyword_proximity * w.keyword_proximity
            + f.title_match * w.title_match
            + f.domain_relevance * w.domain_relevance
            + f.content_freshness * w.content_freshness
            + f.content_quality * w.content_quality;
        score.clamp(0.0, 100.0)
    }

    pub fn quality_tier(score: f64) -> QualityTier {
        QualityTier::of(score)
    }

    pub fn filter_by_quality(results: Vec<SearchResult>, min_score: f64) -> Vec<SearchResult> {
        results
            .into_iter()
            .filter(|r| r.relevance_score >= min_score)
            .collect()
    }

    pub fn group_by_quality(results: Vec<SearchResult>) -> BTreeMap<QualityTier, Vec<SearchResult>> {
        let mut groups: BTreeMap<QualityTier, Vec<SearchResult>> = BTreeMap::new();
        for result in results {
            groups
                .entry(QualityTier::of(result.relevance_score))
                .or_default()
                .push(result);
        }
        groups
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn source_authority(url: &str) -> f64 {
    let Ok(parsed) = Url::parse(url) else {
        return DEFAULT_AUTHORITY;
    };
    let Some(host) = parsed.host_str() else {
        return DEFAULT_AUTHORITY;
    };
    let host = host.to_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host);

    if let Some((_, score)) = AUTHORITY_DOMAINS.iter().find(|(d, _)| *d == domain) {
        return *score;
    }
    if let Some((_, score)) = AUTHORITY_TLDS.iter().find(|(tld, _)| domain.ends_with(tld)) {
        return *score;
    }
    if let Some((_, score)) = AUTHORITY_DOMAINS
        .iter()
        .find(|(d, _)| domain.ends_with(&format!(".{d}")))
    {
        return score * 0.9;
    }

    if parsed.scheme() == "https" {
        DEFAULT_AUTHORITY + 5.0
    } else {
        DEFAULT_AUTHORITY
    }
}

fn keyword_density(title: &str, snippet: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 50.0;
    }
    let text = format!("{} {}", title, snippet).to_lowercase();
    let total_words = text.split_whitespace().count();
    if total_words == 0 {
        return 0.0;
    }
    let occurrences: usize = terms.iter().map(|t| text.matches(t.as_str()).count()).sum();
    let density = occurrences as f64 / total_words as f64 * 100.0;

    if density < 1.0 {
        density * 30.0
    } else if density <= 5.0 {
        50.0 + density * 10.0
    } else if density <= 10.0 {
        100.0 - (density - 5.0) * 5.0
    } else {
        (100.0 - density * 3.0).max(50.0)
    }
}

fn keyword_proximity(text: &str, terms: &[String]) -> f64 {
    if terms.len() < 2 {
        return 100.0;
    }
    let text = text.to_lowercase();
    let words: Vec<&str> = text.split_whitespace().collect();

    let positions: Vec<Vec<usize>> = terms
        .iter()
        .map(|term| {
            words
                .iter()
                .enumerate()
                .filter(|(_, w)| w.contains(term.as_str()))
                .map(|(i, _)| i)
                .collect()
        })
        .collect();
    if positions.iter().any(Vec::is_empty) {
        return 30.0;
    }

    let mut min_span = usize::MAX;
    for (i, first) in positions.iter().enumerate() {
        for second in &positions[i + 1..] {
            for a in first {
                for b in second {
                    min_span = min_span.min(a.abs_diff(*b));
                }
            }
        }
    }

    match min_span {
        0..=1 => 100.0,
        2..=3 => 90.0,
        4..=5 => 80.0,
        6..=10 => 70.0,
        span => (100.0 - span as f64 * 2.0).max(50.0),
    }
}

fn title_match(title: &str, terms: &[String], query: &str) -> f64 {
    if title.is_empty() {
        return 0.0;
    }
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 50.0;
    }
    let title = title.to_lowercase();
    if title.contains(&query) {
        return 100.0;
    }
    if terms.is_empty() {
        return 50.0;
    }

    let present = terms.iter().filter(|t| title.contains(t.as_str())).count();
    let ratio = present as f64 / terms.len() as f64;
    if ratio >= 1.0 {
        95.0
    } else if ratio >= 0.75 {
        85.0
    } else if ratio >= 0.5 {
        70.0
    } else if ratio >= 0.25 {
        55.0
    } else {
        30.0
    }
}

fn domain_relevance(url: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 50.0;
    }
    let Ok(parsed) = Url::parse(url) else {
        return 50.0;
    };
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let path = parsed.path().to_lowercase();

    let n = terms.len() as f64;
    let in_host = terms.iter().filter(|t| host.contains(t.as_str())).count() as f64;
    let in_path = terms.iter().filter(|t| path.contains(t.as_str())).count() as f64;

    (50.0 + in_host / n * 50.0 + in_path / n * 30.0).min(100.0)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive()))
}

fn freshness(published: Option<&str>, snippet: &str, today: NaiveDate) -> f64 {
    let Some(published) = published.filter(|p| !p.trim().is_empty()) else {
        let year = today.year();
        return (0..5)
            .find(|age| snippet.contains(&(year - age).to_string()))
            .map(|age| (100.0 - age as f64 * 10.0).max(50.0))
            .unwrap_or(50.0);
    };

    let Some(date) = parse_date(published) else {
        return 50.0;
    };
    match (today - date).num_days() {
        d if d < 7 => 100.0,
        d if d < 30 => 90.0,
        d if d < 90 => 80.0,
        d if d < 365 => 70.0,
        d if d < 730 => 60.0,
        _ => 50.0,
    }
}

fn is_all_caps(text: &str) -> bool {
    text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase)
}

fn content_quality(title: &str, snippet: &str, url: &str) -> f64 {
    let text = format!("{} {}", title, snippet).to_lowercase();
    let mut score = 50.0;

    score += 5.0 * QUALITY_POSITIVE.iter().filter(|w| text.contains(*w)).count() as f64;
    score -= 10.0 * QUALITY_NEGATIVE.iter().filter(|w| text.contains(*w)).count() as f64;

    if let Ok(parsed) = Url::parse(url) {
        let path = parsed.path().to_lowercase();
        if path.contains("/docs/") || path.contains("/documentation/") {
            score += 10.0;
        }
        if path.contains("/api/") || path.contains("/reference/") {
            score += 5.0;
        }
        if path.contains("/research/") || path.contains("/paper/") {
            score += 10.0;
        }
        if path.contains("/ad/") || path.contains("/ads/") {
            score -= 15.0;
        }
        if path.contains("tracking") {
            score -= 10.0;
        }
    }

    if !title.is_empty() {
        let len = title.chars().count();
        if len < 10 {
            score -= 10.0;
        } else if len > 200 {
            score -= 5.0;
        }
        if is_all_caps(title) {
            score -= 15.0;
        }
    }

    score.clamp(0.0, 100.0)
}
