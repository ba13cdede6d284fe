//! Safety filter: URL and content scoring against blacklists and heuristics

use crate::config::SafetySettings;
use crate::error::{Error, Result};
use crate::results::{CheckResult, SafetyAssessment, SafetyVerdict, SearchResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

const SUSPICIOUS_TLDS: &[&str] = &[
    ".xyz", ".top", ".club", ".work", ".click", ".link", ".gdn", ".men", ".loan", ".win",
    ".review", ".stream",
];

const SAFE_INDICATORS: &[&str] = &[
    "https://",
    ".gov",
    ".edu",
    "wikipedia.org",
    "github.com",
    "stackoverflow.com",
];

/// Embedded credentials, NUL/CRLF encodings, backslashes, traversal
const SUSPICIOUS_URL_CHARS: &[&str] = &["@", "%00", "%0d", "%0a", "\\", ".."];

const URGENCY_WORDS: &[&str] = &["urgent", "immediately", "now", "hurry", "limited", "act fast"];

static PHISHING_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"login.*verify",
        r"secure.*update",
        r"account.*confirm",
        r"paypal.*login",
        r"bank.*verify",
        r"signin.*secure",
        r"update.*billing",
        r"verify.*identity",
    ])
});

static SCAM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"your account has been (suspended|compromised)",
        r"verify your (identity|account|payment)",
        r"click here (immediately|now|urgently)",
        r"winner.*lottery",
        r"free (iphone|gift|prize)",
        r"limited time offer",
        r"act now before",
        r"wire transfer",
        r"nigerian prince",
    ])
});

static URGENCY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let patterns: Vec<String> = URGENCY_WORDS
        .iter()
        .map(|w| format!(r"\b{}\b", regex::escape(w)))
        .collect();
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
        .collect()
}

/// Reputation summary of a single domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainReputation {
    pub domain: String,
    pub is_blacklisted: bool,
    pub is_whitelisted: bool,
    pub suspicious_tld: bool,
    pub reputation_score: f64,
}

/// Scores results for safety and partitions them into safe and flagged
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    enabled: bool,
    blacklist: BTreeSet<String>,
    whitelist: BTreeSet<String>,
    blacklist_file: Option<PathBuf>,
    min_score: f64,
}

impl SafetyFilter {
    /// Build the filter, loading the blacklist file when one is configured
    pub fn new(settings: &SafetySettings) -> Result<Self> {
        let mut filter = Self {
            enabled: settings.enabled,
            blacklist: BTreeSet::new(),
            whitelist: BTreeSet::new(),
            blacklist_file: settings.blacklist_file.clone(),
            min_score: settings.min_score,
        };

        if let Some(path) = &settings.blacklist_file {
            filter.load_blacklist(path)?;
        }
        for entry in &settings.blacklist {
            filter.blacklist.insert(entry.trim().to_lowercase());
        }
        for entry in &settings.whitelist {
            filter.add_to_whitelist(entry);
        }

        Ok(filter)
    }

    /// Read a plain text blacklist: one entry per line, `#` starts a comment
    pub fn load_blacklist(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            debug!("Blacklist file {} does not exist", path.display());
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)?;
        let before = self.blacklist.len();
        for line in content.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                self.blacklist.insert(line.to_lowercase());
            }
        }
        let added = self.blacklist.len() - before;
        info!("Loaded {} blacklist entries from {}", added, path.display());
        Ok(added)
    }

    /// Add a domain or URL to the blacklist
    pub fn add_to_blacklist(&mut self, domain_or_url: &str) {
        self.blacklist.insert(extract_domain(domain_or_url));
    }

    /// Add a domain or URL to the whitelist
    pub fn add_to_whitelist(&mut self, domain_or_url: &str) {
        self.whitelist.insert(extract_domain(domain_or_url));
    }

    pub fn blacklist_count(&self) -> usize {
        self.blacklist.len()
    }

    pub fn whitelist_count(&self) -> usize {
        self.whitelist.len()
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    fn is_whitelisted(&self, domain: &str) -> bool {
        self.whitelist
            .iter()
            .any(|w| domain == w || domain.ends_with(&format!(".{}", w)))
    }

    fn blacklist_match(&self, domain: &str, url: &str) -> Option<&str> {
        if let Some(entry) = self.blacklist.get(domain) {
            return Some(entry);
        }
        self.blacklist
            .iter()
            .find(|entry| domain.contains(entry.as_str()) || url.contains(entry.as_str()))
            .map(|s| s.as_str())
    }

    /// Score a URL in [0, 1]
    pub fn check_url(&self, url: &str) -> CheckResult {
        if !self.enabled {
            return CheckResult::new(SafetyVerdict::Safe, 1.0, "Safety checking disabled");
        }
        if url.is_empty() {
            return CheckResult::new(SafetyVerdict::Safe, 0.5, "No URL");
        }

        let domain = extract_domain(url);
        let url_lower = url.to_lowercase();

        if self.is_whitelisted(&domain) {
            return CheckResult::new(SafetyVerdict::Safe, 1.0, "Whitelisted");
        }

        if let Some(entry) = self.blacklist_match(&domain, &url_lower) {
            return CheckResult::new(
                SafetyVerdict::Unsafe,
                0.0,
                format!("Blacklisted: {}", entry),
            );
        }

        let mut score: f64 = 0.7;

        if SUSPICIOUS_TLDS.iter().any(|tld| domain.ends_with(tld)) {
            score -= 0.3;
        }

        if let Some(pattern) = PHISHING_PATTERNS.iter().find(|re| re.is_match(url)) {
            return CheckResult::new(
                SafetyVerdict::Unsafe,
                0.1,
                format!("Phishing pattern: {}", pattern.as_str().trim_start_matches("(?i)")),
            );
        }

        for indicator in SAFE_INDICATORS {
            if url_lower.contains(indicator) {
                score += 0.1;
            }
        }

        if SUSPICIOUS_URL_CHARS.iter().any(|s| url_lower.contains(s)) {
            score -= 0.2;
        }

        let score = score.clamp(0.0, 1.0);
        let reason = match SafetyVerdict::classify(score) {
            SafetyVerdict::Unsafe => "Low safety score",
            SafetyVerdict::Caution => "Caution advised",
            SafetyVerdict::Safe => "Appears safe",
        };
        CheckResult::scored(score, reason)
    }

    /// Score title and snippet text in [0, 1]
    pub fn check_content(&self, title: &str, snippet: &str) -> CheckResult {
        if !self.enabled {
            return CheckResult::new(SafetyVerdict::Safe, 1.0, "Safety checking disabled");
        }

        let content = format!("{} {}", title, snippet).to_lowercase();
        let mut score: f64 = 0.8;

        for pattern in SCAM_PATTERNS.iter() {
            if pattern.is_match(&content) {
                score -= 0.3;
                if score < 0.3 {
                    return CheckResult::new(
                        SafetyVerdict::Unsafe,
                        score.max(0.0),
                        format!(
                            "Suspicious content: {}",
                            pattern.as_str().trim_start_matches("(?i)")
                        ),
                    );
                }
            }
        }

        let urgency = URGENCY_PATTERNS
            .iter()
            .filter(|re| re.is_match(&content))
            .count();
        if urgency >= 2 {
            score -= 0.2;
        }

        if is_shouting(title) && title.chars().count() > 10 {
            score -= 0.2;
        }

        let score = score.clamp(0.0, 1.0);
        let reason = match SafetyVerdict::classify(score) {
            SafetyVerdict::Unsafe => "Suspicious content detected",
            SafetyVerdict::Caution => "Content flagged for review",
            SafetyVerdict::Safe => "Content appears safe",
        };
        CheckResult::scored(score, reason)
    }

    /// Full assessment of one result
    pub fn assess(&self, result: &SearchResult) -> SafetyAssessment {
        let url_check = self.check_url(&result.url);
        let content_check = self.check_content(&result.title, &result.snippet);
        let combined = url_check.score * 0.6 + content_check.score * 0.4;

        let whitelisted = self.enabled && self.is_whitelisted(&extract_domain(&result.url));
        let is_safe = whitelisted
            || (url_check.passed() && content_check.passed() && combined >= 0.4);

        SafetyAssessment {
            is_safe,
            score: round2(combined),
            url_check: CheckResult {
                score: round2(url_check.score),
                ..url_check
            },
            content_check: CheckResult {
                score: round2(content_check.score),
                ..content_check
            },
        }
    }

    /// Annotate every result and split into (safe, flagged)
    pub fn filter_results(
        &self,
        results: Vec<SearchResult>,
        min_score: f64,
    ) -> (Vec<SearchResult>, Vec<SearchResult>) {
        let mut safe = Vec::new();
        let mut flagged = Vec::new();

        for mut result in results {
            let assessment = self.assess(&result);
            let whitelisted = assessment.url_check.reason == "Whitelisted";
            let keep = assessment.is_safe && (whitelisted || assessment.score >= min_score);
            result.safety = Some(assessment);
            if keep {
                safe.push(result);
            } else {
                debug!("Flagged unsafe result: {}", result.url);
                flagged.push(result);
            }
        }

        (safe, flagged)
    }

    /// Reputation of a domain independent of any particular URL
    pub fn domain_reputation(&self, domain_or_url: &str) -> DomainReputation {
        let domain = extract_domain(domain_or_url);
        let is_blacklisted = self.blacklist.contains(&domain);
        let is_whitelisted = self.whitelist.contains(&domain);
        let suspicious_tld = SUSPICIOUS_TLDS.iter().any(|tld| domain.ends_with(tld));
        let safe_domain = SAFE_INDICATORS
            .iter()
            .filter(|i| !i.contains("://"))
            .any(|i| domain.contains(i));

        let score: f64 = if is_whitelisted {
            1.0
        } else if is_blacklisted {
            0.0
        } else {
            let mut score = 0.5;
            if suspicious_tld {
                score -= 0.2;
            }
            if safe_domain {
                score += 0.3;
            }
            if domain.ends_with(".gov") || domain.ends_with(".edu") {
                score += 0.3;
            }
            score
        };

        DomainReputation {
            domain,
            is_blacklisted,
            is_whitelisted,
            suspicious_tld,
            reputation_score: round2(score.clamp(0.0, 1.0)),
        }
    }

    /// Write the blacklist back to its configured file
    pub fn save_blacklist(&self) -> Result<()> {
        let path = self.blacklist_file.as_ref().ok_or_else(|| {
            Error::Configuration("no blacklist file configured".into())
        })?;
        let mut content = String::from("# TierSearch URL blacklist\n# One domain/URL per line\n\n");
        for entry in &self.blacklist {
            content.push_str(entry);
            content.push('\n');
        }
        std::fs::write(path, content)?;
        info!("Saved {} blacklist entries to {}", self.blacklist.len(), path.display());
        Ok(())
    }
}

/// Lowercased host without a leading `www.`
pub fn extract_domain(url: &str) -> String {
    let with_scheme = if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    match Url::parse(&with_scheme) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_lowercase();
            host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
        }
        Err(_) => url.trim().to_lowercase(),
    }
}

/// Has letters and none of them are lowercase
fn is_shouting(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic()) && !text.chars().any(|c| c.is_lowercase())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
