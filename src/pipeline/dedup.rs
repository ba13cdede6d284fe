//! Duplicate detection by canonical URL, content fingerprint and similarity

use crate::config::{DedupMethod, DedupSettings};
use crate::results::SearchResult;
use moka::sync::Cache;
use serde::Serialize;
use similar::TextDiff;
use std::collections::{BTreeMap, HashMap};
use url::{form_urlencoded, Url};

/// Query parameters that never change which page a URL points at
const TRACKING_PARAMS: &[&str] = &[
    // Ad click ids
    "fbclid",
    "gclid",
    "gclsrc",
    "msclkid",
    "dclid",
    "twclid",
    "fb_action_ids",
    "fb_action_types",
    "fb_source",
    "fb_ref",
    "click_id",
    "campaign_id",
    "ad_id",
    "s_kwcid",
    // Referrers
    "ref",
    "ref_",
    "referer",
    "referrer",
    "source",
    // Sessions
    "session",
    "sessionid",
    "sid",
    "jsessionid",
    // Analytics
    "_gl",
    "_hsenc",
    "_hsmi",
    "__hstc",
    "__hsfp",
    "hsctatracking",
    "mc_eid",
    "mc_cid",
    // Social
    "share",
    "shared",
    "social",
    // Cache busters
    "timestamp",
    "ts",
    "nocache",
    "cache",
    "cb",
    "ver",
    "version",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "_ga", "ga_"];

/// Hosts serving the same content under another name
const HOST_ALIASES: &[(&str, &str)] = &[
    ("old.reddit.com", "reddit.com"),
    ("np.reddit.com", "reddit.com"),
    ("m.reddit.com", "reddit.com"),
    ("amp.reddit.com", "reddit.com"),
    ("mobile.twitter.com", "twitter.com"),
    ("m.youtube.com", "youtube.com"),
    ("youtu.be", "youtube.com"),
    ("en.m.wikipedia.org", "en.wikipedia.org"),
];

const INDEX_FILES: &[&str] = &["/index.html", "/index.htm", "/index.php", "/default.html"];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_lowercase();
    TRACKING_PARAMS.contains(&key.as_str())
        || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

fn canonical_host(host: &str) -> &str {
    HOST_ALIASES
        .iter()
        .find(|(alias, _)| *alias == host)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(host)
}

/// Returns `true` if the URL uses the default port for its scheme
fn is_default_port(url: &Url) -> bool {
    matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    )
}

/// Strip trailing slashes and index files until neither applies
fn canonical_path(path: &str) -> String {
    let mut path = path.to_string();
    loop {
        let before = path.len();
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        if let Some(index) = INDEX_FILES.iter().find(|i| path.ends_with(*i)) {
            path.truncate(path.len() - index.len());
        }
        if path.is_empty() {
            return "/".to_string();
        }
        if path.len() == before {
            return path;
        }
    }
}

/// Canonical form of a URL for duplicate comparison
///
/// Lowercases scheme and host, drops `www.`, maps host aliases, removes
/// default ports, index files, trailing slashes, tracking parameters and
/// the fragment, and sorts the remaining query by key. Input that does not
/// parse as a URL is returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };

    parsed.set_fragment(None);
    if parsed.cannot_be_a_base() {
        return parsed.to_string();
    }

    if let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) {
        let mut bare = host.as_str();
        while let Some(rest) = bare.strip_prefix("www.").filter(|r| !r.is_empty()) {
            bare = rest;
        }
        let canonical = canonical_host(bare).to_string();
        if canonical != host {
            let _ = parsed.set_host(Some(&canonical));
        }
    }

    if is_default_port(&parsed) {
        let _ = parsed.set_port(None);
    }

    let path = canonical_path(parsed.path());
    parsed.set_path(&path);

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if params.is_empty() {
        parsed.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        parsed.set_query(Some(&query));
    }

    parsed.to_string()
}

/// Host of a URL without `www.`, empty when unparseable
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.strip_prefix("www.").map(str::to_string).unwrap_or(h))
        .unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// md5 of the lowercased, whitespace-normalized `title|snippet`
pub fn content_fingerprint(result: &SearchResult) -> String {
    let content = format!(
        "{}|{}",
        collapse_whitespace(&result.title.to_lowercase()),
        collapse_whitespace(&result.snippet.to_lowercase())
    );
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// Character alignment ratio in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    TextDiff::from_chars(a, b).ratio() as f64
}

/// Results kept and rejected by one deduplication pass
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub unique: Vec<SearchResult>,
    pub duplicates: Vec<SearchResult>,
}

/// Summary numbers of a deduplication pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupStats {
    pub original_count: usize,
    pub unique_count: usize,
    pub duplicates_removed: usize,
    pub reduction_percent: f64,
    pub method: DedupMethod,
    pub similarity_threshold: f64,
}

/// Removes exact and near-duplicate results
#[derive(Clone)]
pub struct Deduplicator {
    threshold: f64,
    method: DedupMethod,
    url_cache: Cache<String, String>,
}

impl Deduplicator {
    pub fn new(settings: &DedupSettings) -> Self {
        Self {
            threshold: settings.threshold,
            method: settings.method,
            url_cache: Cache::new(10_000),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_method(mut self, method: DedupMethod) -> Self {
        self.method = method;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Memoized [`normalize_url`]
    pub fn normalize(&self, url: &str) -> String {
        if url.is_empty() {
            return String::new();
        }
        if let Some(cached) = self.url_cache.get(url) {
            return cached;
        }
        let normalized = normalize_url(url);
        self.url_cache.insert(url.to_string(), normalized.clone());
        normalized
    }

    pub fn urls_equivalent(&self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }

    /// Near-duplicate test on titles, falling back to snippets
    pub fn similar(&self, a: &SearchResult, b: &SearchResult) -> bool {
        let title_sim = similarity(&a.title.to_lowercase(), &b.title.to_lowercase());
        if title_sim >= self.threshold {
            return true;
        }
        if title_sim >= 0.5 {
            let snippet_sim =
                similarity(&a.snippet.to_lowercase(), &b.snippet.to_lowercase());
            return title_sim * 0.6 + snippet_sim * 0.4 >= self.threshold;
        }
        false
    }

    /// Single pass that keeps the first of every duplicate set
    ///
    /// Kept results are annotated with their normalized URL and
    /// fingerprint, and gain the providers of the duplicates they absorb.
    pub fn deduplicate(&self, results: Vec<SearchResult>) -> DedupOutcome {
        let check_url = self.method != DedupMethod::ContentOnly;
        let check_content = self.method != DedupMethod::UrlOnly;
        let check_similarity = self.method == DedupMethod::UrlAndContent;

        let mut seen_urls: HashMap<String, usize> = HashMap::new();
        let mut seen_fingerprints: HashMap<String, usize> = HashMap::new();
        let mut outcome = DedupOutcome::default();

        for mut result in results {
            let normalized = self.normalize(&result.url);
            let fingerprint = content_fingerprint(&result);

            let existing = check_url
                .then(|| seen_urls.get(&normalized).copied())
                .flatten()
                .or_else(|| {
                    check_content
                        .then(|| seen_fingerprints.get(&fingerprint).copied())
                        .flatten()
                })
                .or_else(|| {
                    check_similarity
                        .then(|| outcome.unique.iter().position(|kept| self.similar(&result, kept)))
                        .flatten()
                });

            match existing {
                Some(index) => {
                    let kept = &mut outcome.unique[index];
                    kept.add_source(&result.provider);
                    for source in &result.sources {
                        kept.add_source(source);
                    }
                    outcome.duplicates.push(result);
                }
                None => {
                    let index = outcome.unique.len();
                    if check_url {
                        seen_urls.insert(normalized.clone(), index);
                    }
                    if check_content {
                        seen_fingerprints.insert(fingerprint.clone(), index);
                    }
                    result.normalized_url = Some(normalized);
                    result.content_fingerprint = Some(fingerprint);
                    outcome.unique.push(result);
                }
            }
        }

        outcome
    }

    /// Groups of results sharing a normalized URL (only groups of 2+)
    pub fn find_duplicates(&self, results: &[SearchResult]) -> BTreeMap<String, Vec<SearchResult>> {
        let mut groups: BTreeMap<String, Vec<SearchResult>> = BTreeMap::new();
        for result in results {
            groups
                .entry(self.normalize(&result.url))
                .or_default()
                .push(result.clone());
        }
        groups.retain(|_, group| group.len() > 1);
        groups
    }

    /// Collapse a duplicate cluster into its best member
    ///
    /// The base is the result with the highest (score, snippet length, title
    /// length); every contributing provider ends up in its `sources`.
    pub fn merge_duplicates(group: Vec<SearchResult>) -> Option<SearchResult> {
        let best = group
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.relevance_score
                    .total_cmp(&b.relevance_score)
                    .then(a.snippet.len().cmp(&b.snippet.len()))
                    .then(a.title.len().cmp(&b.title.len()))
                    // earliest wins a full tie
                    .then(ib.cmp(ia))
            })
            .map(|(i, _)| i)?;

        let mut merged = group[best].clone();
        for (i, other) in group.iter().enumerate() {
            if i == best {
                continue;
            }
            merged.add_source(&other.provider);
            for source in &other.sources {
                merged.add_source(source);
            }
        }
        Some(merged)
    }

    pub fn stats(&self, original_count: usize, unique_count: usize) -> DedupStats {
        let removed = original_count.saturating_sub(unique_count);
        let percent = if original_count > 0 {
            removed as f64 / original_count as f64 * 100.0
        } else {
            0.0
        };
        DedupStats {
            original_count,
            unique_count,
            duplicates_removed: removed,
            reduction_percent: (percent * 10.0).round() / 10.0,
            method: self.method,
            similarity_threshold: self.threshold,
        }
    }

    pub fn clear_cache(&self) {
        self.url_cache.invalidate_all();
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(&DedupSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn result(url: &str, title: &str, snippet: &str, provider: &str) -> SearchResult {
        SearchResult::new(url, title, provider).with_snippet(snippet)
    }

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path"),
            "https://example.com/Path"
        );
    }

    #[test]
    fn strips_www_ports_fragment_and_index() {
        assert_eq!(
            normalize_url("http://www.example.com:80/docs/index.html#intro"),
            "http://example.com/docs"
        );
        assert_eq!(normalize_url("https://example.com/index.php"), "https://example.com/");
        assert_eq!(
            normalize_url("https://example.com:8443/a/"),
            "https://example.com:8443/a"
        );
    }

    #[test]
    fn strips_tracking_and_sorts_query() {
        assert_eq!(
            normalize_url("https://example.com/s?z=1&utm_source=x&a=2&fbclid=abc&_ga=1"),
            "https://example.com/s?a=2&z=1"
        );
        assert_eq!(
            normalize_url("https://example.com/?utm_medium=mail"),
            "https://example.com/"
        );
    }

    #[test]
    fn alias_hosts_collapse() {
        assert_eq!(
            normalize_url("https://old.reddit.com/r/x/"),
            normalize_url("https://www.reddit.com/r/x")
        );
        assert_eq!(
            normalize_url("https://en.m.wikipedia.org/wiki/Rust"),
            "https://en.wikipedia.org/wiki/Rust"
        );
        assert_eq!(
            normalize_url("https://youtu.be/watch?v=abc"),
            "https://youtube.com/watch?v=abc"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let urls = [
            "https://www.Example.com/a/b/index.html/?b=2&a=1&utm_campaign=z#frag",
            "http://old.reddit.com:80/r/rust/",
            "https://example.com/search?q=hello+world&q=again",
            "https://example.com/path%20with%20spaces/",
            "https://m.youtube.com/",
            "https://www.www.example.com/a",
            "https://WWW.www.old.reddit.com/r/x/",
            "ftp://Files.Example.org/pub/",
            "mailto:someone@example.com",
            "not a url at all",
            "",
        ];
        for url in urls {
            let once = normalize_url(url);
            assert_eq!(normalize_url(&once), once, "not idempotent for {url}");
        }
    }

    #[test]
    fn repeated_www_prefixes_collapse() {
        assert_eq!(normalize_url("https://www.www.example.com/a"), "https://example.com/a");
        assert_eq!(
            normalize_url("https://www.www.old.reddit.com/r/x/"),
            normalize_url("https://reddit.com/r/x")
        );
    }

    #[test]
    fn unparseable_input_is_unchanged() {
        assert_eq!(normalize_url("::::"), "::::");
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        let a = result("https://a.com", "Rust  Book", "Learn\nRust", "p");
        let b = result("https://b.com", "rust book", "learn rust", "q");
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
        let c = result("https://b.com", "rust book", "learn go", "q");
        assert_ne!(content_fingerprint(&a), content_fingerprint(&c));
    }

    #[test]
    fn similar_titles() {
        let dedup = Deduplicator::default();
        let a = result("https://a.com", "Rust ownership guide", "x", "p");
        let b = result("https://b.com", "Rust ownership guide!", "y", "p");
        assert!(dedup.similar(&a, &b));

        let c = result("https://c.com", "Tokio runtime internals", "x", "p");
        assert!(!dedup.similar(&a, &c));
    }

    #[test]
    fn snippet_similarity_breaks_middle_band() {
        let dedup = Deduplicator::default();
        // title ratio is about 0.82: below the threshold, inside the blended band
        assert!(similarity("learning rust fast", "learning go fast") < dedup.threshold());
        assert!(similarity("learning rust fast", "learning go fast") >= 0.5);

        let a = result("https://a.com", "Learning Rust fast", "Install the toolchain and build", "p");
        let b = result("https://b.com", "Learning Go fast", "Install the toolchain and build", "q");
        assert!(dedup.similar(&a, &b));

        let c = result("https://c.com", "Learning Rust fast", "alpha", "p");
        let d = result("https://d.com", "Learning Go fast", "omega", "q");
        assert!(!dedup.similar(&c, &d));
    }

    #[test]
    fn close_titles_alone_are_duplicates() {
        let dedup = Deduplicator::default();
        let a = result("https://a.com", "Getting started with Rust", "alpha", "p");
        let b = result("https://b.com", "Getting started with Cargo", "omega", "q");
        assert!(dedup.similar(&a, &b));
    }

    fn sample() -> Vec<SearchResult> {
        vec![
            result("https://example.com/rust", "Rust language overview", "Systems programming", "a"),
            result("https://www.example.com/rust/", "Rust overview page", "Something else", "b"),
            result("https://other.org/serde", "Serde derive macros", "Serialization framework", "a"),
            result("https://mirror.net/copy", "SERDE derive   macros", "serialization framework", "c"),
            result("https://tokio.rs/tutorial", "Tokio async runtime tutorial", "Futures and tasks", "b"),
        ]
    }

    #[test]
    fn deduplicate_properties() {
        let dedup = Deduplicator::default();
        let input = sample();
        let outcome = dedup.deduplicate(input.clone());

        assert!(outcome.unique.len() <= input.len());
        assert_eq!(outcome.unique.len() + outcome.duplicates.len(), input.len());
        assert_eq!(outcome.unique.len(), 3);

        let urls: HashSet<_> = outcome
            .unique
            .iter()
            .map(|r| normalize_url(&r.url))
            .collect();
        assert_eq!(urls.len(), outcome.unique.len());

        // relative order of kept items is preserved
        let titles: Vec<_> = outcome.unique.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Rust language overview",
                "Serde derive macros",
                "Tokio async runtime tutorial"
            ]
        );

        let again = dedup.deduplicate(outcome.unique.clone());
        assert_eq!(again.unique, outcome.unique);
        assert!(again.duplicates.is_empty());
    }

    #[test]
    fn rejected_duplicates_extend_sources() {
        let outcome = Deduplicator::default().deduplicate(sample());
        assert_eq!(outcome.unique[0].sources, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(outcome.unique[1].sources, vec!["a".to_string(), "c".to_string()]);
        assert!(outcome.unique[2].sources.is_empty());
        assert!(outcome.unique[0].normalized_url.is_some());
        assert!(outcome.unique[0].content_fingerprint.is_some());
    }

    #[test]
    fn method_selection() {
        let url_only = Deduplicator::default().with_method(DedupMethod::UrlOnly);
        assert_eq!(url_only.deduplicate(sample()).unique.len(), 4);

        let content_only = Deduplicator::default().with_method(DedupMethod::ContentOnly);
        assert_eq!(content_only.deduplicate(sample()).unique.len(), 4);
    }

    #[test]
    fn merge_picks_best_and_unions_sources() {
        let mut low = result("https://a.com/x", "Title", "short", "bing");
        low.relevance_score = 40.0;
        let mut high = result("https://a.com/x/", "Title", "s", "brave");
        high.relevance_score = 70.0;
        let long_snippet = result("https://www.a.com/x", "Title", "a much longer snippet", "ddg");

        let merged = Deduplicator::merge_duplicates(vec![low, high, long_snippet]).unwrap();
        assert_eq!(merged.provider, "brave");
        assert_eq!(
            merged.sources,
            vec!["brave".to_string(), "bing".to_string(), "ddg".to_string()]
        );
        assert!(Deduplicator::merge_duplicates(vec![]).is_none());
    }

    #[test]
    fn find_duplicate_groups() {
        let dedup = Deduplicator::default();
        let groups = dedup.find_duplicates(&sample());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["https://example.com/rust"].len(), 2);
    }

    #[test]
    fn stats_round_to_one_decimal() {
        let stats = Deduplicator::default().stats(3, 2);
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(stats.reduction_percent, 33.3);
        assert_eq!(Deduplicator::default().stats(0, 0).reduction_percent, 0.0);
    }
}
