//! Result pipeline
//!
//! Raw provider results pass through three stages, in order:
//! - safety: score URL and content, split off flagged results
//! - dedup: drop exact and near-duplicates against everything kept so far
//! - rank: seven-factor relevance score, stable sort descending

mod dedup;
mod ranker;
mod safety;

pub use dedup::{
    content_fingerprint, domain_of, normalize_url, similarity, DedupOutcome, DedupStats,
    Deduplicator,
};
pub use ranker::{extract_terms, QualityTier, Ranker};
pub use safety::{extract_domain, DomainReputation, SafetyFilter};

use crate::config::Settings;
use crate::error::Result;
use crate::results::SearchResult;
use tracing::debug;

/// What one pipeline pass produced
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    /// Deduplicated and ranked results, including previously accumulated ones
    pub results: Vec<SearchResult>,
    /// Results the safety filter rejected in this pass
    pub flagged: Vec<SearchResult>,
    pub duplicates_removed: usize,
}

/// Safety filter, deduplicator and ranker wired together
#[derive(Clone)]
pub struct Pipeline {
    safety: SafetyFilter,
    dedup: Deduplicator,
    ranker: Ranker,
}

impl Pipeline {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            safety: SafetyFilter::new(&settings.safety)?,
            dedup: Deduplicator::new(&settings.dedup),
            ranker: Ranker::new(&settings.ranking)?,
        })
    }

    pub fn from_parts(safety: SafetyFilter, dedup: Deduplicator, ranker: Ranker) -> Self {
        Self {
            safety,
            dedup,
            ranker,
        }
    }

    /// Run a tier's raw results through the pipeline
    ///
    /// `accumulated` holds the output of earlier passes; it goes first into
    /// deduplication so results already kept win over new duplicates.
    pub fn process(
        &self,
        query: &str,
        accumulated: Vec<SearchResult>,
        raw: Vec<SearchResult>,
    ) -> PipelineOutput {
        let raw_count = raw.len();
        let (safe, flagged) = self.safety.filter_results(raw, self.safety.min_score());

        let mut combined = accumulated;
        combined.extend(safe);
        let outcome = self.dedup.deduplicate(combined);
        let results = self.ranker.rank(outcome.unique, query);

        debug!(
            "Pipeline: {} raw, {} flagged, {} duplicates, {} total",
            raw_count,
            flagged.len(),
            outcome.duplicates.len(),
            results.len()
        );

        PipelineOutput {
            results,
            flagged,
            duplicates_removed: outcome.duplicates.len(),
        }
    }

    pub fn safety(&self) -> &SafetyFilter {
        &self.safety
    }

    pub fn safety_mut(&mut self) -> &mut SafetyFilter {
        &mut self.safety
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: &str, title: &str, provider: &str) -> SearchResult {
        SearchResult::new(url, title, provider).with_snippet(format!("About {}", title))
    }

    #[test]
    fn filters_dedups_and_ranks() {
        let mut pipeline = Pipeline::new(&Settings::default()).unwrap();
        pipeline.safety_mut().add_to_blacklist("malware.example");

        let output = pipeline.process(
            "rust",
            vec![],
            vec![
                raw("https://docs.example.org/rust", "Rust reference manual", "a"),
                raw("https://www.docs.example.org/rust/", "Rust language handbook", "b"),
                raw("https://malware.example/rust", "Rust downloads mirror", "b"),
                raw("https://blog.example.com/async", "Writing async services", "a"),
            ],
        );

        assert_eq!(output.results.len(), 2);
        assert_eq!(output.flagged.len(), 1);
        assert_eq!(output.duplicates_removed, 1);
        assert!(output.results.iter().all(|r| r.ranking_factors.is_some()));
        assert!(output.results.iter().all(|r| r.safety.is_some()));
        assert!(output.results[0].relevance_score >= output.results[1].relevance_score);
    }

    #[test]
    fn accumulated_results_win_over_new_duplicates() {
        let pipeline = Pipeline::new(&Settings::default()).unwrap();
        let first = pipeline.process(
            "tokio",
            vec![],
            vec![raw("https://tokio.rs/tokio/tutorial", "Tokio tutorial", "tier1")],
        );
        let second = pipeline.process(
            "tokio",
            first.results,
            vec![raw("https://tokio.rs/tokio/tutorial/", "Tokio tutorial again", "tier2")],
        );

        assert_eq!(second.results.len(), 1);
        assert_eq!(second.results[0].provider, "tier1");
        assert_eq!(second.results[0].sources, vec!["tier1".to_string(), "tier2".to_string()]);
        assert_eq!(second.duplicates_removed, 1);
    }
}
