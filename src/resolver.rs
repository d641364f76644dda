//! Title → PubMed record resolution.
//!
//! Walks the candidate strategies from [`crate::query::candidate_queries`] in
//! order, spending one rate-limiter slot per outbound call, and stops at the
//! first fetched record whose title passes [`crate::matching::is_good_match`].

use crate::matching::{is_good_match, DEFAULT_THRESHOLD};
use crate::query::candidate_queries;
use crate::rate_limit::RateLimiter;
use crate::search::{ArticleSource, Lookup};
use crate::types::ResolvedRecord;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Default number of ids requested per search.
pub const DEFAULT_MAX_RESULTS: u32 = 5;

/// Outcome of [`ArticleResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Accepted record, with the zero-based index of the strategy that found it.
    Matched {
        record: ResolvedRecord,
        strategy: usize,
    },
    NotFound,
}

impl Resolution {
    pub fn record(&self) -> Option<&ResolvedRecord> {
        match self {
            Self::Matched { record, .. } => Some(record),
            Self::NotFound => None,
        }
    }

    pub fn into_record(self) -> Option<ResolvedRecord> {
        match self {
            Self::Matched { record, .. } => Some(record),
            Self::NotFound => None,
        }
    }
}

/// Resolves noisy citation titles against an [`ArticleSource`].
#[derive(Clone)]
pub struct ArticleResolver {
    source: Arc<dyn ArticleSource>,
    limiter: RateLimiter,
    max_results: u32,
    threshold: f64,
}

impl ArticleResolver {
    pub fn new(source: Arc<dyn ArticleSource>, limiter: RateLimiter) -> Self {
        Self {
            source,
            limiter,
            max_results: DEFAULT_MAX_RESULTS,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// The gate this resolver draws from.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Resolve `title` to a record, trying each strategy at most once.
    ///
    /// Search and fetch failures are logged by the source and only move the
    /// walk on to the next strategy; exhaustion is reported as
    /// [`Resolution::NotFound`].
    #[instrument(skip(self))]
    pub async fn resolve(&self, title: &str, author: Option<&str>) -> Resolution {
        let strategies = candidate_queries(title, author);
        if strategies.is_empty() {
            debug!("No usable search strategy for title");
            return Resolution::NotFound;
        }

        for (strategy, query) in strategies.iter().enumerate() {
            self.limiter.acquire().await;
            let ids = match self.source.search(query, self.max_results).await {
                Lookup::Found(ids) => ids,
                Lookup::NotFound | Lookup::TransientError(_) => {
                    debug!(strategy, query = %query, "Strategy returned no ids");
                    continue;
                }
            };
            let Some(pmid) = ids.first() else {
                continue;
            };

            self.limiter.acquire().await;
            let record = match self.source.fetch_details(pmid).await {
                Lookup::Found(record) => record,
                Lookup::NotFound | Lookup::TransientError(_) => {
                    debug!(strategy, pmid = %pmid, "Could not fetch top candidate");
                    continue;
                }
            };

            if is_good_match(title, &record.title, self.threshold) {
                info!(strategy, pmid = %record.id, "Matched citation title");
                return Resolution::Matched { record, strategy };
            }

            debug!(
                strategy,
                pmid = %record.id,
                candidate = %record.title,
                "Candidate title rejected"
            );
        }

        info!(strategies = strategies.len(), "No PubMed match");
        Resolution::NotFound
    }
}
