//! Remote search and fetch: the contract the resolver consumes, and its
//! PubMed E-utilities implementation.

use crate::client::PubMedClient;
use crate::error::{HarvestError, Result};
use crate::parse::{parse_efetch_article, parse_esearch_ids};
use crate::types::ResolvedRecord;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Tagged outcome of one outbound lookup.
///
/// Keeps "nothing there" apart from "the call broke" without using errors
/// for control flow; the resolver moves on to its next strategy either way.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    TransientError(String),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Convert a fallible optional result, classifying errors as transient.
    pub fn from_result(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Self::Found(value),
            Ok(None) | Err(HarvestError::NotFound(_)) => Self::NotFound,
            Err(e) => Self::TransientError(e.to_string()),
        }
    }
}

/// Remote article database: ranked id search plus per-id detail fetch.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Up to `max_results` identifiers for `query`, most relevant first.
    async fn search(&self, query: &str, max_results: u32) -> Lookup<Vec<String>>;

    /// Full record for one identifier.
    async fn fetch_details(&self, id: &str) -> Lookup<ResolvedRecord>;
}

impl PubMedClient {
    /// Run an esearch against PubMed, sorted by relevance.
    #[instrument(skip(self))]
    pub async fn esearch(&self, term: &str, max_results: u32) -> Result<Vec<String>> {
        let retmax = max_results.to_string();
        let params = [
            ("db", "pubmed"),
            ("term", term),
            ("retmax", retmax.as_str()),
            ("retmode", "xml"),
            ("sort", "relevance"),
        ];

        let body = self.get("esearch.fcgi", &params).await?;
        let ids = parse_esearch_ids(&body)?;
        debug!(count = ids.len(), "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    /// Fetch and parse one PubMed record.
    #[instrument(skip(self))]
    pub async fn efetch(&self, pmid: &str) -> Result<Option<ResolvedRecord>> {
        let params = [("db", "pubmed"), ("id", pmid), ("retmode", "xml")];
        let body = self.get("efetch.fcgi", &params).await?;
        parse_efetch_article(&body)
    }
}

#[async_trait]
impl ArticleSource for PubMedClient {
    async fn search(&self, query: &str, max_results: u32) -> Lookup<Vec<String>> {
        match self.esearch(query, max_results).await {
            Ok(ids) if ids.is_empty() => Lookup::NotFound,
            Ok(ids) => Lookup::Found(ids),
            Err(e) => {
                warn!(error = %e, query, "PubMed search failed");
                Lookup::TransientError(e.to_string())
            }
        }
    }

    async fn fetch_details(&self, id: &str) -> Lookup<ResolvedRecord> {
        let lookup = Lookup::from_result(self.efetch(id).await);
        if let Lookup::TransientError(e) = &lookup {
            warn!(error = %e, pmid = id, "PubMed fetch failed");
        }
        lookup
    }
}
