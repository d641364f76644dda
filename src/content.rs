//! Artifact retrieval for resolved articles.
//!
//! The PMC implementation looks up the article's PubMed Central id with
//! elink, then writes plain text, PDF and reference-list files under a corpus
//! directory. It shares the NCBI [`RateLimiter`] with the resolver.

use crate::client::PubMedClient;
use crate::error::{HarvestError, Result};
use crate::parse::{parse_elink_pmc_id, parse_pmc_fulltext, parse_pmc_references};
use crate::rate_limit::RateLimiter;
use crate::types::ArtifactKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Default root for PMC article pages.
pub const PMC_ARTICLES_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

/// Fetches content artifacts for a canonical id and stores them under `filename`.
///
/// Each artifact succeeds or fails independently; failures are reported as
/// `false`, never as errors.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_text(&self, canonical_id: &str, filename: &str) -> bool;

    async fn fetch_pdf(&self, canonical_id: &str, filename: &str) -> bool;

    async fn fetch_reference_list(&self, canonical_id: &str, filename: &str) -> bool;

    /// Dispatch on `kind`.
    async fn fetch(&self, kind: ArtifactKind, canonical_id: &str, filename: &str) -> bool {
        match kind {
            ArtifactKind::Text => self.fetch_text(canonical_id, filename).await,
            ArtifactKind::Pdf => self.fetch_pdf(canonical_id, filename).await,
            ArtifactKind::References => self.fetch_reference_list(canonical_id, filename).await,
        }
    }

    /// Read back an artifact previously stored under `filename`.
    async fn load(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>> {
        Err(HarvestError::NotFound(format!("{} artifact {}", kind, filename)))
    }
}

/// [`ContentFetcher`] backed by PubMed Central.
#[derive(Clone)]
pub struct PmcContentFetcher {
    client: PubMedClient,
    limiter: RateLimiter,
    corpus_dir: PathBuf,
    articles_url: String,
}

impl PmcContentFetcher {
    pub fn new(client: PubMedClient, limiter: RateLimiter, corpus_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            limiter,
            corpus_dir: corpus_dir.into(),
            articles_url: PMC_ARTICLES_URL.to_string(),
        }
    }

    /// Override the PMC article page root (useful for testing).
    pub fn with_articles_url(mut self, url: &str) -> Self {
        self.articles_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    /// Where the artifact of `kind` for `filename` is written.
    pub fn artifact_path(&self, kind: ArtifactKind, filename: &str) -> PathBuf {
        let (dir, ext) = match kind {
            ArtifactKind::Text => ("txt", "txt"),
            ArtifactKind::Pdf => ("pdf", "pdf"),
            ArtifactKind::References => ("ref", "txt"),
        };
        self.corpus_dir.join(dir).join(format!("{}.{}", filename, ext))
    }

    async fn pmc_id(&self, pmid: &str) -> Result<Option<String>> {
        self.limiter.acquire().await;
        let params = [
            ("dbfrom", "pubmed"),
            ("db", "pmc"),
            ("id", pmid),
            ("retmode", "xml"),
        ];
        let body = self.client.get("elink.fcgi", &params).await?;
        let pmc_id = parse_elink_pmc_id(&body)?;
        match &pmc_id {
            Some(id) => debug!(pmid, pmc_id = %id, "Found PMC id"),
            None => debug!(pmid, "No PMC id"),
        }
        Ok(pmc_id)
    }

    async fn pmc_article_xml(&self, pmc_id: &str) -> Result<String> {
        self.limiter.acquire().await;
        let params = [("db", "pmc"), ("id", pmc_id), ("retmode", "xml")];
        self.client.get("efetch.fcgi", &params).await
    }

    async fn write(&self, kind: ArtifactKind, filename: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.artifact_path(kind, filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    async fn try_text(&self, pmid: &str, filename: &str) -> Result<bool> {
        let Some(pmc_id) = self.pmc_id(pmid).await? else {
            return Ok(false);
        };
        let xml = self.pmc_article_xml(&pmc_id).await?;
        let Some(text) = parse_pmc_fulltext(&xml)? else {
            debug!(pmid, pmc_id = %pmc_id, "PMC article has no usable body text");
            return Ok(false);
        };
        let path = self.write(ArtifactKind::Text, filename, text.as_bytes()).await?;
        info!(pmid, path = %path.display(), "Saved full text");
        Ok(true)
    }

    async fn try_pdf(&self, pmid: &str, filename: &str) -> Result<bool> {
        let Some(pmc_id) = self.pmc_id(pmid).await? else {
            return Ok(false);
        };
        let candidates = [
            format!("{}/PMC{}/pdf/", self.articles_url, pmc_id),
            format!("{}/PMC{}/pdf/main.pdf", self.articles_url, pmc_id),
        ];
        for url in &candidates {
            self.limiter.acquire().await;
            match self.client.get_bytes(url).await {
                Ok((Some(content_type), body)) if content_type.contains("pdf") => {
                    let path = self.write(ArtifactKind::Pdf, filename, &body).await?;
                    info!(pmid, path = %path.display(), "Saved PDF");
                    return Ok(true);
                }
                Ok((content_type, _)) => {
                    debug!(url = %url, content_type = ?content_type, "Not a PDF response");
                }
                Err(e) => debug!(url = %url, error = %e, "PDF request failed"),
            }
        }
        Ok(false)
    }

    async fn try_references(&self, pmid: &str, filename: &str) -> Result<bool> {
        let Some(pmc_id) = self.pmc_id(pmid).await? else {
            return Ok(false);
        };
        let xml = self.pmc_article_xml(&pmc_id).await?;
        let refs = parse_pmc_references(&xml)?;
        if refs.is_empty() {
            return Ok(false);
        }
        let mut contents = refs.join("\n");
        contents.push('\n');
        let path = self
            .write(ArtifactKind::References, filename, contents.as_bytes())
            .await?;
        info!(pmid, count = refs.len(), path = %path.display(), "Saved reference list");
        Ok(true)
    }
}

fn report(kind: ArtifactKind, pmid: &str, result: Result<bool>) -> bool {
    match result {
        Ok(found) => found,
        Err(e) => {
            warn!(%kind, pmid, error = %e, "Artifact retrieval failed");
            false
        }
    }
}

#[async_trait]
impl ContentFetcher for PmcContentFetcher {
    #[instrument(skip(self))]
    async fn fetch_text(&self, canonical_id: &str, filename: &str) -> bool {
        report(
            ArtifactKind::Text,
            canonical_id,
            self.try_text(canonical_id, filename).await,
        )
    }

    #[instrument(skip(self))]
    async fn fetch_pdf(&self, canonical_id: &str, filename: &str) -> bool {
        report(
            ArtifactKind::Pdf,
            canonical_id,
            self.try_pdf(canonical_id, filename).await,
        )
    }

    #[instrument(skip(self))]
    async fn fetch_reference_list(&self, canonical_id: &str, filename: &str) -> bool {
        report(
            ArtifactKind::References,
            canonical_id,
            self.try_references(canonical_id, filename).await,
        )
    }

    async fn load(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(kind, filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HarvestError::NotFound(
                format!("{} file {}", kind, path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fetcher(dir: &Path) -> PmcContentFetcher {
        let client = PubMedClient::new()
            .unwrap()
            .with_base_url("http://127.0.0.1:1/eutils")
            .unwrap();
        PmcContentFetcher::new(client, RateLimiter::new(Duration::from_millis(1)), dir)
            .with_articles_url("http://127.0.0.1:1/pmc/articles/")
    }

    #[test]
    fn test_artifact_paths() {
        let f = fetcher(Path::new("/corpus"));
        assert_eq!(
            f.artifact_path(ArtifactKind::Text, "Smith_123"),
            PathBuf::from("/corpus/txt/Smith_123.txt")
        );
        assert_eq!(
            f.artifact_path(ArtifactKind::Pdf, "Smith_123"),
            PathBuf::from("/corpus/pdf/Smith_123.pdf")
        );
        assert_eq!(
            f.artifact_path(ArtifactKind::References, "Smith_123"),
            PathBuf::from("/corpus/ref/Smith_123.txt")
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());

        for kind in ArtifactKind::ALL {
            assert!(!f.fetch(kind, "123", "Smith_123").await);
        }
        assert!(!dir.path().join("txt").exists());
        // one elink attempt per artifact
        assert_eq!(f.limiter.granted().await, 3);
    }

    #[tokio::test]
    async fn test_load_reads_stored_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());
        let path = f.artifact_path(ArtifactKind::References, "Lee_7");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "1. Cited work.\n").unwrap();

        let bytes = f.load(ArtifactKind::References, "Lee_7").await.unwrap();
        assert_eq!(bytes, b"1. Cited work.\n");
        assert!(matches!(
            f.load(ArtifactKind::Pdf, "Lee_7").await,
            Err(HarvestError::NotFound(_))
        ));
    }
}
