//! The NCBI E-utilities HTTP client.
//!
//! This client does not rate-limit on its own: callers acquire the shared
//! [`crate::rate_limit::RateLimiter`] before each request so that search,
//! fetch and content retrieval all draw from the same gate.

use crate::config::PubMedConfig;
use crate::error::{HarvestError, Result};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default E-utilities endpoint root.
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

const USER_AGENT: &str = concat!("refharvest/", env!("CARGO_PKG_VERSION"));

/// Async client for the PubMed / PMC E-utilities.
#[derive(Clone)]
pub struct PubMedClient {
    pub(crate) http: Client,
    pub(crate) base_url: Url,
    pub(crate) api_key: Option<String>,
    pub(crate) tool: Option<String>,
    pub(crate) email: Option<String>,
}

impl PubMedClient {
    /// Create a client with default settings and no API key.
    pub fn new() -> Result<Self> {
        Self::from_config(&PubMedConfig::default())
    }

    /// Create a client from configuration.
    pub fn from_config(config: &PubMedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: parse_base_url(&config.base_url)?,
            api_key: config.api_key.clone(),
            tool: config.tool.clone(),
            email: config.email.clone(),
        })
    }

    /// Override the base URL (useful for testing).
    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        self.base_url = parse_base_url(url)?;
        Ok(self)
    }

    /// Full URL for an E-utilities endpoint such as `esearch.fcgi`.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        self.base_url
            .join(endpoint)
            .map_err(|e| HarvestError::Config(format!("Invalid endpoint {}: {}", endpoint, e)))
    }

    /// GET an E-utilities endpoint and return the body as text.
    pub(crate) async fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        let url = self.endpoint_url(endpoint)?;
        let response = self
            .http
            .get(url)
            .query(params)
            .query(&self.identity_params())
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.text().await?)
    }

    /// GET an absolute URL and return its content type and raw body.
    pub(crate) async fn get_bytes(&self, url: &str) -> Result<(Option<String>, Vec<u8>)> {
        let response = self.http.get(url).send().await?;
        let response = check_status(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase());
        let body = response.bytes().await?;
        Ok((content_type, body.to_vec()))
    }

    /// `api_key`, `tool` and `email` parameters NCBI asks clients to send.
    fn identity_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = Vec::new();
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }
        if let Some(tool) = &self.tool {
            params.push(("tool", tool.as_str()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.as_str()));
        }
        params
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    // A trailing slash makes `Url::join` append instead of replacing the last segment.
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|e| HarvestError::Config(format!("Invalid base URL {}: {}", raw, e)))
}

/// Map HTTP status codes to errors, passing successful responses through.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status().as_u16();

    match status {
        200..=299 => Ok(response),
        404 => Err(HarvestError::NotFound("Resource not found".to_string())),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(HarvestError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(HarvestError::Api {
                status,
                message: body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_joins_under_base() {
        let client = PubMedClient::new().unwrap();
        let url = client.endpoint_url("esearch.fcgi").unwrap();
        assert_eq!(
            url.as_str(),
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi"
        );
    }

    #[test]
    fn test_with_base_url_accepts_trailing_slash() {
        let client = PubMedClient::new()
            .unwrap()
            .with_base_url("http://localhost:9999/eutils/")
            .unwrap();
        let url = client.endpoint_url("efetch.fcgi").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9999/eutils/efetch.fcgi");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(PubMedClient::new().unwrap().with_base_url("not a url").is_err());
    }
}
