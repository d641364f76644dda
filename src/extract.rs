//! Citation extraction: splitting a pasted reference section into items and
//! decomposing each into title, first author, journal and year.
//!
//! [`split_references`] is cheap and local; the orchestrator uses it for the
//! pre-count at submission. [`LlmExtractor`] asks an OpenAI-compatible chat
//! endpoint for the structured fields and falls back to the same heuristics
//! [`HeuristicExtractor`] uses whenever a single reference cannot be parsed.

use crate::config::LlmConfig;
use crate::error::{HarvestError, Result};
use crate::types::CitationItem;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Segments raw citation text into ordered items.
#[async_trait]
pub trait CitationExtractor: Send + Sync {
    /// Items in source order. Every field except `raw_text` may be missing.
    async fn segment(&self, raw_text: &str) -> Result<Vec<CitationItem>>;
}

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hard-coded regex must compile"))
}

fn numbering_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"\n\d+\.\s+", r"\n\[\d+\]\s*", r"\n\(\d+\)\s*", r"\n\d+\)\s+"]
            .iter()
            .map(|p| Regex::new(p).expect("hard-coded regex must compile"))
            .collect()
    })
}

fn leading_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"^\s*(?:\d+\.\s+|\[\d+\]\s*|\(\d+\)\s*|\d+\)\s+)")
}

/// Split a reference section into individual reference strings.
///
/// Numbered styles (`1. `, `[1]`, `(1)`, `1) `) are tried in that order at
/// line starts and the first style that yields more than one reference wins.
/// Otherwise references are separated by blank lines. The numbering marker
/// of the first reference is removed as well.
pub fn split_references(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");

    let mut refs: Vec<String> = numbering_patterns()
        .iter()
        .map(|pattern| non_empty(pattern.split(&text)))
        .find(|refs| refs.len() > 1)
        .unwrap_or_else(|| non_empty(text.split("\n\n")));

    if let Some(first) = refs.first_mut() {
        let stripped = leading_marker().replace(first, "").trim().to_string();
        if !stripped.is_empty() {
            *first = stripped;
        }
    }
    refs
}

fn non_empty<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Normalize an author surname for filenames: whitespace becomes `-`, other
/// punctuation is dropped, and an empty result becomes `"Unknown"`.
pub fn clean_author_name(name: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    static PUNCT: OnceLock<Regex> = OnceLock::new();

    let dashed = compiled(&WS, r"\s+").replace_all(name.trim(), "-");
    let cleaned = compiled(&PUNCT, r"[^\w\-]").replace_all(&dashed, "");
    if cleaned.is_empty() {
        "Unknown".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// Best-effort title: a quoted phrase, else the sentence after the author
/// block, else the first ten words.
pub fn heuristic_title(text: &str) -> Option<String> {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    static AFTER_AUTHORS: OnceLock<Regex> = OnceLock::new();

    let captured = compiled(&QUOTED, r#""([^"]+)""#)
        .captures(text)
        .or_else(|| compiled(&AFTER_AUTHORS, r"[A-Z][^.]*\.[^A-Z]*([A-Z][^.]*\.)").captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let title = captured.unwrap_or_else(|| {
        text.split_whitespace()
            .take(10)
            .collect::<Vec<_>>()
            .join(" ")
    });
    let title = title.trim().trim_end_matches(['.', ',', ';']).trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// First word of the reference, cleaned as a surname.
pub fn heuristic_first_author(text: &str) -> String {
    let first = text
        .split_whitespace()
        .next()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .unwrap_or_default();
    clean_author_name(&first)
}

/// First plausible four-digit publication year.
pub fn heuristic_year(text: &str) -> Option<String> {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    compiled(&YEAR, r"\b(19\d{2}|20\d{2})\b")
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// A PMID quoted in the reference itself (`PMID: 12345678`).
pub fn quoted_pmid(text: &str) -> Option<String> {
    static PMID: OnceLock<Regex> = OnceLock::new();
    compiled(&PMID, r"(?i)\bPMID:?\s*(\d{1,9})\b")
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Decompose one reference with local heuristics only.
pub fn heuristic_item(reference: &str) -> CitationItem {
    CitationItem {
        raw_text: reference.to_string(),
        title: heuristic_title(reference),
        first_author: Some(heuristic_first_author(reference)),
        journal: None,
        year: heuristic_year(reference),
        known_id: quoted_pmid(reference),
    }
}

/// Offline extractor built from [`split_references`] and the heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

#[async_trait]
impl CitationExtractor for HeuristicExtractor {
    async fn segment(&self, raw_text: &str) -> Result<Vec<CitationItem>> {
        Ok(split_references(raw_text)
            .iter()
            .map(|r| heuristic_item(r))
            .collect())
    }
}

const SYSTEM_PROMPT: &str =
    "You are a precise academic reference parser. Extract information accurately and return valid JSON.";

fn user_prompt(reference: &str) -> String {
    format!(
        r#"Extract these fields from the academic reference below:
1. Article title (the main title of the paper, not a book or chapter title)
2. First author's last name (surname only; replace spaces with dashes)
3. Journal name
4. Publication year

Reference: "{reference}"

Reply with JSON only:
{{
    "title": "title or null",
    "first_author": "surname of the first author, or the first significant word if there is no author",
    "journal": "journal name or null",
    "year": "year or null"
}}

Use null for any field you cannot extract reliably."#
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Fields the model is asked to return.
#[derive(Debug, Default, Deserialize)]
struct ExtractedFields {
    #[serde(default)]
    title: Option<serde_json::Value>,
    #[serde(default)]
    first_author: Option<serde_json::Value>,
    #[serde(default)]
    journal: Option<serde_json::Value>,
    #[serde(default)]
    year: Option<serde_json::Value>,
}

fn field_text(value: &Option<serde_json::Value>) -> Option<String> {
    let text = match value.as_ref()? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty() && !text.eq_ignore_ascii_case("null")).then_some(text)
}

/// Parse a model reply: the whole body as JSON, else the first `{...}` block.
fn parse_reply(content: &str) -> Result<ExtractedFields> {
    static OBJECT: OnceLock<Regex> = OnceLock::new();

    let content = content.trim();
    if let Ok(fields) = serde_json::from_str(content) {
        return Ok(fields);
    }
    let block = compiled(&OBJECT, r"(?s)\{.*\}")
        .find(content)
        .ok_or_else(|| HarvestError::Parse("No JSON object in model reply".to_string()))?;
    Ok(serde_json::from_str(block.as_str())?)
}

/// Extractor backed by an OpenAI-compatible chat-completions endpoint.
///
/// One request per reference, sequentially. A failure on one reference
/// degrades that reference to the local heuristics; a missing or rejected
/// API key fails the whole batch.
pub struct LlmExtractor {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmExtractor {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    #[instrument(skip(self, api_key, reference), fields(len = reference.len()))]
    async fn extract_one(&self, api_key: &str, reference: &str) -> Result<CitationItem> {
        let prompt = user_prompt(reference);
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            401 | 403 => {
                return Err(HarvestError::Extraction(format!(
                    "Language model rejected the API key (HTTP {})",
                    status
                )))
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                return Err(HarvestError::Api { status, message });
            }
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| HarvestError::Parse("Empty model reply".to_string()))?;
        let fields = parse_reply(&content)?;

        Ok(CitationItem {
            raw_text: reference.to_string(),
            title: field_text(&fields.title).or_else(|| heuristic_title(reference)),
            first_author: Some(clean_author_name(
                &field_text(&fields.first_author).unwrap_or_default(),
            )),
            journal: field_text(&fields.journal),
            year: field_text(&fields.year),
            known_id: quoted_pmid(reference),
        })
    }
}

#[async_trait]
impl CitationExtractor for LlmExtractor {
    async fn segment(&self, raw_text: &str) -> Result<Vec<CitationItem>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| HarvestError::Extraction("OPENAI_API_KEY is not set".to_string()))?;

        let references = split_references(raw_text);
        debug!(count = references.len(), "Split reference section");

        let mut items = Vec::with_capacity(references.len());
        for (index, reference) in references.iter().enumerate() {
            let item = match self.extract_one(api_key, reference).await {
                Ok(item) => item,
                Err(e @ HarvestError::Extraction(_)) => return Err(e),
                Err(e) => {
                    warn!(index, error = %e, "Model extraction failed, using heuristics");
                    heuristic_item(reference)
                }
            };
            items.push(item);
        }
        Ok(items)
    }
}
