//! Paper search backends
//!
//! Research branches find evidence through a [`PaperSource`]. The live
//! backend is the Semantic Scholar Graph API; [`StaticPaperSource`] serves a
//! fixed corpus for tests and offline runs.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{Author, Paper};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Fields requested from the search endpoint
const SEARCH_FIELDS: &str = "title,abstract,authors,year,citationCount,fieldsOfStudy";

#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `limit` papers matching `query`, best match first
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Paper>, EngineError>;
}

pub struct SemanticScholarSource {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<WirePaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePaper {
    paper_id: String,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    authors: Vec<WireAuthor>,
    year: Option<i32>,
    citation_count: Option<u64>,
    fields_of_study: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WireAuthor {
    name: Option<String>,
}

impl From<WirePaper> for Paper {
    fn from(wire: WirePaper) -> Self {
        Paper {
            paper_id: wire.paper_id,
            title: wire.title,
            abstract_text: wire.abstract_text,
            authors: wire.authors.into_iter().map(|a| Author { name: a.name }).collect(),
            year: wire.year,
            citation_count: wire.citation_count,
            fields_of_study: wire.fields_of_study.unwrap_or_default(),
            full_text: None,
        }
    }
}

impl SemanticScholarSource {
    /// # Errors
    /// `EngineError::Config` when `base_url` is empty.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(EngineError::Config("Paper search URL is required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }
}

#[async_trait]
impl PaperSource for SemanticScholarSource {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Paper>, EngineError> {
        let limit = limit.to_string();
        let mut request = self
            .client
            .get(format!("{}/paper/search", self.base_url))
            .query(&[
                ("query", query),
                ("limit", limit.as_str()),
                ("fields", SEARCH_FIELDS),
            ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("Paper search failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!(
                "Paper search failed: {} {}",
                status, text
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("Paper search response is invalid: {}", e)))?;

        debug!(query, results = body.data.len(), "Paper search complete");
        Ok(body.data.into_iter().map(Paper::from).collect())
    }
}

/// Fixed corpus; every query returns the first `limit` papers
#[derive(Debug, Clone, Default)]
pub struct StaticPaperSource {
    papers: Vec<Paper>,
}

impl StaticPaperSource {
    pub fn new(papers: Vec<Paper>) -> Self {
        Self { papers }
    }
}

#[async_trait]
impl PaperSource for StaticPaperSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<Paper>, EngineError> {
        Ok(self.papers.iter().take(limit).cloned().collect())
    }
}
