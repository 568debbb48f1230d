//! NLI over HTTP
//!
//! Posts `{"premise", "hypothesis"}` to a classifier endpoint and expects
//! `{"label", "confidence"}` back.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::json;
use std::time::Duration;

use super::{NliBackend, NliPrediction};

pub struct HttpNliBackend {
    url: String,
    client: reqwest::Client,
}

impl HttpNliBackend {
    /// # Errors
    /// `EngineError::Config` when `url` is empty.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(EngineError::Config("NLI URL is required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl NliBackend for HttpNliBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn infer(&self, premise: &str, hypothesis: &str) -> Result<NliPrediction, EngineError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({"premise": premise, "hypothesis": hypothesis}))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("NLI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!(
                "NLI request failed: {} {}",
                status, text
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("NLI response is not JSON: {}", e)))?;

        NliPrediction::from_json(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nli::NliLabel;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_empty_url_is_config_error() {
        let err = HttpNliBackend::new("  ", Duration::from_secs(1)).err();
        assert!(matches!(err, Some(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_infer_parses_prediction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/nli"))
            .and(body_json(json!({"premise": "Paris is in France.", "hypothesis": "Paris"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"label": "entailment", "confidence": 0.97})),
            )
            .mount(&server)
            .await;

        let backend =
            HttpNliBackend::new(format!("{}/nli", server.uri()), Duration::from_secs(5)).unwrap();
        let prediction = backend.infer("Paris is in France.", "Paris").await.unwrap();

        assert_eq!(prediction.label, NliLabel::Entailment);
        assert_eq!(prediction.confidence, 0.97);
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
            .mount(&server)
            .await;

        let backend = HttpNliBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = backend.infer("p", "h").await.unwrap_err();

        assert!(matches!(err, EngineError::Transport(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_missing_confidence_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"label": "NEUTRAL"})))
            .mount(&server)
            .await;

        let backend = HttpNliBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(backend.infer("p", "h").await.is_err());
    }
}
