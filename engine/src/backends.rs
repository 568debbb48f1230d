//! Backend construction from configuration
//!
//! Every capability is chosen by name in the config file and built once at
//! startup. Missing required parameters (an endpoint, an API key variable
//! that is not set) fail here, never at call time.

use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, NliConfig, PapersConfig, SpanDetectorConfig, SummarizerConfig};
use crate::grounding::{GroundingValidator, Validator, ValidatorThresholds};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::LLMProvider;
use crate::nli::{HttpNliBackend, LlmNliBackend, MockNliBackend, NliBackend};
use crate::papers::{PaperSource, SemanticScholarSource};
use crate::spans::{HttpSpanDetector, SpanDetector, StaticSpanDetector};
use crate::summarize::{LlmSummarizer, MockSummarizer, Summarizer};

/// Environment lookup, swappable in tests
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn required_key(env: EnvLookup<'_>, var: &str, backend: &str) -> Result<String, EngineError> {
    env(var).filter(|v| !v.is_empty()).ok_or_else(|| {
        EngineError::Config(format!(
            "{} backend requires an API key in the {} environment variable",
            backend, var
        ))
    })
}

/// Chat provider for the summarizer and hypothesis generator.
/// `None` for the mock backend.
pub fn create_llm_provider(
    config: &SummarizerConfig,
    env: EnvLookup<'_>,
) -> Result<Option<Arc<dyn LLMProvider>>, EngineError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.backend.as_str() {
        "openai" => {
            let key = required_key(env, &config.api_key_env, "openai")?;
            Ok(Some(Arc::new(OpenAIProvider::new(
                &config.base_url,
                &config.model,
                key,
                timeout,
            ))))
        }
        "ollama" => Ok(Some(Arc::new(OllamaProvider::new(
            &config.base_url,
            &config.model,
            timeout,
        )))),
        "mock" => Ok(None),
        other => Err(EngineError::Config(format!("Unknown summarizer backend: {}", other))),
    }
}

pub fn create_summarizer(
    config: &SummarizerConfig,
    env: EnvLookup<'_>,
) -> Result<Arc<dyn Summarizer>, EngineError> {
    let summarizer: Arc<dyn Summarizer> = match create_llm_provider(config, env)? {
        Some(provider) => Arc::new(LlmSummarizer::new(provider, Some(config.temperature))),
        None => Arc::new(MockSummarizer::new()),
    };
    info!(backend = %config.backend, model = %config.model, "Summarizer ready");
    Ok(summarizer)
}

pub fn create_nli_backend(config: &NliConfig, env: EnvLookup<'_>) -> Result<Arc<dyn NliBackend>, EngineError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let backend: Arc<dyn NliBackend> = match config.backend.as_str() {
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| EngineError::Config("http NLI backend requires nli.url".to_string()))?;
            Arc::new(HttpNliBackend::new(url, timeout)?)
        }
        "llm" => {
            let model = config
                .model
                .as_deref()
                .filter(|m| !m.is_empty())
                .ok_or_else(|| EngineError::Config("llm NLI backend requires nli.model".to_string()))?;
            let key = required_key(env, &config.api_key_env, "llm NLI")?;
            let provider = Arc::new(OpenAIProvider::new(&config.base_url, model, key, timeout));
            Arc::new(LlmNliBackend::new(provider))
        }
        "mock" => Arc::new(MockNliBackend::new()),
        other => return Err(EngineError::Config(format!("Unknown NLI backend: {}", other))),
    };
    Ok(backend)
}

pub fn create_span_detector(config: &SpanDetectorConfig) -> Result<Arc<dyn SpanDetector>, EngineError> {
    let detector: Arc<dyn SpanDetector> = match config.backend.as_str() {
        "http" => {
            let url = config.url.as_deref().ok_or_else(|| {
                EngineError::Config("http span detector requires span_detector.url".to_string())
            })?;
            Arc::new(HttpSpanDetector::new(url, Duration::from_secs(config.timeout_secs))?)
        }
        "mock" => Arc::new(StaticSpanDetector::empty()),
        other => return Err(EngineError::Config(format!("Unknown span detector backend: {}", other))),
    };
    Ok(detector)
}

/// Grounding validator with thresholds resolved against `env`
pub fn create_validator(config: &Config, env: EnvLookup<'_>) -> Result<Arc<dyn Validator>, EngineError> {
    let detector = create_span_detector(&config.span_detector)?;
    let nli = create_nli_backend(&config.nli, env)?;
    let thresholds = ValidatorThresholds::resolve_with(&config.validator, env);

    info!(
        detector = detector.name(),
        nli = nli.name(),
        grounded_min = thresholds.grounded_min,
        chunk_size = thresholds.chunk_size,
        "Grounding validator ready"
    );
    Ok(Arc::new(GroundingValidator::new(detector, nli, thresholds)))
}

pub fn create_paper_source(config: &PapersConfig, env: EnvLookup<'_>) -> Result<Arc<dyn PaperSource>, EngineError> {
    let key = env(config.api_key_env.as_str());
    Ok(Arc::new(SemanticScholarSource::new(
        &config.base_url,
        key,
        Duration::from_secs(config.timeout_secs),
    )?))
}

/// Every backend the CLI needs, built from one config
pub struct Backends {
    pub summarizer: Arc<dyn Summarizer>,
    pub validator: Arc<dyn Validator>,
    pub llm: Option<Arc<dyn LLMProvider>>,
    pub papers: Arc<dyn PaperSource>,
}

impl Backends {
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        Self::from_config_with(config, &process_env)
    }

    pub fn from_config_with(config: &Config, env: EnvLookup<'_>) -> Result<Self, EngineError> {
        Ok(Self {
            summarizer: create_summarizer(&config.summarizer, env)?,
            validator: create_validator(config, env)?,
            llm: create_llm_provider(&config.summarizer, env)?,
            papers: create_paper_source(&config.papers, env)?,
        })
    }
}
