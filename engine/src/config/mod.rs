//! Configuration management
//!
//! This module handles loading, validation, and management of the Grounded configuration.
//! Configuration is stored in TOML format at ~/.grounded/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **summarizer**: Summarization backend (openai, ollama, mock)
//! - **nli**: Natural language inference backend (http, llm, mock)
//! - **span_detector**: Hallucination span detector backend (http, mock)
//! - **validator**: Optional grounding threshold overrides and retry budget
//! - **branch**: Research branch budget and fan-out settings
//! - **hypothesis**: Hypothesis generation settings
//! - **papers**: Paper search backend
//!
//! Every section has defaults, so a partial file is valid. API keys are never
//! stored in the file: backends name the environment variable that holds them.
//!
//! # Examples
//!
//! ```no_run
//! use grounded_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Summarizer: {}", config.summarizer.backend);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Summarization backend
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// NLI backend
    #[serde(default)]
    pub nli: NliConfig,

    /// Span detector backend
    #[serde(default)]
    pub span_detector: SpanDetectorConfig,

    /// Grounding validator overrides
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Research branch settings
    #[serde(default)]
    pub branch: BranchConfig,

    /// Hypothesis generation settings
    #[serde(default)]
    pub hypothesis: HypothesisConfig,

    /// Paper search settings
    #[serde(default)]
    pub papers: PapersConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Summarizer backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Backend name (openai, ollama, mock)
    #[serde(default = "default_summarizer_backend")]
    pub backend: String,

    /// Base URL of the chat-completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_summarizer_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_summarizer_temperature")]
    pub temperature: f32,
}

/// NLI backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NliConfig {
    /// Backend name (http, llm, mock)
    #[serde(default = "default_nli_backend")]
    pub backend: String,

    /// Endpoint of an NLI server (http backend)
    #[serde(default)]
    pub url: Option<String>,

    /// Classifier model (llm backend)
    #[serde(default)]
    pub model: Option<String>,

    /// Chat-completions base URL (llm backend)
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key (llm backend)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

/// Span detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanDetectorConfig {
    /// Backend name (http, mock)
    #[serde(default = "default_span_backend")]
    pub backend: String,

    /// Base URL of the span detection server
    #[serde(default = "default_span_url")]
    pub url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

/// Grounding validator overrides
///
/// Unset thresholds fall through to environment overrides and then to
/// built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounded_min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_conf: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradiction_conf: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<i64>,

    /// Retries after the first attempt when a summary is blocked
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Research branch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Token budget of a single branch
    #[serde(default = "default_max_context_window")]
    pub max_context_window: u64,

    /// Fraction of the budget at which a branch splits
    #[serde(default = "default_split_threshold")]
    pub split_threshold: f64,

    /// Maximum number of non-terminal branches
    #[serde(default = "default_max_branches")]
    pub max_branches: usize,

    /// Papers a branch needs before it generates hypotheses
    #[serde(default = "default_min_papers_for_hypothesis")]
    pub min_papers_for_hypothesis: usize,

    #[serde(default = "default_num_splits")]
    pub default_num_splits: usize,

    #[serde(default = "default_max_iterations_per_branch")]
    pub max_iterations_per_branch: u32,

    #[serde(default = "default_papers_per_iteration")]
    pub papers_per_iteration: usize,

    /// Branches iterated concurrently in one round
    #[serde(default = "default_max_concurrent_branches")]
    pub max_concurrent_branches: usize,
}

/// Hypothesis generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisConfig {
    #[serde(default = "default_hypotheses_per_batch")]
    pub hypotheses_per_batch: usize,

    #[serde(default = "default_hypothesis_temperature")]
    pub temperature: f32,

    /// Minimum grounded percentage for a hypothesis to be kept
    #[serde(default = "default_groundedness_threshold")]
    pub groundedness_threshold: f64,
}

/// Paper search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PapersConfig {
    /// Base URL of the Semantic Scholar Graph API
    #[serde(default = "default_papers_base_url")]
    pub base_url: String,

    /// Environment variable holding an optional API key
    #[serde(default = "default_papers_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.grounded")
}

fn default_summarizer_backend() -> String {
    "openai".to_string()
}

fn default_openai_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_summarizer_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_summarizer_temperature() -> f32 {
    0.3
}

fn default_nli_backend() -> String {
    "http".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_span_backend() -> String {
    "http".to_string()
}

fn default_span_url() -> Option<String> {
    Some("http://127.0.0.1:8000".to_string())
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_context_window() -> u64 {
    128_000
}

fn default_split_threshold() -> f64 {
    0.8
}

fn default_max_branches() -> usize {
    5
}

fn default_min_papers_for_hypothesis() -> usize {
    10
}

fn default_num_splits() -> usize {
    2
}

fn default_max_iterations_per_branch() -> u32 {
    10
}

fn default_papers_per_iteration() -> usize {
    10
}

fn default_max_concurrent_branches() -> usize {
    2
}

fn default_hypotheses_per_batch() -> usize {
    3
}

fn default_hypothesis_temperature() -> f32 {
    0.7
}

fn default_groundedness_threshold() -> f64 {
    0.8
}

fn default_papers_base_url() -> String {
    "https://api.semanticscholar.org/graph/v1".to_string()
}

fn default_papers_api_key_env() -> String {
    "SEMANTIC_SCHOLAR_API_KEY".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: default_summarizer_backend(),
            base_url: default_openai_base_url(),
            model: default_summarizer_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            temperature: default_summarizer_temperature(),
        }
    }
}

impl Default for NliConfig {
    fn default() -> Self {
        Self {
            backend: default_nli_backend(),
            url: Some("http://127.0.0.1:8001/nli".to_string()),
            model: None,
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl Default for SpanDetectorConfig {
    fn default() -> Self {
        Self {
            backend: default_span_backend(),
            url: default_span_url(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            grounded_min: None,
            span_conf: None,
            contradiction_conf: None,
            chunk_size: None,
            max_retries: default_max_retries(),
        }
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            max_context_window: default_max_context_window(),
            split_threshold: default_split_threshold(),
            max_branches: default_max_branches(),
            min_papers_for_hypothesis: default_min_papers_for_hypothesis(),
            default_num_splits: default_num_splits(),
            max_iterations_per_branch: default_max_iterations_per_branch(),
            papers_per_iteration: default_papers_per_iteration(),
            max_concurrent_branches: default_max_concurrent_branches(),
        }
    }
}

impl Default for HypothesisConfig {
    fn default() -> Self {
        Self {
            hypotheses_per_batch: default_hypotheses_per_batch(),
            temperature: default_hypothesis_temperature(),
            groundedness_threshold: default_groundedness_threshold(),
        }
    }
}

impl Default for PapersConfig {
    fn default() -> Self {
        Self {
            base_url: default_papers_base_url(),
            api_key_env: default_papers_api_key_env(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.grounded/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (unknown backend, threshold out of range)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.grounded/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".grounded").join("config.toml"))
    }

    /// Path of the SQLite database holding loop state
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("grounded.db")
    }

    /// Validate and process configuration
    ///
    /// Checks the log level, backend names, threshold ranges and branch
    /// limits, then expands `~` in the data directory and creates it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` describing the first invalid value.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        check_backend("summarizer", &self.summarizer.backend, &["openai", "ollama", "mock"])?;
        check_backend("nli", &self.nli.backend, &["http", "llm", "mock"])?;
        check_backend("span_detector", &self.span_detector.backend, &["http", "mock"])?;

        check_unit_interval("validator.grounded_min", self.validator.grounded_min)?;
        check_unit_interval("validator.span_conf", self.validator.span_conf)?;
        check_unit_interval(
            "validator.contradiction_conf",
            self.validator.contradiction_conf,
        )?;
        check_unit_interval("branch.split_threshold", Some(self.branch.split_threshold))?;
        check_unit_interval(
            "hypothesis.groundedness_threshold",
            Some(self.hypothesis.groundedness_threshold),
        )?;

        if self.branch.max_branches == 0 {
            return Err(EngineError::Config(
                "branch.max_branches must be at least 1".to_string(),
            ));
        }
        if self.branch.max_context_window == 0 {
            return Err(EngineError::Config(
                "branch.max_context_window must be greater than 0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

fn check_backend(section: &str, backend: &str, allowed: &[&str]) -> Result<(), EngineError> {
    if allowed.contains(&backend) {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "Invalid {} backend '{}'. Must be one of: {}",
            section,
            backend,
            allowed.join(", ")
        )))
    }
}

fn check_unit_interval(name: &str, value: Option<f64>) -> Result<(), EngineError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(EngineError::Config(format!(
            "{} must be between 0.0 and 1.0",
            name
        ))),
        _ => Ok(()),
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.summarizer.backend, "openai");
        assert_eq!(config.branch.max_context_window, 128_000);
        assert_eq!(config.branch.split_threshold, 0.8);
        assert_eq!(config.branch.max_branches, 5);
        assert_eq!(config.branch.min_papers_for_hypothesis, 10);
        assert_eq!(config.hypothesis.hypotheses_per_batch, 3);
        assert_eq!(config.validator.max_retries, 2);
        assert!(config.validator.grounded_min.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[core]\ndata_dir = {:?}\n\n[summarizer]\nbackend = \"mock\"\n\n[validator]\ngrounded_min = 0.7\n",
            dir.path().join("data")
        );

        let config = Config::from_toml_str(&toml).unwrap();

        assert_eq!(config.summarizer.backend, "mock");
        assert_eq!(config.validator.grounded_min, Some(0.7));
        assert_eq!(config.nli.backend, "http");
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = Config::from_toml_str("[nli]\nbackend = \"direct\"\n").unwrap_err();
        assert!(err.to_string().contains("Invalid nli backend"));
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let err = Config::from_toml_str("[validator]\nspan_conf = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("validator.span_conf"));
    }

    #[test]
    fn test_rejects_zero_max_branches() {
        let err = Config::from_toml_str("[branch]\nmax_branches = 0\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.nli.url, deserialized.nli.url);
        assert!(!toml_string.contains("grounded_min"));
    }
}
