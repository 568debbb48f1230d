//! Integration tests for configuration management
//!
//! These tests load a complete config file from disk and build the
//! backends it names.

use grounded_engine::backends::Backends;
use grounded_engine::config::Config;
use std::fs;
use tempfile::TempDir;

fn no_env(_: &str) -> Option<String> {
    None
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let toml = format!(
        "[core]\nlog_level = \"debug\"\ndata_dir = {:?}\n\n{}",
        dir.path().join("data"),
        body
    );
    fs::write(&path, toml).unwrap();
    path
}

#[test]
fn test_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[summarizer]
backend = "ollama"
base_url = "http://localhost:11434"
model = "llama3.1:8b"

[nli]
backend = "http"
url = "http://localhost:9000/nli"

[span_detector]
backend = "http"
url = "http://localhost:8000"

[validator]
grounded_min = 0.75
contradiction_conf = 0.85
max_retries = 3

[branch]
max_context_window = 64000
split_threshold = 0.7
max_branches = 8

[hypothesis]
hypotheses_per_batch = 5
groundedness_threshold = 0.9

[papers]
base_url = "http://localhost:7000/graph/v1"
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(config.core.data_dir.is_dir());
    assert_eq!(config.database_path(), dir.path().join("data").join("grounded.db"));
    assert_eq!(config.summarizer.backend, "ollama");
    assert_eq!(config.validator.grounded_min, Some(0.75));
    assert_eq!(config.validator.max_retries, 3);
    assert_eq!(config.branch.max_context_window, 64_000);
    assert_eq!(config.branch.max_branches, 8);
    assert_eq!(config.hypothesis.hypotheses_per_batch, 5);

    let backends = Backends::from_config_with(&config, &no_env).unwrap();
    assert_eq!(backends.summarizer.name(), "ollama");
    assert!(backends.llm.is_some());
}

#[test]
fn test_mock_config_builds_without_services() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[summarizer]\nbackend = \"mock\"\n\n[nli]\nbackend = \"mock\"\n\n[span_detector]\nbackend = \"mock\"\n",
    );

    let config = Config::load_from_path(&path).unwrap();
    let backends = Backends::from_config_with(&config, &no_env).unwrap();

    assert_eq!(backends.summarizer.name(), "mock");
    assert!(backends.llm.is_none());
}

#[test]
fn test_http_nli_without_url_fails_at_startup() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[summarizer]\nbackend = \"mock\"\n\n[nli]\nbackend = \"http\"\n",
    );

    let config = Config::load_from_path(&path).unwrap();
    assert!(Backends::from_config_with(&config, &no_env).is_err());
}

#[test]
fn test_missing_file_is_config_error() {
    let err = Config::load_from_path(std::path::Path::new("/nonexistent/grounded.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
