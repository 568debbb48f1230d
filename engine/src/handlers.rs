//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - validate: Check a summary against its context
//! - summarize: Generate a grounded summary with retries
//! - research: Run a branching research loop
//! - loops: List, show, snapshot and delete stored loops
//! - doctor: Validate configuration and check backends

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;

use crate::backends::{create_validator, Backends};
use crate::config::Config;
use crate::db::Database;
use crate::grounding::{redact_unverified, Overseer, ValidationResult, ValidatorThresholds};
use crate::orchestration::{LoopState, LoopStatus, ResearchSession};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Resolve an argument that is either literal text or `@path`
pub fn read_arg(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path)),
        None => Ok(value.to_string()),
    }
}

/// Interpret context text: a JSON array of strings is a context list,
/// anything else is a single context.
pub fn parse_context(text: &str) -> Value {
    if text.trim_start().starts_with('[') {
        if let Ok(value @ Value::Array(_)) = serde_json::from_str::<Value>(text) {
            return value;
        }
    }
    Value::String(text.to_string())
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn print_spans(result: &ValidationResult) {
    if result.spans.is_empty() {
        return;
    }
    println!("Unsupported spans:");
    for span in &result.spans {
        println!(
            "  [{}..{}] {:<14} score={:.2} conf={:.2} \"{}\"",
            span.start, span.end, span.label, span.hallucination_score, span.confidence, span.text
        );
    }
}

/// Validate a summary against its context
pub async fn handle_validate(
    summary: String,
    context: String,
    question: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let context = parse_context(&read_arg(&context)?);
    let validator = create_validator(config, &|name: &str| std::env::var(name).ok())?;
    let overseer = Overseer::new(validator, config.validator.max_retries);

    let result = overseer
        .validate(&summary, &context, question.as_deref())
        .await?;

    match format {
        OutputFormat::Text => {
            println!("Grounded:        {:.1}%", result.grounded_pct * 100.0);
            println!("Needs fact check: {}", result.needs_fact_check);
            println!("Blocked:         {}", result.blocked);
            println!();
            print_spans(&result);
            if result.blocked {
                println!();
                println!("Redacted: {}", redact_unverified(&summary, &result.spans));
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "grounded_pct": result.grounded_pct,
                "needs_fact_check": result.needs_fact_check,
                "blocked": result.blocked,
                "spans": result.spans,
                "redacted": redact_unverified(&summary, &result.spans),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Summarize data, regenerating with strict guidance while blocked
pub async fn handle_summarize(
    data: String,
    max_retries: Option<u32>,
    guidance: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let data = Value::String(read_arg(&data)?);
    let backends = Backends::from_config(config)?;
    let overseer = Overseer::new(
        backends.validator.clone(),
        max_retries.unwrap_or(config.validator.max_retries),
    );

    tracing::info!(summarizer = backends.summarizer.name(), "summarizing");

    let (summary, result) = overseer
        .summarise_with_validation(
            backends.summarizer.as_ref(),
            &data,
            &data,
            None,
            guidance.as_deref(),
        )
        .await?;

    let output_text = if result.blocked {
        redact_unverified(&summary, &result.spans)
    } else {
        summary.clone()
    };

    match format {
        OutputFormat::Text => {
            println!("{}", output_text);
            println!();
            println!(
                "Grounded: {:.1}%{}",
                result.grounded_pct * 100.0,
                if result.blocked {
                    " (blocked, unverified spans redacted)"
                } else {
                    ""
                }
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "summary": summary,
                "output": output_text,
                "grounded_pct": result.grounded_pct,
                "needs_fact_check": result.needs_fact_check,
                "blocked": result.blocked,
                "spans": result.spans,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

fn print_status(status: &LoopStatus) {
    println!("Loop {} (#{})", status.loop_id, status.loop_number);
    println!(
        "  Branches:   {} total, {} active ({} pending, {} running, {} completed, {} pruned)",
        status.total_branches,
        status.active_branches,
        status.pending,
        status.running,
        status.completed,
        status.pruned
    );
    println!("  Papers:     {}", status.total_papers);
    println!("  Summaries:  {}", status.total_summaries);
    println!("  Hypotheses: {}", status.total_hypotheses);
    println!("  Context:    {} tokens", status.total_context_used);
}

/// Run a research loop and persist it
pub async fn handle_research(
    query: String,
    iterations: u32,
    stop_on_hypotheses: usize,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let backends = Backends::from_config(config)?;
    let database = open_database(config).await?;

    let outcome = run_research(&query, iterations, stop_on_hypotheses, config, backends, &database, format).await;
    close_after(database, outcome).await
}

/// Close `database`, then hand back `outcome`.
///
/// The database is closed on both paths. An error in `outcome` wins over a
/// close failure.
async fn close_after<T>(database: Database, outcome: Result<T>) -> Result<T> {
    let closed = database.close().await;
    match outcome {
        Ok(value) => closed.map(|()| value),
        Err(e) => {
            if let Err(close_err) = closed {
                tracing::warn!("Failed to close database after error: {}", close_err);
            }
            Err(e)
        }
    }
}

async fn run_research(
    query: &str,
    iterations: u32,
    stop_on_hypotheses: usize,
    config: &Config,
    backends: Backends,
    database: &Database,
    format: OutputFormat,
) -> Result<()> {
    let mut session = ResearchSession::new(
        query,
        config.branch.clone(),
        &config.hypothesis,
        config.validator.max_retries,
        backends.papers,
        backends.summarizer,
        backends.validator,
        backends.llm,
    )?
    .with_repository(database.loops());

    tracing::info!(loop_id = session.loop_id(), query = %query, "starting research loop");

    let status = session.run(iterations, stop_on_hypotheses).await?;
    let hypotheses = session.get_hypotheses(10, 0.0);

    match format {
        OutputFormat::Text => {
            print_status(&status);
            println!();
            if hypotheses.is_empty() {
                println!("No hypotheses generated.");
            } else {
                println!("Top hypotheses:");
                for (i, h) in hypotheses.iter().enumerate() {
                    println!("  {}. [{:.2}] {}", i + 1, h.confidence, h.text);
                    if !h.supporting_paper_ids.is_empty() {
                        println!("     Supported by: {}", h.supporting_paper_ids.join(", "));
                    }
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "status": status,
                "hypotheses": hypotheses,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List stored loops
pub async fn handle_loops_list(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let loops = database.loops().list_loops().await?;

    match format {
        OutputFormat::Text => {
            if loops.is_empty() {
                println!("No research loops found.");
            } else {
                println!("Research loops:");
                println!();
                for summary in &loops {
                    println!(
                        "  {}  #{:<3} {:>3} branches  updated {}",
                        summary.loop_id,
                        summary.loop_number,
                        summary.branch_count,
                        format_timestamp(summary.updated_at)
                    );
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "loops": loops }))?);
        }
    }

    Ok(())
}

fn print_branches(state: &LoopState) {
    let mut branches: Vec<_> = state.branches.values().collect();
    branches.sort_by_key(|b| b.sequence);

    for branch in branches {
        println!(
            "  {} [{}] {:?} papers={} summaries={} hypotheses={} tokens={}",
            branch.id,
            branch.status,
            branch.mode,
            branch.total_papers(),
            branch.total_summaries(),
            branch.hypotheses.len(),
            branch.context_window_used
        );
        println!("      query: {}", branch.query);
        if let Some(reason) = &branch.prune_reason {
            println!("      pruned: {}", reason);
        }
        if let Some(error) = &branch.last_error {
            println!("      last error: {}", error);
        }
    }
}

/// Show one stored loop with its branches
pub async fn handle_loops_show(loop_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let repository = database.loops();

    let state = repository
        .load_state(&loop_id)
        .await?
        .with_context(|| format!("Loop not found: {}", loop_id))?;
    let snapshots = repository.list_snapshots(&loop_id).await?;
    let status = LoopStatus::from_loop_state(&state);

    match format {
        OutputFormat::Text => {
            print_status(&status);
            println!();
            println!("Branches:");
            print_branches(&state);
            if !snapshots.is_empty() {
                println!();
                println!("Snapshots:");
                for snapshot in &snapshots {
                    println!(
                        "  {}  {}",
                        snapshot.snapshot_id,
                        format_timestamp(snapshot.created_at)
                    );
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "status": status,
                "state": state,
                "snapshots": snapshots,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Snapshot a stored loop
pub async fn handle_loops_snapshot(
    loop_id: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let snapshot_id = database.loops().create_snapshot(&loop_id).await?;

    match format {
        OutputFormat::Text => println!("Snapshot {} created for loop {}", snapshot_id, loop_id),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "loop_id": loop_id,
                "snapshot_id": snapshot_id,
            }))?
        ),
    }

    Ok(())
}

/// Delete a stored loop
pub async fn handle_loops_delete(
    loop_id: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let deleted = database.loops().delete_state(&loop_id).await?;

    match format {
        OutputFormat::Text => {
            if deleted {
                println!("Deleted loop {}", loop_id);
            } else {
                println!("Loop not found: {}", loop_id);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "loop_id": loop_id,
                "deleted": deleted,
            }))?
        ),
    }

    Ok(())
}

fn env_is_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}

/// Validate configuration and check backends
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    let data_dir: &Path = &config.core.data_dir;
    if data_dir.exists() {
        checks.push(("Data directory", "Exists".to_string()));
    } else {
        checks.push(("Data directory", "Missing".to_string()));
        issues.push(format!("Data directory does not exist: {:?}", data_dir));
    }

    let db_path = config.database_path();
    if db_path.exists() {
        checks.push(("Database", "Exists".to_string()));
        match Database::new(&db_path).await {
            Ok(database) => {
                match database.loops().stats().await {
                    Ok(stats) => checks.push((
                        "Stored loops",
                        format!("{} ({} active branches)", stats.loops, stats.active_branches),
                    )),
                    Err(e) => issues.push(format!("Cannot read loop statistics: {}", e)),
                }
                database.close().await.ok();
            }
            Err(e) => {
                checks.push(("Database connection", "Failed".to_string()));
                issues.push(format!("Cannot connect to database: {}", e));
            }
        }
    } else {
        checks.push(("Database", "Not initialized".to_string()));
    }

    checks.push(("Summarizer", config.summarizer.backend.clone()));
    if config.summarizer.backend == "openai" {
        if env_is_set(&config.summarizer.api_key_env) {
            checks.push(("Summarizer API key", "Configured".to_string()));
        } else {
            checks.push(("Summarizer API key", "Not configured".to_string()));
            issues.push(format!(
                "Set {} to use the openai summarizer.",
                config.summarizer.api_key_env
            ));
        }
    }

    checks.push(("NLI backend", config.nli.backend.clone()));
    if config.nli.backend == "http" && config.nli.url.is_none() {
        issues.push("nli.url is required for the http NLI backend.".to_string());
    }

    checks.push(("Span detector", config.span_detector.backend.clone()));
    if config.span_detector.backend == "http" && config.span_detector.url.is_none() {
        issues.push("span_detector.url is required for the http span detector.".to_string());
    }

    let thresholds = ValidatorThresholds::resolve(&config.validator);
    checks.push((
        "Thresholds",
        format!(
            "grounded_min={} span_conf={} contradiction_conf={}",
            thresholds.grounded_min, thresholds.span_conf, thresholds.contradiction_conf
        ),
    ));

    if let Err(e) = Backends::from_config(config) {
        checks.push(("Backends", "Failed".to_string()));
        issues.push(format!("Cannot build backends: {}", e));
    } else {
        checks.push(("Backends", "OK".to_string()));
    }

    match format {
        OutputFormat::Text => {
            println!("Grounded Diagnostics");
            println!("====================");
            println!();

            println!("Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_arg_literal_and_file() {
        assert_eq!(read_arg("plain text").unwrap(), "plain text");

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "from disk").unwrap();
        let arg = format!("@{}", file.path().display());
        assert_eq!(read_arg(&arg).unwrap(), "from disk");

        assert!(read_arg("@/definitely/not/here.txt").is_err());
    }

    #[test]
    fn test_parse_context_accepts_lists() {
        assert_eq!(parse_context("Paris is in France."), json!("Paris is in France."));
        assert_eq!(parse_context(r#"["a", "b"]"#), json!(["a", "b"]));
        assert_eq!(parse_context("[not json"), json!("[not json"));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[tokio::test]
    async fn test_database_closed_when_run_fails() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("grounded.db");
        let database = Database::new(&db_path).await.unwrap();
        database
            .loops()
            .save_state(&LoopState::new("loop-1", 1))
            .await
            .unwrap();

        let outcome: Result<()> = Err(anyhow::anyhow!("search backend unavailable"));
        let err = close_after(database, outcome).await.unwrap_err();
        assert_eq!(err.to_string(), "search backend unavailable");

        // the WAL was checkpointed on close
        let wal = temp_dir.path().join("grounded.db-wal");
        assert!(!wal.exists() || std::fs::metadata(&wal).unwrap().len() == 0);

        let reopened = Database::new(&db_path).await.unwrap();
        assert!(reopened.loops().load_state("loop-1").await.unwrap().is_some());
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_after_passes_value_through() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let database = Database::new(&temp_dir.path().join("grounded.db")).await.unwrap();

        assert_eq!(close_after(database, Ok(7)).await.unwrap(), 7);
    }
}
