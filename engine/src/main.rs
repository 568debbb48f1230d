// Grounded engine
// Main entry point for the grounded binary

use clap::Parser;
use grounded_engine::cli::{Cli, Command, LoopAction};
use grounded_engine::config::Config;
use grounded_engine::handlers::{
    handle_doctor, handle_loops_delete, handle_loops_list, handle_loops_show,
    handle_loops_snapshot, handle_research, handle_summarize, handle_validate, OutputFormat,
};
use grounded_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Grounded v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Validate {
            summary,
            context,
            question,
        } => handle_validate(summary, context, question, &config, format).await,

        Command::Summarize {
            data,
            max_retries,
            guidance,
        } => handle_summarize(data, max_retries, guidance, &config, format).await,

        Command::Research {
            query,
            iterations,
            stop_on_hypotheses,
        } => {
            tracing::info!("Running research for '{}'", query);
            handle_research(query, iterations, stop_on_hypotheses, &config, format).await
        }

        Command::Loops { action } => match action {
            LoopAction::List => handle_loops_list(&config, format).await,
            LoopAction::Show { loop_id } => handle_loops_show(loop_id, &config, format).await,
            LoopAction::Snapshot { loop_id } => {
                handle_loops_snapshot(loop_id, &config, format).await
            }
            LoopAction::Delete { loop_id } => handle_loops_delete(loop_id, &config, format).await,
        },

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
