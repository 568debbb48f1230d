//! CLI interface for Grounded
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Grounded summarization and branch research engine
///
/// Validates generated summaries against their sources, regenerating them
/// with stricter guidance when they are not grounded, and runs branching
/// literature research loops on top of that.
#[derive(Parser, Debug)]
#[command(name = "grounded")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check how well a summary is grounded in its context
    Validate {
        /// Summary text to check
        #[arg(long)]
        summary: String,

        /// Source context, or @path to read it from a file
        #[arg(long)]
        context: String,

        /// Question the summary answers
        #[arg(long)]
        question: Option<String>,
    },

    /// Summarize data, regenerating until the summary is grounded
    Summarize {
        /// Data to summarize, or @path to read it from a file
        #[arg(long)]
        data: String,

        /// Retries after a blocked summary (defaults to validator.max_retries)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Extra guidance for the first attempt
        #[arg(long)]
        guidance: Option<String>,
    },

    /// Run a branching research loop for a query
    Research {
        /// Research query to explore
        query: String,

        /// Maximum rounds to run
        #[arg(short, long, default_value = "3")]
        iterations: u32,

        /// Stop once this many hypotheses exist (0 = never)
        #[arg(short, long, default_value = "0")]
        stop_on_hypotheses: usize,
    },

    /// Inspect stored research loops
    Loops {
        #[command(subcommand)]
        action: LoopAction,
    },

    /// Validate configuration and check backends
    Doctor,
}

/// Stored loop actions
#[derive(Subcommand, Debug)]
pub enum LoopAction {
    /// List stored loops
    List,

    /// Show a loop and its branches
    Show {
        /// Loop ID
        loop_id: String,
    },

    /// Take a point-in-time snapshot of a loop
    Snapshot {
        /// Loop ID
        loop_id: String,
    },

    /// Delete a loop with its branches and snapshots
    Delete {
        /// Loop ID
        loop_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from([
            "grounded",
            "--json",
            "validate",
            "--summary",
            "The tower is in Paris.",
            "--context",
            "@notes.txt",
        ]);
        assert!(cli.json);
        match cli.command {
            Command::Validate {
                summary,
                context,
                question,
            } => {
                assert_eq!(summary, "The tower is in Paris.");
                assert_eq!(context, "@notes.txt");
                assert!(question.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_research_defaults() {
        let cli = Cli::parse_from(["grounded", "research", "attention mechanisms", "--log", "debug"]);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        match cli.command {
            Command::Research {
                query,
                iterations,
                stop_on_hypotheses,
            } => {
                assert_eq!(query, "attention mechanisms");
                assert_eq!(iterations, 3);
                assert_eq!(stop_on_hypotheses, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_loops_show() {
        let cli = Cli::parse_from(["grounded", "loops", "show", "abc"]);
        assert!(matches!(
            cli.command,
            Command::Loops {
                action: LoopAction::Show { loop_id }
            } if loop_id == "abc"
        ));
    }
}
