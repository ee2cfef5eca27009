//! CLI argument definitions using clap with subcommand architecture

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, CONFIG_ENV};
use crate::extract::ExtractMode;
use crate::pipeline::RunOptions;

/// Watches repositories and reviews their changes with a local LLM
#[derive(Parser, Debug)]
#[command(name = "codewatch")]
#[command(about = "Watches repositories and reviews incremental changes with a local LLM")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: $CODEWATCH_CONFIG or the user config dir)
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the background daemon
    Start,

    /// Stop the background daemon
    Stop,

    /// Stop, then start the background daemon
    Restart,

    /// Show daemon and per-repository status
    Status,

    /// Show the daemon log
    Logs(LogsArgs),

    /// Run one analysis in this process (no daemon required)
    #[command(visible_alias = "a")]
    Analyze(AnalyzeArgs),

    /// Ask the running daemon to analyze a repository now
    Trigger(TriggerArgs),

    /// Ask the running daemon to reload its configuration
    Reload,

    /// Validate the configuration file
    CheckConfig,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Keep printing new lines as they are written
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines to show
    #[arg(short = 'n', long, default_value = "50")]
    pub lines: usize,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Repository name or path, as configured
    #[arg(value_name = "REPO")]
    pub repository: String,

    /// Build the prompt but do not call the model or write anything
    #[arg(long)]
    pub dry: bool,

    /// Skip semantic search and index update
    #[arg(long)]
    pub fast: bool,

    /// Flatten the whole tree instead of the working-tree diff
    #[arg(long, conflicts_with = "last_commit")]
    pub deep: bool,

    /// Analyze the files touched by the last commit
    #[arg(long)]
    pub last_commit: bool,

    /// Print the payload sent to the model
    #[arg(long)]
    pub show_payload: bool,
}

impl AnalyzeArgs {
    pub fn run_options(&self) -> RunOptions {
        let mode = if self.deep {
            ExtractMode::Full
        } else if self.last_commit {
            ExtractMode::LastCommit
        } else {
            ExtractMode::Incremental
        };
        RunOptions {
            mode,
            dry: self.dry,
            fast: self.fast,
            show_payload: self.show_payload,
        }
    }
}

#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Repository name or path, as configured
    #[arg(value_name = "REPO")]
    pub repository: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_flags_map_to_options() {
        let cli = Cli::parse_from(["codewatch", "analyze", "api", "--deep", "--fast", "--show-payload"]);
        let Commands::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let options = args.run_options();
        assert_eq!(options.mode, ExtractMode::Full);
        assert!(options.fast && options.show_payload && !options.dry);
    }

    #[test]
    fn test_deep_conflicts_with_last_commit() {
        assert!(Cli::try_parse_from(["codewatch", "analyze", "api", "--deep", "--last-commit"]).is_err());
    }

    #[test]
    fn test_logs_defaults() {
        let cli = Cli::parse_from(["codewatch", "logs", "-f"]);
        let Commands::Logs(args) = cli.command else {
            panic!("expected logs");
        };
        assert!(args.follow);
        assert_eq!(args.lines, 50);
    }
}
