//! codewatch daemon binary
//!
//! Watches the configured repositories and serves the control channel.
//!
//! # Usage
//!
//! ```bash
//! codewatch-daemon --config ~/.config/codewatch/config.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use codewatch::config::{Config, CONFIG_ENV};
use codewatch::daemon::Daemon;

/// codewatch background daemon
#[derive(Parser, Debug)]
#[command(name = "codewatch-daemon")]
#[command(about = "Repository watcher that reviews changes with a local LLM")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("codewatch=info")),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);

    // Built outside the runtime: the pipeline owns blocking HTTP clients
    let daemon = Daemon::start(config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("codewatch-control")
        .build()?;
    let served = runtime.block_on(daemon.serve());
    runtime.shutdown_timeout(Duration::from_secs(2));

    daemon.stop();
    served?;
    Ok(())
}
