//! Rendezvous session watcher - follows a live session or filters change-feed alerts.

mod app;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use client_config_and_utils::{init_logging, Config, LogConfig, Paths};

/// Rendezvous session watcher command-line interface.
#[derive(Parser)]
#[command(name = "session-watch")]
#[command(about = "Follow realtime compatibility sessions and change-feed alerts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Config file to use instead of ~/.rendezvous/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for config and logs. Defaults to ~/.rendezvous
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow one session, printing a JSON snapshot per change
    Watch {
        /// Session to attach to
        #[arg(short, long)]
        session: String,

        /// Environment variable holding the access token
        #[arg(long, default_value = "RENDEZVOUS_ACCESS_TOKEN")]
        token_env: String,
    },
    /// Read change notifications (JSON lines) from stdin and print alerts
    Feed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
            config.load_from_env();
            config
        }
        None => Config::load(&paths)?,
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    app::validate_config(&config)?;

    init_logging(&LogConfig {
        service_name: "session-watch".to_string(),
        default_level: config.log_level.clone(),
        also_stderr: true,
        log_path: config.log_to_file.then(|| paths.log_file()),
    })?;

    match cli.command {
        Commands::Watch { session, token_env } => {
            app::run_watch(&config, &session, &token_env).await?;
        }
        Commands::Feed => {
            let summary = app::run_feed(&config).await?;
            tracing::info!(
                lines = summary.lines,
                alerted = summary.alerted,
                suppressed = summary.suppressed,
                rejected = summary.rejected,
                "Feed finished"
            );
        }
    }

    Ok(())
}
