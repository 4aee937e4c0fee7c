//! memeya: forum heartbeat for the Memeya agent.
//!
//! Runs one Colosseum engagement cycle at a time and keeps counters in the
//! agent's state directory. `loop` waits a random pause between cycles, bounded
//! by `forum_loop_min_mins`/`forum_loop_max_mins`. The counters file comes from
//! `heartbeat_state_path` or `MEMEYA_HEARTBEAT_STATE`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use memeya_backend::backend::grok::GrokClient;
use memeya_backend::config::AgentConfig;
use memeya_backend::forum_heartbeat::HeartbeatStore;
use memeya_backend::runtime::forum_heartbeat;
use rand::Rng;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "memeya")]
#[command(about = "Colosseum forum heartbeat for the Memeya agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single heartbeat cycle
    Once,

    /// Run cycles forever with a random pause between them
    Loop,

    /// Print the persisted counters
    Status,

    /// Reset the persisted counters
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,memeya=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load();

    match cli.command {
        Commands::Once => run_once(&config).await,
        Commands::Loop => {
            run_loop(&config, config.forum_loop_min_mins, config.forum_loop_max_mins).await
        }
        Commands::Status => {
            let counters = HeartbeatStore::new(&config.heartbeat_state_path)
                .load()
                .context("Failed to read heartbeat counters")?;
            println!("{}", serde_json::to_string_pretty(&counters)?);
            Ok(())
        }
        Commands::Reset => {
            HeartbeatStore::new(&config.heartbeat_state_path)
                .reset()
                .context("Failed to reset heartbeat counters")?;
            println!("Heartbeat counters reset.");
            Ok(())
        }
    }
}

async fn run_once(config: &AgentConfig) -> Result<()> {
    let chat = Arc::new(GrokClient::from_config(config).context("Failed to build Grok client")?);
    let heartbeat = forum_heartbeat(config, chat)?;
    let summary = heartbeat.run_cycle(Utc::now()).await?;
    println!("{}", summary.report());
    Ok(())
}

async fn run_loop(config: &AgentConfig, min_mins: u64, max_mins: u64) -> Result<()> {
    let (min_mins, max_mins) = pause_bounds(min_mins, max_mins);
    let chat = Arc::new(GrokClient::from_config(config).context("Failed to build Grok client")?);
    let heartbeat = forum_heartbeat(config, chat)?;

    loop {
        match heartbeat.run_cycle(Utc::now()).await {
            Ok(summary) => println!("{}", summary.report()),
            Err(e) => tracing::error!("Heartbeat cycle failed: {:#}", e),
        }

        let pause = rand::thread_rng().gen_range(min_mins..=max_mins);
        tracing::info!("Next heartbeat in {} minutes", pause);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(pause * 60)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, stopping heartbeat loop");
                return Ok(());
            }
        }
    }
}

/// Normalise configured bounds: at least one minute, min <= max.
fn pause_bounds(min_mins: u64, max_mins: u64) -> (u64, u64) {
    let min = min_mins.max(1);
    (min, max_mins.max(min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["memeya", "once"]).unwrap();
        assert!(matches!(cli.command, Commands::Once));
        let cli = Cli::try_parse_from(["memeya", "loop"]).unwrap();
        assert!(matches!(cli.command, Commands::Loop));
        let cli = Cli::try_parse_from(["memeya", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
        let cli = Cli::try_parse_from(["memeya", "reset"]).unwrap();
        assert!(matches!(cli.command, Commands::Reset));

        assert!(Cli::try_parse_from(["memeya", "dance"]).is_err());
        assert!(Cli::try_parse_from(["memeya"]).is_err());
    }

    #[test]
    fn takes_no_flags_beyond_the_subcommand() {
        assert!(Cli::try_parse_from(["memeya", "loop", "--min-mins", "5"]).is_err());
        assert!(Cli::try_parse_from(["memeya", "--state", "/tmp/hb.json", "status"]).is_err());
        assert!(Cli::try_parse_from(["memeya", "status", "extra"]).is_err());
    }

    #[test]
    fn pause_bounds_are_sane() {
        assert_eq!(pause_bounds(30, 60), (30, 60));
        assert_eq!(pause_bounds(0, 0), (1, 1));
        assert_eq!(pause_bounds(50, 10), (50, 50));
    }

    #[test]
    fn status_and_reset_use_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeartbeatStore::new(dir.path().join("hb.json"));
        store.reset().unwrap();
        assert_eq!(store.load().unwrap().cycles, 0);
    }
}
