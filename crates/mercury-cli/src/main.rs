//! Mercury CLI - drive notebook kernels through the host protocol.

mod colors;
mod demo;
mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mercury_host::HostConfig;

#[derive(Parser)]
#[command(name = "mercury")]
#[command(about = "Replay host traffic against notebook kernels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Host configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the execution update batching window
    #[arg(long, global = true)]
    flush_delay_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines script of inbound calls against the echo kernel
    Replay {
        /// Path to the script, or `-` for stdin
        script: String,
    },

    /// Replay the built-in demo script
    Demo,
}

impl Cli {
    fn host_config(&self) -> anyhow::Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::from_file(path)?,
            None => HostConfig::default(),
        };
        if let Some(flush_delay_ms) = self.flush_delay_ms {
            config.flush_delay_ms = flush_delay_ms;
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the protocol traffic.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.host_config()?;

    match cli.command {
        Commands::Replay { script } => replay::execute(&script, &config).await?,
        Commands::Demo => replay::replay_text(demo::DEMO_SCRIPT, &config).await?,
    }

    Ok(())
}
