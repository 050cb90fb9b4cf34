//! linewire CLI
//!
//! Decodes an escaped, line-oriented stream from a TCP peer or stdin and
//! prints the decoded lines to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use linewire_cli::tap::{self, TapConfig};
use linewire_core::config::load_config;
use linewire_core::tracing_init::init_tracing;
use linewire_core::{DecoderOutcome, DisconnectReason};

#[derive(Parser, Debug)]
#[command(name = "linewire")]
#[command(version, about = "Decode an escaped line stream", long_about = None)]
struct Cli {
    /// Peer address to read from (e.g. "127.0.0.1:25"). Reads stdin when absent.
    #[arg(short, long, env = "LINEWIRE_CONNECT")]
    connect: Option<String>,

    /// Path to a JSON settings file.
    #[arg(long, env = "LINEWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Longest accepted line in bytes, terminator excluded.
    #[arg(long)]
    max_line_bytes: Option<usize>,

    /// Deliver lines without resolving backslash escapes.
    #[arg(long)]
    raw: bool,

    /// Stop after this many seconds without a line.
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));
    // A blocking stdin read cannot be interrupted; don't wait on it.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(n) = cli.max_line_bytes {
        config.decoder.max_line_bytes = n;
    }
    if cli.raw {
        config.decoder.process_escapes = false;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    config.log.json |= cli.log_json;

    init_tracing(
        &format!("linewire={0},linewire_core={0},linewire_cli={0}", config.log.level),
        config.log.json,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "Starting linewire");

    let tap_config = TapConfig {
        decoder: config.decoder,
        idle_timeout: cli.idle_timeout.map(Duration::from_secs),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            shutdown.cancel();
        }
    });

    let stdout = tokio::io::stdout();
    let outcome = match cli.connect.as_deref() {
        Some(addr) => tap::tap_tcp(addr, stdout, &tap_config, shutdown).await,
        None => tap::tap(tokio::io::stdin(), stdout, &tap_config, shutdown).await,
    };

    match outcome {
        Ok(DecoderOutcome::Disconnected(DisconnectReason::Unexpected)) => {
            error!("Stream ended with a transport failure");
            Ok(ExitCode::FAILURE)
        }
        Ok(outcome) => {
            info!(?outcome, "linewire finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e.into()),
    }
}
