//! Rose Peer - Entry Point
//!
//! Dials a rose-link node, copies stdin to the session and the session to
//! stdout until either side closes.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::signal;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rose Peer - talk to a rose-link node from the terminal
#[derive(Parser, Debug)]
#[command(name = "rose-peer")]
#[command(version = VERSION)]
#[command(about = "Console peer for a rose-link node")]
struct Cli {
    /// Node address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7420")]
    addr: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Dial timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    info!(version = VERSION, addr = %cli.addr, "Dialing node");

    let stream = timeout(Duration::from_secs(cli.timeout_secs), TcpStream::connect(&cli.addr))
        .await
        .with_context(|| format!("Timed out connecting to {}", cli.addr))?
        .with_context(|| format!("Failed to connect to {}", cli.addr))?;
    stream.set_nodelay(true)?;

    info!(peer = %stream.peer_addr()?, "Connected");

    let (mut reader, mut writer) = stream.into_split();

    let inbound = async {
        let mut stdout = io::stdout();
        let copied = io::copy(&mut reader, &mut stdout).await?;
        stdout.flush().await?;
        Ok::<_, std::io::Error>(copied)
    };

    let outbound = async {
        let mut stdin = io::stdin();
        let copied = io::copy(&mut stdin, &mut writer).await?;
        writer.shutdown().await?;
        Ok::<_, std::io::Error>(copied)
    };

    tokio::select! {
        result = inbound => match result {
            Ok(bytes) => info!(bytes, "Node closed the session"),
            Err(e) => warn!(error = %e, "Session read failed"),
        },
        result = outbound => match result {
            Ok(bytes) => debug!(bytes, "Input closed"),
            Err(e) => warn!(error = %e, "Session write failed"),
        },
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    info!("Rose Peer stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout carries only session data
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
