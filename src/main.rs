//! Rose Link - Entry Point
//!
//! Listens for a single peer, prints whatever it sends and forwards stdin
//! lines to it. Lines starting with `/` are console commands.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::signal;
use tracing::{debug, info, warn};

use rose_link::{Config, ConnectionManager, Event, ManagerConfig, TcpTransport, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("rose-link.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    rose_link::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        service = %config.service.record(),
        "Starting Rose Link"
    );

    if config.metrics.enabled {
        rose_link::metrics::init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let transport = Arc::new(TcpTransport::new(
        config.service.bind_addr,
        config.session.dial_timeout(),
    ));
    let (manager, mut events) = ConnectionManager::new(transport, ManagerConfig::from(&config));

    manager.start();
    spawn_console(manager.clone());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(event),
                None => break,
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                manager.stop();
                break;
            }
        }
    }

    info!("Rose Link stopped");
    Ok(())
}

fn handle_event(event: Event) {
    match event {
        Event::StateChanged(state) => info!(%state, "Connection state changed"),
        Event::ConnectionFailed => warn!("Connection lost, listening again"),
        Event::DataReceived(data) => {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(&data);
            let _ = stdout.flush();
        }
        Event::DataSent(data) => debug!(bytes = data.len(), "Data sent"),
    }
}

/// Console input
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Start,
    Stop,
    State,
    Connect(&'a str),
    Send(&'a str),
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line));
    };

    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("start"), None) => Some(Command::Start),
        (Some("stop"), None) => Some(Command::Stop),
        (Some("state"), None) => Some(Command::State),
        (Some("connect"), Some(addr)) => Some(Command::Connect(addr)),
        _ => None,
    }
}

/// Read stdin on its own thread; blocking reads never touch the runtime
fn spawn_console(manager: Arc<ConnectionManager>) {
    let spawned = thread::Builder::new()
        .name("rose-console".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };

                match parse_command(&line) {
                    Some(Command::Start) => manager.start(),
                    Some(Command::Stop) => manager.stop(),
                    Some(Command::State) => info!(state = %manager.state(), "Current state"),
                    Some(Command::Connect(addr)) => manager.connect(addr),
                    Some(Command::Send(text)) => {
                        let mut payload = Vec::with_capacity(text.len() + 1);
                        payload.extend_from_slice(text.as_bytes());
                        payload.push(b'\n');
                        if !manager.write(&payload) {
                            warn!(state = %manager.state(), "Not connected, line dropped");
                        }
                    }
                    None => warn!(%line, "Unknown command"),
                }
            }
            debug!("Console input closed");
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start console thread");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
