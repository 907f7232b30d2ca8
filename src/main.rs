//! sider - A Sharded, Pipelined In-Memory Key-Value Server
//!
//! This is the main entry point for the sider server.
//! It binds the listener, hands it to the server core, and stops the server
//! on Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use sider::{Listener, Server, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A sharded, pipelined in-memory key-value server",
    after_help = "CONNECTING:\n    $ redis-cli -p 3000\n    127.0.0.1:3000> SET name \"Ariz\"\n    OK\n    127.0.0.1:3000> GET name\n    \"Ariz\""
)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = sider::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = sider::DEFAULT_PORT)]
    port: u16,

    /// Listen on a Unix-domain socket at this path instead of TCP
    #[arg(long, value_name = "PATH", conflicts_with_all = ["host", "port"])]
    socket: Option<PathBuf>,

    /// Number of store shards
    #[arg(long, default_value_t = sider::storage::DEFAULT_SHARDS)]
    shards: usize,

    /// Replies a client may have queued before its reads are paused
    #[arg(long, default_value_t = sider::connection::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            shards: self.shards,
            queue_capacity: self.queue_capacity,
            ..ServerConfig::default()
        }
    }
}

fn print_banner(addr: &str, config: &ServerConfig) {
    println!(
        r#"
     _     _
 ___(_) __| | ___ _ __
/ __| |/ _` |/ _ \ '__|
\__ \ | (_| |  __/ |
|___/_|\__,_|\___|_|

sider v{} - Sharded In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Listening on {} ({} shards)
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        sider::VERSION,
        addr,
        config.shards
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = args.server_config();

    match &args.socket {
        Some(path) => serve_unix(path, config).await,
        None => {
            let addr = format!("{}:{}", args.host, args.port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            serve(listener, config).await
        }
    }
}

#[cfg(unix)]
async fn serve_unix(path: &std::path::Path, config: ServerConfig) -> Result<()> {
    let listener = tokio::net::UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    serve(listener, config).await
}

#[cfg(not(unix))]
async fn serve_unix(_path: &std::path::Path, _config: ServerConfig) -> Result<()> {
    anyhow::bail!("unix sockets are not supported on this platform")
}

/// Runs the server until Ctrl+C, then stops it.
async fn serve<L: Listener>(listener: L, config: ServerConfig) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    let server = Arc::new(Server::with_config(listener, config));
    print_banner(&addr, server.config());
    let mut running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start().await }
    });

    // Either the accept loop dies on its own or we are asked to shut down
    let finished = tokio::select! {
        result = &mut running => Some(result),
        signal = signal::ctrl_c() => {
            signal.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
            None
        }
    };

    server.stop().await.context("failed to stop server")?;

    let result = match finished {
        Some(result) => result,
        None => running.await,
    };
    if let Err(e) = result.context("accept task panicked")? {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
