//! nas-dav server binary.
//!
//! Exports configured directories ("shares") over WebDAV on one port and
//! serves the built frontend plus a small JSON API on another. Both accept
//! loops feed one bounded worker pool; a full queue closes the connection.

mod api;
mod atomic;
mod audit;
mod cache;
mod config;
mod error;
mod etag;
mod frontend;
mod http;
mod locking;
mod logging;
mod pool;
mod request;
mod response;
mod server;
mod shares;
mod version;
mod webdav;

use clap::Parser;
use shadow_rs::shadow;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time;
use tracing::{info, warn};

use crate::config::{Args, SHUTDOWN_GRACE_SECS, ServerConfig};
use crate::pool::{ShutdownMode, WorkerPool};
use crate::server::{AppState, Listener};

shadow!(build);

/// Starts both listeners and blocks until a termination signal arrives.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let config = ServerConfig::from_args(&args).map_err(io::Error::other)?;
    let pool = Arc::new(
        WorkerPool::new(args.workers, args.queue_capacity).map_err(io::Error::other)?,
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let dav_addr = SocketAddr::new(host, config.port);
    let frontend_addr = SocketAddr::new(host, args.frontend_port);

    for share in &config.shares {
        info!(
            alias = %share.alias,
            path = %share.real_path.display(),
            read_only = config.is_read_only(share),
            auth_required = share.auth_required,
            "share configured"
        );
    }
    if config.allow_anonymous {
        info!("anonymous access allowed");
    }
    let state = Arc::new(AppState::new(config, pool.info()));

    let dav_listener = TcpListener::bind(dav_addr).await?;
    let frontend_listener = TcpListener::bind(frontend_addr).await?;
    info!("🚀 Starting WebDAV server at {}", dav_addr);
    info!("🌐 Starting frontend server at {}", frontend_addr);

    #[cfg(unix)]
    if let Some(path) = args.shares_file.clone() {
        spawn_reload_on_hangup(state.clone(), path);
    }

    tokio::select! {
        _ = server::accept_loop(dav_listener, Listener::WebDav, state.clone(), pool.clone()) => {}
        _ = server::accept_loop(frontend_listener, Listener::Frontend, state.clone(), pool.clone()) => {}
        _ = shutdown_signal() => {}
    }

    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    if time::timeout(grace, pool.shutdown(ShutdownMode::Graceful))
        .await
        .is_err()
    {
        warn!("graceful shutdown timed out, discarding queued connections");
        pool.shutdown(ShutdownMode::Immediate).await;
    }
    info!("server stopped");
    Ok(())
}

/// Re-reads the share file on SIGHUP; a bad file keeps the current snapshot.
#[cfg(unix)]
fn spawn_reload_on_hangup(state: Arc<AppState>, path: std::path::PathBuf) {
    use crate::logging::LogCategory;

    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(err) => {
                LogCategory::Error.log(format!("cannot install SIGHUP handler: {err}"));
                return;
            }
        };
        while hangup.recv().await.is_some() {
            match state.config.get().reload_from(&path) {
                Ok(next) => {
                    info!(shares = next.shares.len(), "configuration reloaded");
                    state.config.replace(next);
                }
                Err(err) => LogCategory::Error.log(format!(
                    "configuration reload failed, keeping previous snapshot: {err}"
                )),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal, draining worker pool");
}
