//! Tank Monitor
//!
//! Single-binary service that:
//! 1. Loads accounts from TOML, passwords from env vars or files
//! 2. Logs each account in once to validate its credentials
//! 3. Refreshes every account on a fixed interval
//! 4. Serves cached readings, on-demand refresh and reading submission over HTTP

mod api;
mod config;
mod error;
mod metrics;
mod registry;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use portal_client::AuthenticatedSession;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::{AccountConfig, Config, PortalConfig};
use crate::registry::{Account, AccountRegistry};

/// How long in-flight HTTP requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting tank-monitor");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.portal.base_url,
        accounts = config.accounts.len(),
        refresh_interval_secs = config.portal.refresh_interval_secs,
        "configuration loaded"
    );

    let mut registry = AccountRegistry::new();
    for account_config in &config.accounts {
        let id = account_config.id();
        let account = connect_account(&id, account_config, &config.portal).await?;
        registry.insert(id, account);
    }
    if registry.is_empty() {
        return Err(error::Error::NoAccounts.into());
    }
    info!(accounts = registry.len(), "all accounts validated");
    let registry = Arc::new(registry);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    for (id, account) in registry.iter() {
        tasks.push(metrics::spawn_gauge_publisher(account.coordinator.clone()));

        if let Err(e) = account.coordinator.request_refresh().await {
            warn!(account = %id, error = %e, "first refresh failed, scheduled refreshes will retry");
        }
        tasks.push(tank_poller::spawn_refresh_task(account.coordinator.clone()));
    }

    let app_state = AppState {
        registry: registry.clone(),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = api::build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    // The drain timer starts at signal receipt, not at server start
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    for task in &tasks {
        task.abort();
    }
    registry.close_all().await;

    info!("shutdown complete");
    Ok(())
}

/// Build an account and log it in once.
///
/// Credential-class failures surface only as a generic "invalid credentials"
/// error; the portal's payload goes to the log.
async fn connect_account(id: &str, config: &AccountConfig, portal: &PortalConfig) -> Result<Account> {
    let credential = config
        .credential()
        .with_context(|| format!("password for account {id} was not resolved"))?;
    let session = AuthenticatedSession::new(credential, portal.session_config())
        .with_context(|| format!("failed to create session for account {id}"))?;

    if let Err(e) = session.authenticate().await {
        if e.is_credential_failure() {
            error!(account = %id, error = %e, "credential validation failed");
            return Err(error::Error::InvalidCredentials(id.to_string()).into());
        }
        return Err(anyhow::Error::new(e).context(format!("could not reach the portal for account {id}")));
    }
    info!(account = %id, "credentials validated");

    Ok(Account::new(
        Arc::new(session),
        portal.endpoints(),
        portal.refresh_interval(),
    ))
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
