//! boardcast: the collaborative multi-tab workspace server.
//!
//! Opens the workspace store, boots the hub and autosave tasks, and serves
//! the `/api` surface until interrupted.

mod auth;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use boardcast_sync::{
    router, ApiState, Autosave, Hub, SessionTokens, StoreConfig, SyncConfig, WorkspaceStore,
};
use clap::Parser;

use auth::{AuthState, PasswordSource};

const PASSWORD_ENV: &str = "BOARDCAST_PASSWORD";
const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(3600);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "boardcast")]
#[command(about = "Real-time collaborative multi-tab text workspace", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory holding the workspace database
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Workspace password (prefer BOARDCAST_PASSWORD or --password-file)
    #[arg(long)]
    password: Option<String>,

    /// File containing the workspace password
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Seconds between history captures
    #[arg(long, default_value_t = 300)]
    autosave_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    let (password, source) = auth::resolve_password(
        std::env::var(PASSWORD_ENV).ok(),
        args.password_file.as_deref(),
        args.password.clone(),
    )?;
    match source {
        PasswordSource::Flag => log::warn!(
            "--password is deprecated, use {PASSWORD_ENV} or --password-file instead"
        ),
        PasswordSource::Default => log::warn!(
            "No password set, using default password '{}'",
            auth::DEFAULT_PASSWORD
        ),
        PasswordSource::Env | PasswordSource::File => {
            log::info!("Password loaded from {source:?}")
        }
    }

    let config = Arc::new(SyncConfig {
        autosave_interval_secs: args.autosave_secs.max(1),
        ..SyncConfig::default()
    });

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data dir {}", args.data_dir.display()))?;
    let store = Arc::new(
        WorkspaceStore::open(StoreConfig {
            path: args.data_dir.join("boardcast.db"),
            max_image_bytes: config.max_image_bytes,
            ..StoreConfig::default()
        })
        .context("failed to open workspace store")?,
    );
    log::info!("Workspace store opened at {}", store.path().display());

    let (hub, handle) = Hub::new(store.clone(), &config).context("failed to bootstrap tabs")?;
    let hub_task = hub.spawn();
    let autosave_task = Autosave::new(&handle, store.clone(), &config).spawn();

    let tokens = Arc::new(SessionTokens::new(config.token_ttl()));
    let purge_tokens = tokens.clone();
    let purge_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TOKEN_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = purge_tokens.purge_expired();
            if purged > 0 {
                log::debug!("Purged {purged} expired session tokens");
            }
        }
    });

    let app = auth::router(AuthState::new(password, tokens.clone())).merge(router(ApiState {
        hub: handle,
        store: store.clone(),
        verifier: tokens,
        config,
    }));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("boardcast listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("Shutting down");
    purge_task.abort();
    autosave_task.abort();
    // Upgraded sockets may still hold hub handles.
    match tokio::time::timeout(SHUTDOWN_GRACE, hub_task).await {
        Ok(Err(e)) => log::error!("Hub task failed: {e}"),
        Ok(Ok(())) => {}
        Err(_) => log::warn!("Hub still has live sessions, not waiting"),
    }
    store.sync()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
