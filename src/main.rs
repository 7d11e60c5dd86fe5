use mimalloc::MiMalloc;
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use portal_controller::PortalError;
use portal_controller::config::Config;
use portal_controller::router::{PortalState, portal_router};
use portal_controller::service::{CommandExecutor, QueryService, RetryPolicy, probe_for};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), PortalError> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.basic.listen_addr,
        database_url = %cfg.basic.database_url,
        loglevel = %cfg.basic.loglevel,
        auth = !cfg.basic.admin_key.is_empty(),
        stats_engine = !cfg.stats.engine_url.is_empty(),
    );
    if cfg.basic.admin_key.is_empty() {
        warn!("PORTAL_BASIC__ADMIN_KEY is empty; the API is unauthenticated");
    }

    // SQLite creates the file but not its directory.
    if let Some(dir) = cfg
        .basic
        .database_url
        .strip_prefix("sqlite:")
        .filter(|p| !p.contains(":memory:"))
        .map(|p| p.trim_start_matches("//"))
        .map(|p| p.split_once('?').map_or(p, |(path, _)| path))
        .and_then(|p| Path::new(p).parent())
        .filter(|d| !d.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir)?;
    }

    let store = portal_controller::db::spawn(
        &cfg.basic.database_url,
        std::time::Duration::from_millis(cfg.store.call_timeout_ms),
    )
    .await?;

    let retry = RetryPolicy::from_config(&cfg.store);
    let executor = CommandExecutor::new(store.clone(), retry);
    let stats = probe_for(&cfg.stats.engine_url, cfg.stats.acquire_timeout())?;
    let query = QueryService::new(store.clone(), retry, stats);

    let state = PortalState::new(executor, query, &cfg.basic.admin_key);
    let app = portal_router(state, cfg.basic.body_limit_bytes);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    store.stop();
    Ok(())
}
