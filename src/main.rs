use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use openslot::engine::Engine;
use openslot::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("OPENSLOT_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    openslot::observability::init(metrics_port);

    let port = std::env::var("OPENSLOT_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("OPENSLOT_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("OPENSLOT_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("OPENSLOT_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let snapshot_ttl_ms: i64 = std::env::var("OPENSLOT_SNAPSHOT_TTL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(openslot::limits::DEFAULT_SNAPSHOT_TTL_MS);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("openslot.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path, notify, snapshot_ttl_ms)?);

    tokio::spawn(openslot::reaper::run_reaper(engine.clone()));
    tokio::spawn(openslot::reaper::run_compactor(
        engine.clone(),
        compact_threshold,
    ));

    let app = openslot::api::router(engine);

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("openslot listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  snapshot_ttl_ms: {snapshot_ttl_ms}");
    info!("  compact_threshold: {compact_threshold}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("openslot stopped");
    Ok(())
}
