// src/bin/cache-server.rs
//! Minimal runnable entrypoint wiring the cache core to an HTTP surface.
//!
//! Routing and client authentication are explicitly out of scope for the
//! cache core itself (external collaborator), so `/files/:hash` here is an
//! illustration of wiring, not a hardened public endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use cache_distd::{
    CacheConfig, CachedFileProvider, CoalescingFetchCoordinator, Hash, Janitor,
    MetadataStore,
};
use cache_distd::metadata::InMemoryMetadataStore;
use cache_distd::metrics::AtomicMetricsSink;
use cache_distd::peer::PeerFetcher;
use cache_distd::token::StaticTokenProvider;
use cache_distd::clock::SystemClock;

#[derive(Parser, Debug)]
#[command(name = "cache-server", about = "content-addressed file cache daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/cache-server/config.toml")]
    config: std::path::PathBuf,

    /// Log level filter; falls back to `RUST_LOG` when unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Address the HTTP surface binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Bearer token presented to the upstream peer, when one is configured.
    #[arg(long, env = "CACHE_DISTD_PEER_TOKEN", default_value = "")]
    peer_token: String,
}

struct AppState {
    provider: CachedFileProvider,
    metrics: Arc<AtomicMetricsSink>,
    coordinator: Arc<CoalescingFetchCoordinator>,
    started_at: std::time::Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config = CacheConfig::from_file(&args.config)?;
    tracing::info!(path = %args.config.display(), "loaded configuration");

    let metrics = Arc::new(AtomicMetricsSink::new());
    let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
    let coordinator = Arc::new(CoalescingFetchCoordinator::new());
    let clock = Arc::new(SystemClock);

    let peer = if config.peer_configured() {
        let base_uri = config
            .distribution_file_server_address
            .clone()
            .expect("peer_configured implies address is set");
        let fetcher = PeerFetcher::new(
            base_uri,
            "files",
            Arc::new(StaticTokenProvider::new(args.peer_token.clone())),
            config.distribution_file_server_force_http2,
        )?;
        Some(Arc::new(fetcher))
    } else {
        None
    };

    let provider = CachedFileProvider::new(
        config.cache_directory.clone(),
        config.cold_enabled().then(|| config.cold_storage_directory.clone().unwrap()),
        peer,
        coordinator.clone(),
        metrics.clone() as Arc<dyn cache_distd::MetricsSink>,
        Arc::new(cache_distd::touch::NoopTouchSink),
        clock.clone(),
    );

    let janitor = Janitor::new(
        &config,
        metadata,
        coordinator.clone(),
        metrics.clone() as Arc<dyn cache_distd::MetricsSink>,
        clock,
    );

    let cancel = CancellationToken::new();
    let janitor_cancel = cancel.clone();
    let janitor_task = tokio::spawn(async move { janitor.run(janitor_cancel).await });

    let state = Arc::new(AppState {
        provider,
        metrics,
        coordinator,
        started_at: std::time::Instant::now(),
    });

    let app = Router::new()
        .route("/files/:hash", get(get_file))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(addr = %args.listen, "starting cache-server");
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = janitor_task.await;
    Ok(())
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    AxumPath(hash): AxumPath<String>,
) -> impl IntoResponse {
    let hash = match Hash::new(&hash) {
        Ok(h) => h,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid hash").into_response(),
    };

    match state.provider.get_or_fetch(&hash).await {
        Some(mut file) => {
            let mut body = Vec::new();
            if file.read_to_end(&mut body).await.is_err() {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            body.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (hot_files, hot_bytes) = state.metrics.tier_totals(cache_distd::Tier::Hot);
    let body = serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "hot_files": hot_files,
        "hot_bytes": hot_bytes,
        "in_flight_fetches": state.coordinator.in_flight_count(),
    });
    axum::Json(body)
}

fn init_logging(log_level: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
