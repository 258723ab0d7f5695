use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use anas_bench::BenchmarkService;
use anas_core::KvStore;
use anas_store::RunRepository;

use crate::handlers;

/// Request body cap applied when none is configured. Runs carry raw source
/// text and comment threads, so this sits well above axum's 2 MiB default.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub runs: RunRepository,
    pub benchmarks: BenchmarkService,
    /// Default page size for `GET /runs`.
    pub list_limit: usize,
    /// Largest accepted request body, in bytes.
    pub body_limit: usize,
}

impl AppState {
    pub fn new(runs: RunRepository, benchmarks: BenchmarkService, list_limit: usize) -> Self {
        Self {
            runs,
            benchmarks,
            list_limit,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}

pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);
    if allowed_origins.iter().any(|o| o.trim() == "*") {
        return base.allow_origin(AllowOrigin::any());
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let v1 = Router::new()
        .route("/health", get(handlers::health))
        .route("/runs", post(handlers::submit_run).get(handlers::list_runs))
        .route("/runs/latest", get(handlers::latest_run))
        .route(
            "/runs/{id}",
            get(handlers::get_run).delete(handlers::delete_run),
        )
        .route(
            "/benchmarks/create/{run_id}",
            post(handlers::create_benchmark),
        )
        .route(
            "/benchmarks/by-id/{benchmark_id}",
            get(handlers::get_benchmark_by_id),
        )
        .route(
            "/benchmarks/{benchmark_id}/cancel",
            post(handlers::cancel_benchmark),
        )
        .route("/benchmarks/{run_id}", get(handlers::get_benchmark));

    let body_limit = state.body_limit;
    Router::new()
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener, std::io::Error> {
    let socket: SocketAddr = addr.parse().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid listen address '{addr}'"),
        )
    })?;
    tokio::net::TcpListener::bind(socket).await
}

/// Serve until `shutdown` resolves, then cancel and drain running
/// benchmarks so each records an outcome.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    allowed_origins: &[String],
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let benchmarks = state.benchmarks.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    let result = axum::serve(listener, router(state, allowed_origins))
        .with_graceful_shutdown(shutdown)
        .await;
    benchmarks.shutdown().await;
    result
}

// -------- Compaction --------

/// Run one compaction pass on the blocking pool. Errors are logged.
pub async fn compact_once(store: Arc<dyn KvStore>) -> usize {
    match tokio::task::spawn_blocking(move || store.compact()).await {
        Ok(Ok(reclaimed)) => {
            if reclaimed > 0 {
                info!(reclaimed, "store compaction reclaimed expired entries");
            } else {
                debug!("store compaction: nothing to reclaim");
            }
            reclaimed
        }
        Ok(Err(e)) => {
            warn!("store compaction failed: {e}");
            0
        }
        Err(e) => {
            warn!("store compaction task failed: {e}");
            0
        }
    }
}

/// Periodic compaction for the lifetime of the process.
pub fn spawn_compactor(store: Arc<dyn KvStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            compact_once(store.clone()).await;
        }
    })
}
