use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    dispatch::{self, ScanMode},
    engine::EngineFactory,
    error::ScanError,
    normalize::Normalizer,
    pool::{EnginePool, WorkerSlots},
    target,
    types::ScanResult,
};

/// Runtime settings for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub workers: usize,
    pub scan_timeout: Duration,
    /// How long a request may wait for a free worker before it is turned away.
    pub queue_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".into(),
            workers: 4,
            scan_timeout: Duration::from_secs(600),
            queue_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pool: Arc<EnginePool>,
    workers: WorkerSlots,
    normalizer: Arc<Normalizer>,
    scan_timeout: Duration,
    queue_timeout: Duration,
}

impl AppState {
    pub fn new(config: &ServerConfig, factory: impl EngineFactory + 'static) -> Self {
        Self::with_normalizer(config, factory, Normalizer::default())
    }

    pub fn with_normalizer(
        config: &ServerConfig,
        factory: impl EngineFactory + 'static,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            pool: Arc::new(EnginePool::new(factory)),
            workers: WorkerSlots::new(config.workers),
            normalizer: Arc::new(normalizer),
            scan_timeout: config.scan_timeout,
            queue_timeout: config.queue_timeout,
        }
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }
}

/// A `POST /scan` body that has passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: String,
    pub scan_type: ScanMode,
}

impl ScanRequest {
    /// Check a decoded JSON body. Target problems are reported before
    /// scan type problems.
    pub fn from_json(body: &Value) -> Result<Self, ScanError> {
        let target = body
            .as_object()
            .and_then(|o| o.get("target"))
            .ok_or(ScanError::MissingTarget)?;
        let target = target.as_str().ok_or(ScanError::InvalidTarget)?;
        if !target::validate(target) {
            return Err(ScanError::InvalidTarget);
        }
        let scan_type = match body.get("scan_type") {
            None => ScanMode::default(),
            Some(Value::String(s)) => s.parse()?,
            Some(_) => return Err(ScanError::InvalidScanType),
        };
        Ok(Self {
            target: target.to_string(),
            scan_type,
        })
    }
}

impl<S> FromRequest<S> for ScanRequest
where
    S: Send + Sync,
{
    type Rejection = ScanError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| ScanError::MissingTarget)?;
        let value: Value = serde_json::from_slice(&body).map_err(|_| ScanError::MissingTarget)?;
        Self::from_json(&value)
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    workers: usize,
    engines: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scan", post(post_scan))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then release the pooled engines.
pub async fn serve(bind: &str, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    let released = state.pool.drain();
    tracing::info!(released, "server stopped, scan engines released");
    Ok(())
}

async fn get_health(State(app): State<AppState>) -> impl IntoResponse {
    let out = Health {
        status: "ok",
        workers: app.workers.capacity(),
        engines: app.pool.len(),
    };
    (StatusCode::OK, Json(out))
}

async fn post_scan(
    State(app): State<AppState>,
    req: ScanRequest,
) -> Result<Json<ScanResult>, ScanError> {
    let lease = tokio::time::timeout(app.queue_timeout, app.workers.lease())
        .await
        .map_err(|_| ScanError::Busy(app.queue_timeout))?;
    let handle = app.pool.acquire(lease.worker())?;
    let raw = dispatch::dispatch(&handle, &req.target, req.scan_type, app.scan_timeout).await?;
    drop(lease);
    Ok(Json(app.normalizer.normalize(raw, &req.target)))
}
