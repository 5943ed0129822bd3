//! HTTP service exposing the probe engine as JSON endpoints.
//!
//! Routes:
//! - `POST /api/probe` - diagnostics probe with full response classification
//! - `POST /api/scan` - lightweight probe for bulk scanning
//! - `POST /api/proxy-check` - proxy connectivity (`test_type: proxy`) or stream validation (`test_type: stream`)
//! - `GET /api/download/{id}` - one-shot retrieval of a cached body
//!
//! Every response body is JSON with the same envelope shape, including rejections.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::handler::Handler;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ArtifactCache, CacheEntry};
use crate::checks::{ProxyChecker, check_stream};
use crate::geo::IpLocator;
use crate::probe::{ProbeEngine, ProbeProfile, sanitize_filename};
use crate::wire::{ProbeRequestBody, ResultRecord, WireError};

/// Engines and collaborators shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    diagnostics: ProbeEngine,
    scan: ProbeEngine,
    stream: ProbeEngine,
    proxy_checker: ProxyChecker,
}

impl AppState {
    /// Derives the per-route engines from `engine`, which supplies the
    /// resolver, transport, clock and optional cache.
    #[must_use]
    pub fn new(engine: ProbeEngine, locator: Arc<dyn IpLocator>) -> Self {
        Self {
            diagnostics: engine.with_profile(ProbeProfile::diagnostics()),
            scan: engine.with_profile(ProbeProfile::scan()),
            proxy_checker: ProxyChecker::new(&engine, locator),
            stream: engine,
        }
    }

    /// Overrides the IP-echo endpoint used by proxy checks.
    #[must_use]
    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_checker = self.proxy_checker.with_echo_url(url);
        self
    }

    fn cache(&self) -> Option<&ArtifactCache> {
        self.diagnostics.cache()
    }
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/probe", api_route(probe))
        .route("/api/scan", api_route(scan))
        .route("/api/proxy-check", api_route(proxy_check))
        .route(
            "/api/download/{id}",
            get(download)
                .head(empty_ok)
                .options(empty_ok)
                .fallback(method_not_allowed),
        )
        .fallback(route_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an I/O error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn api_route<H, T>(handler: H) -> MethodRouter<AppState>
where
    H: Handler<T, AppState>,
    T: 'static,
{
    post(handler)
        .options(empty_ok)
        .head(empty_ok)
        .fallback(method_not_allowed)
}

async fn empty_ok() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    reject(&WireError::MethodNotAllowed)
}

async fn route_not_found(uri: Uri) -> Response {
    reject(&WireError::RouteNotFound {
        path: uri.path().to_string(),
    })
}

fn reject(error: &WireError) -> Response {
    let status = StatusCode::from_u16(error.status()).unwrap_or(StatusCode::BAD_REQUEST);
    debug!(%status, error = %error, "Rejected request");
    (status, Json(ResultRecord::rejected(error))).into_response()
}

async fn sweep_cache(state: &AppState) {
    if let Some(cache) = state.cache()
        && let Err(e) = cache.sweep().await
    {
        warn!(error = %e, "Cache sweep failed");
    }
}

#[instrument(skip_all)]
async fn probe(State(state): State<AppState>, body: Bytes) -> Response {
    sweep_cache(&state).await;
    run_probe(&state.diagnostics, &body)
        .await
        .unwrap_or_else(|e| reject(&e))
}

#[instrument(skip_all)]
async fn scan(State(state): State<AppState>, body: Bytes) -> Response {
    run_probe(&state.scan, &body)
        .await
        .unwrap_or_else(|e| reject(&e))
}

async fn run_probe(engine: &ProbeEngine, body: &[u8]) -> Result<Response, WireError> {
    let request = ProbeRequestBody::parse(body)?;
    let spec = request.to_spec(engine.profile())?;
    let report = engine.execute(&spec).await;
    Ok(Json(ResultRecord::from(&report)).into_response())
}

#[instrument(skip_all)]
async fn proxy_check(State(state): State<AppState>, body: Bytes) -> Response {
    run_proxy_check(&state, &body)
        .await
        .unwrap_or_else(|e| reject(&e))
}

async fn run_proxy_check(state: &AppState, body: &[u8]) -> Result<Response, WireError> {
    let request = ProbeRequestBody::parse(body)?;
    match request.test_type().as_str() {
        "proxy" => {
            let proxy = request.required_proxy()?;
            let report = state
                .proxy_checker
                .check(&proxy, request.timeout_secs(), request.test_anonymity())
                .await;
            Ok(Json(report).into_response())
        }
        "stream" => {
            request.required_proxy()?;
            let check_m3u8 = request.check_m3u8();
            let spec = request.to_spec(&ProbeProfile::stream_check(check_m3u8))?;
            let report = check_stream(&state.stream, &spec, check_m3u8).await;
            Ok(Json(report).into_response())
        }
        other => Err(WireError::UnknownTestType {
            test_type: other.to_string(),
        }),
    }
}

#[instrument(skip_all, fields(id = %id))]
async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(cache) = state.cache() else {
        return reject(&WireError::NotFound);
    };
    match cache.take(&id).await {
        Ok(Some(entry)) => attachment(entry),
        Ok(None) => reject(&WireError::NotFound),
        Err(e) => {
            warn!(error = %e, "Failed to read cached response");
            reject(&WireError::NotFound)
        }
    }
}

fn attachment(entry: CacheEntry) -> Response {
    let content_type = entry.content_type().to_string();
    let filename = sanitize_filename(&entry.suggested_filename);
    (
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
        ],
        entry.body,
    )
        .into_response()
}
