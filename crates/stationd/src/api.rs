use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::routes::WebhookRequest;
use crate::sensor::remap::DEFAULT_URL;
use crate::sensor::remap::WSLINK_URL;
use crate::station::Station;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
    version: &'static str,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    station: Arc<Station>,
}

/// Handler for both station upload paths
///
/// Every request is handed to the route dispatcher, which decides whether the
/// path is currently live.
#[tracing::instrument(skip_all, fields(path = %uri.path()))]
async fn webhook(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let request = WebhookRequest {
        path: uri.path().to_string(),
        query: query.into_iter().collect(),
    };
    state.station.routes().dispatch(request).await
}

/// Handler for GET /v1/ping
#[tracing::instrument(skip(state))]
async fn ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
            version: state.version,
        }),
    )
}

/// Handler for GET /v1/sensors
#[tracing::instrument(skip(state))]
async fn sensors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.station.registry().states())
}

/// Handler for GET /v1/notifications
#[tracing::instrument(skip(state))]
async fn notifications(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.station.notifier().center.get_all())
}

/// Handler for DELETE /v1/notifications/:id
#[tracing::instrument(skip(state))]
async fn dismiss_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.station.notifier().center.dismiss(&id) {
        Some(notification) => Json(notification).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(DEFAULT_URL, get(webhook))
        .route(WSLINK_URL, get(webhook).post(webhook))
        .route("/v1/ping", get(ping))
        .route("/v1/sensors", get(sensors))
        .route("/v1/notifications", get(notifications))
        .route("/v1/notifications/:id", delete(dismiss_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server
///
/// Binds to `listen:port` and serves the station webhooks and the read-only
/// API until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    station: Arc<Station>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, station });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP server shutting down gracefully");
        })
        .await?;

    Ok(())
}
