use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

pub mod checksum;
pub mod custom_devices;
pub mod device_status;
pub mod devices;
pub mod download;
pub mod enterprise;
pub mod fcm;
pub mod health;
pub mod types;

/// Full HTTP surface: every route group, the JSON 404 fallback, request
/// logging and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(devices::router())
        .merge(enterprise::router())
        .merge(custom_devices::router())
        .merge(device_status::router())
        .merge(fcm::router())
        .merge(checksum::router())
        .merge(download::router())
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), mask_internal_errors))
        .layer(middleware::from_fn(log_request))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint not found",
            "path": uri.path(),
        })),
    )
        .into_response()
}

/// In production a 500 carries a generic error; the cause is only logged.
async fn mask_internal_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::INTERNAL_SERVER_ERROR || !state.config.is_production() {
        return response;
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": "Internal server error" })),
    )
        .into_response()
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
