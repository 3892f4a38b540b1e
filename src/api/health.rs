use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/", get(index))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "MDM Backend Server is running",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "platform": "rust/axum",
        "services": {
            "androidManagement": state.amapi.is_some(),
            "fcm": state.fcm.is_some(),
            "registry": state.registry.backend_name(),
        }
    }))
}

async fn index() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "MDM Backend API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "devices": "GET /api/devices, GET /api/devices/{name}, POST /api/devices/{name}/{lock|unlock|reboot|reset-password|wipe|lost-mode|exit-lost-mode|clear-app-data|commands}",
            "operations": "GET /api/devices/operations/{operationName}",
            "enterprise": "GET /api/enterprise, GET /api/enterprise/policies, GET|PUT /api/enterprise/policies/{id}, POST /api/enterprise/enrollment-tokens",
            "customDevices": "GET|PUT /api/custom-devices, POST /api/custom-devices/{register|lock|unlock}, GET /api/custom-devices/status/{status}, GET|DELETE /api/custom-devices/device/{identifier}",
            "deviceStatus": "GET /api/device-status/imei/{imei}",
            "fcm": "POST /api/fcm/{update-token|lock|unlock|wipe|custom-command|test}",
            "checksum": "GET /api/checksum?type=checksum|payload|verify",
            "download": "GET /api/download/{mdm-dpc-app.apk|app.apk}"
        }
    }))
}
