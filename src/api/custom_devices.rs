use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{ApiError, ApiResponse, ApiResult, Json};
use crate::{
    model::device::{DeviceIdentity, DeviceRecord, DeviceStatus, DeviceUpdate, NewDevice},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/custom-devices",
            get(list_devices).put(update_device_status),
        )
        .route("/api/custom-devices/status/{status}", get(list_by_status))
        .route(
            "/api/custom-devices/device/{identifier}",
            get(get_device).delete(delete_device),
        )
        .route("/api/custom-devices/register", post(register_device))
        .route("/api/custom-devices/lock", post(lock_device))
        .route("/api/custom-devices/unlock", post(unlock_device))
}

/// Status update: the identifier pair plus any [`DeviceUpdate`] fields.
#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    #[serde(flatten)]
    identity: DeviceIdentity,
    #[serde(flatten)]
    update: DeviceUpdate,
}

fn identifier(identity: &DeviceIdentity) -> ApiResult<String> {
    identity
        .identifier()
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("either imei or androidId is required"))
}

async fn list_devices(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<DeviceRecord>>> {
    let devices = state.registry.list_devices().await?;
    let count = devices.len();
    Ok(ApiResponse::with_message(devices, format!("Found {count} devices")))
}

async fn list_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> ApiResult<ApiResponse<Vec<DeviceRecord>>> {
    let status: DeviceStatus = status.parse().map_err(ApiError::bad_request)?;
    let devices = state.registry.list_devices_by_status(status).await?;
    Ok(ApiResponse::ok(devices))
}

async fn get_device(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> ApiResult<ApiResponse<DeviceRecord>> {
    state
        .registry
        .get_device(&identifier)
        .await?
        .map(ApiResponse::ok)
        .ok_or_else(|| {
            ApiError::not_found("Device not found").with_data(json!({ "identifier": identifier }))
        })
}

async fn delete_device(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> ApiResult<ApiResponse<DeviceRecord>> {
    let removed = state.registry.delete_device(&identifier).await?;
    Ok(ApiResponse::with_message(removed, "Device deleted"))
}

async fn register_device(
    State(state): State<AppState>,
    Json(data): Json<NewDevice>,
) -> ApiResult<(StatusCode, ApiResponse<DeviceRecord>)> {
    let registration = state.registry.register_device(data).await?;
    if registration.created {
        Ok((
            StatusCode::CREATED,
            ApiResponse::with_message(registration.record, "Device registered successfully"),
        ))
    } else {
        Ok((
            StatusCode::OK,
            ApiResponse::with_message(registration.record, "Device already registered; details updated"),
        ))
    }
}

async fn lock_device(
    State(state): State<AppState>,
    Json(identity): Json<DeviceIdentity>,
) -> ApiResult<ApiResponse<DeviceRecord>> {
    let device = state.registry.lock_device(&identifier(&identity)?).await?;
    Ok(ApiResponse::with_message(device, "Device locked"))
}

async fn unlock_device(
    State(state): State<AppState>,
    Json(identity): Json<DeviceIdentity>,
) -> ApiResult<ApiResponse<DeviceRecord>> {
    let device = state.registry.unlock_device(&identifier(&identity)?).await?;
    Ok(ApiResponse::with_message(device, "Device unlocked"))
}

async fn update_device_status(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<ApiResponse<DeviceRecord>> {
    let req: StatusUpdateRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?;
    let id = identifier(&req.identity)?;
    let device = state.registry.update_device_status(&id, req.update).await?;
    Ok(ApiResponse::with_message(device, "Device status updated"))
}
