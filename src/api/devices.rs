use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{optional_body, ApiError, ApiResponse, ApiResult, Json};
use crate::{
    google::AndroidManagementClient,
    model::{
        amapi::Device,
        command::{Command, CommandOperation, LostModeContact},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/operations/{*operation}", get(get_operation))
        .route("/api/devices/{name}", get(get_device))
        .route("/api/devices/{name}/lock", post(lock_device))
        .route("/api/devices/{name}/unlock", post(unlock_device))
        .route("/api/devices/{name}/reboot", post(reboot_device))
        .route("/api/devices/{name}/reset-password", post(reset_password))
        .route("/api/devices/{name}/wipe", post(wipe_device))
        .route("/api/devices/{name}/lost-mode", post(enable_lost_mode))
        .route("/api/devices/{name}/exit-lost-mode", post(disable_lost_mode))
        .route("/api/devices/{name}/clear-app-data", post(clear_app_data))
        .route("/api/devices/{name}/commands", post(issue_command))
}

pub(super) fn amapi(state: &AppState) -> ApiResult<Arc<AndroidManagementClient>> {
    state
        .amapi
        .clone()
        .ok_or_else(|| ApiError::unavailable("Android Management API"))
}

#[derive(Debug, Default, Deserialize)]
struct LockRequest {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WipeRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearAppDataRequest {
    #[serde(default)]
    package_name: Option<String>,
}

async fn list_devices(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<Device>>> {
    let devices = amapi(&state)?.list_devices().await?;
    Ok(ApiResponse::ok(devices))
}

async fn get_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<Device>> {
    Ok(ApiResponse::ok(amapi(&state)?.get_device(&name).await?))
}

async fn get_operation(
    State(state): State<AppState>,
    Path(operation): Path<String>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    Ok(ApiResponse::ok(amapi(&state)?.get_operation(&operation).await?))
}

async fn lock_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let req: LockRequest = optional_body(&body)?;
    let op = amapi(&state)?
        .lock_device(&name, req.duration.as_deref())
        .await?;
    Ok(ApiResponse::with_message(op, "Lock command issued"))
}

async fn unlock_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let op = amapi(&state)?.unlock_device(&name).await?;
    Ok(ApiResponse::with_message(
        op,
        "Unlock requested via reboot; the lock screen clears when the device restarts",
    ))
}

async fn reboot_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let op = amapi(&state)?.reboot_device(&name).await?;
    Ok(ApiResponse::with_message(op, "Reboot command issued"))
}

async fn reset_password(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let op = amapi(&state)?.reset_password(&name).await?;
    Ok(ApiResponse::with_message(op, "Reset password command issued"))
}

async fn wipe_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<ApiResponse<Value>> {
    let req: WipeRequest = optional_body(&body)?;
    let device = amapi(&state)?
        .wipe_device(&name, req.reason.as_deref())
        .await?;
    Ok(ApiResponse::with_message(
        json!({ "name": device, "wiped": true }),
        "Device wipe requested",
    ))
}

async fn enable_lost_mode(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(contact): Json<LostModeContact>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let op = amapi(&state)?.enable_lost_mode(&name, &contact).await?;
    Ok(ApiResponse::with_message(op, "Lost mode enabled"))
}

async fn disable_lost_mode(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let op = amapi(&state)?.disable_lost_mode(&name).await?;
    Ok(ApiResponse::with_message(op, "Lost mode disabled"))
}

async fn clear_app_data(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ClearAppDataRequest>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let package = req
        .package_name
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("packageName is required"))?;
    let op = amapi(&state)?.clear_app_data(&name, &package).await?;
    Ok(ApiResponse::with_message(op, "Clear app data command issued"))
}

async fn issue_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(command): Json<Command>,
) -> ApiResult<ApiResponse<CommandOperation>> {
    let op = amapi(&state)?.issue_command(&name, &command).await?;
    Ok(ApiResponse::with_message(
        op,
        format!("{} command issued", command.kind()),
    ))
}
