use std::sync::Arc;

use axum::{extract::State, routing::post, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::types::{ApiError, ApiResponse, ApiResult, Json};
use crate::{
    fcm::{CommandDispatch, FcmCommandService, MdmCommand},
    model::device::{DeviceIdentity, DeviceRecord},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/fcm/update-token", post(update_token))
        .route("/api/fcm/lock", post(lock))
        .route("/api/fcm/unlock", post(unlock))
        .route("/api/fcm/wipe", post(wipe))
        .route("/api/fcm/custom-command", post(custom_command))
        .route("/api/fcm/test", post(test_message))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTokenRequest {
    #[serde(flatten)]
    identity: DeviceIdentity,
    #[serde(default)]
    fcm_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomCommandRequest {
    #[serde(flatten)]
    identity: DeviceIdentity,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct TestRequest {
    #[serde(flatten)]
    identity: DeviceIdentity,
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

fn service(state: &AppState) -> ApiResult<Arc<FcmCommandService>> {
    state
        .fcm
        .clone()
        .ok_or_else(|| ApiError::unavailable("Firebase Cloud Messaging"))
}

fn identifier(identity: &DeviceIdentity) -> ApiResult<String> {
    identity
        .identifier()
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("either imei or androidId is required"))
}

async fn update_token(
    State(state): State<AppState>,
    Json(req): Json<UpdateTokenRequest>,
) -> ApiResult<ApiResponse<DeviceRecord>> {
    let id = identifier(&req.identity)?;
    let token = req
        .fcm_token
        .ok_or_else(|| ApiError::bad_request("fcmToken is required"))?;
    // Token registration only touches the registry, so it works without FCM credentials.
    let device = match &state.fcm {
        Some(fcm) => fcm.update_token(&id, &token).await?,
        None if token.trim().is_empty() => {
            return Err(ApiError::bad_request("fcmToken is required"))
        }
        None => state.registry.update_fcm_token(&id, &token).await?,
    };
    Ok(ApiResponse::with_message(device, "FCM token updated successfully"))
}

async fn dispatch(
    state: &AppState,
    identity: &DeviceIdentity,
    command: MdmCommand,
) -> ApiResult<CommandDispatch> {
    let id = identifier(identity)?;
    Ok(service(state)?.send_command(&id, command).await?)
}

async fn lock(
    State(state): State<AppState>,
    Json(identity): Json<DeviceIdentity>,
) -> ApiResult<ApiResponse<CommandDispatch>> {
    let result = dispatch(&state, &identity, MdmCommand::LockDevice).await?;
    Ok(ApiResponse::with_message(
        result,
        "Lock command sent successfully via FCM",
    ))
}

async fn unlock(
    State(state): State<AppState>,
    Json(identity): Json<DeviceIdentity>,
) -> ApiResult<ApiResponse<CommandDispatch>> {
    let result = dispatch(&state, &identity, MdmCommand::UnlockDevice).await?;
    Ok(ApiResponse::with_message(
        result,
        "Unlock command sent successfully via FCM",
    ))
}

async fn wipe(
    State(state): State<AppState>,
    Json(identity): Json<DeviceIdentity>,
) -> ApiResult<ApiResponse<CommandDispatch>> {
    let result = dispatch(&state, &identity, MdmCommand::WipeDevice).await?;
    Ok(ApiResponse::with_message(
        result,
        "Wipe command sent successfully via FCM",
    ))
}

async fn custom_command(
    State(state): State<AppState>,
    Json(req): Json<CustomCommandRequest>,
) -> ApiResult<ApiResponse<CommandDispatch>> {
    let id = identifier(&req.identity)?;
    let command = req
        .command
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("command is required"))?;

    let result = service(&state)?
        .send_custom(
            &id,
            &command,
            req.title.as_deref(),
            req.body.as_deref(),
            req.data.as_ref(),
        )
        .await?;
    Ok(ApiResponse::with_message(
        result,
        "Custom command sent successfully via FCM",
    ))
}

async fn test_message(
    State(state): State<AppState>,
    Json(req): Json<TestRequest>,
) -> ApiResult<ApiResponse<CommandDispatch>> {
    let id = identifier(&req.identity)?;
    let result = service(&state)?.send_test(&id, req.data.as_ref()).await?;
    Ok(ApiResponse::with_message(
        result,
        "Test data message sent successfully",
    ))
}
