use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::types::{ApiError, ApiResponse, ApiResult};
use crate::{model::device::DeviceStatusView, state::AppState};

static IMEI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{15}$").expect("valid imei regex"));

pub fn router() -> Router<AppState> {
    Router::new().route("/api/device-status/imei/{imei}", get(status_by_imei))
}

async fn status_by_imei(
    State(state): State<AppState>,
    Path(imei): Path<String>,
) -> ApiResult<ApiResponse<DeviceStatusView>> {
    if !IMEI_RE.is_match(&imei) {
        return Err(ApiError::bad_request(
            "Invalid IMEI format. IMEI must be 15 digits.",
        ));
    }

    match state.registry.device_status_by_imei(&imei).await? {
        Some(view) => Ok(ApiResponse::with_message(
            view,
            "Device status retrieved from custom database",
        )),
        None => Err(ApiError::not_found("Device not found").with_data(json!({
            "imei": imei,
            "source": "not_found",
            "message": "Device not found in custom database. Please verify the IMEI number or register the device first."
        }))),
    }
}
