use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::info;

use super::types::ApiResult;
use crate::{checksum, state::AppState};

pub const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

/// Names a device may request; all of them resolve to the DPC APK.
pub const DOWNLOADABLE_FILES: [&str; 2] = ["mdm-dpc-app.apk", "app.apk"];

pub fn router() -> Router<AppState> {
    Router::new().route("/api/download/{file}", get(download))
}

async fn download(
    State(state): State<AppState>,
    Path(file): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    if !DOWNLOADABLE_FILES.contains(&file.as_str()) {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "File not found",
                "availableFiles": DOWNLOADABLE_FILES,
            })),
        )
            .into_response());
    }

    let path = checksum::find_dpc_apk(&state.config.provisioning).await?;
    info!(file = %file, path = %path.display(), "serving DPC APK");

    let response = ServeFile::new_with_mime(
        &path,
        &APK_CONTENT_TYPE.parse().expect("APK_CONTENT_TYPE is a valid MIME type"),
    )
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{file}\"")) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, disposition);
        }
    }
    Ok(response)
}
