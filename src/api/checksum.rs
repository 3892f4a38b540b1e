use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{ApiError, ApiResponse, ApiResult};
use crate::{checksum, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/checksum", get(checksum_handler))
}

#[derive(Debug, Deserialize)]
struct ChecksumQuery {
    #[serde(rename = "type", default = "default_type")]
    kind: String,
    #[serde(default)]
    checksum: Option<String>,
}

fn default_type() -> String {
    "checksum".into()
}

async fn checksum_handler(
    State(state): State<AppState>,
    Query(query): Query<ChecksumQuery>,
) -> ApiResult<ApiResponse<Value>> {
    let settings = &state.config.provisioning;

    match query.kind.as_str() {
        "checksum" => {
            let result = checksum::dpc_checksum(settings).await?;
            Ok(ApiResponse::with_message(
                json!(result),
                "Signature checksum calculated successfully",
            ))
        }
        "payload" => {
            let result = checksum::dpc_checksum(settings).await?;
            let payload = checksum::provisioning_payload(settings, &result);
            Ok(ApiResponse::with_message(
                json!({ "payload": payload, "checksum": result }),
                "Provisioning payload generated successfully",
            ))
        }
        "verify" => {
            let expected = query
                .checksum
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ApiError::bad_request("checksum parameter is required for verification"))?;
            let verification = checksum::verify_checksum(settings, &expected).await?;
            let message = if verification.is_valid {
                "Checksum is valid"
            } else {
                "Checksum does not match"
            };
            Ok(ApiResponse::with_message(json!(verification), message))
        }
        _ => Err(ApiError::bad_request(
            "Invalid type parameter. Use: checksum, payload, or verify",
        )),
    }
}
