use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::{
    devices::amapi,
    types::{optional_body, ApiResponse, ApiResult, Json},
};
use crate::{
    model::amapi::{EnrollmentToken, Enterprise, Policy},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/enterprise", get(get_enterprise))
        .route("/api/enterprise/policies", get(list_policies))
        .route(
            "/api/enterprise/policies/{id}",
            get(get_policy).put(upsert_policy),
        )
        .route(
            "/api/enterprise/enrollment-tokens",
            post(create_enrollment_token).get(list_enrollment_tokens),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrollmentTokenRequest {
    #[serde(default)]
    policy_name: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

async fn get_enterprise(State(state): State<AppState>) -> ApiResult<ApiResponse<Enterprise>> {
    Ok(ApiResponse::ok(amapi(&state)?.get_enterprise().await?))
}

async fn list_policies(State(state): State<AppState>) -> ApiResult<ApiResponse<Vec<Policy>>> {
    Ok(ApiResponse::ok(amapi(&state)?.list_policies().await?))
}

async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<Policy>> {
    Ok(ApiResponse::ok(amapi(&state)?.get_policy(&id).await?))
}

async fn upsert_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(policy): Json<Value>,
) -> ApiResult<ApiResponse<Policy>> {
    let saved = amapi(&state)?.upsert_policy(&id, policy).await?;
    Ok(ApiResponse::with_message(saved, "Policy saved"))
}

async fn create_enrollment_token(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, ApiResponse<EnrollmentToken>)> {
    let req: EnrollmentTokenRequest = optional_body(&body)?;
    let token = amapi(&state)?
        .create_enrollment_token(req.policy_name.as_deref(), req.duration.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(token, "Enrollment token created"),
    ))
}

async fn list_enrollment_tokens(
    State(state): State<AppState>,
) -> ApiResult<ApiResponse<Vec<EnrollmentToken>>> {
    Ok(ApiResponse::ok(amapi(&state)?.list_enrollment_tokens().await?))
}
