use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::{
    checksum::ChecksumError,
    fcm::FcmFlowError,
    google::GoogleApiError,
    registry::RegistryError,
};

/// JSON body extractor whose rejections render as the `{success: false}`
/// envelope instead of axum's plain-text errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<S, T> FromRequest<S> for Json<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Json(value))
    }
}

/// Body that may be absent: an empty payload or `null` reads as the default.
pub fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => Ok(T::default()),
        Ok(value) => serde_json::from_value(value)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}"))),
        Err(e) => Err(ApiError::bad_request(format!("malformed JSON body: {e}"))),
    }
}

/// Success envelope: `{success: true, data?, message?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        axum::Json(self).into_response()
    }
}

/// Handler error rendered as `{success: false, error, message?, data?}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub message: Option<String>,
    pub data: Option<Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: None,
            data: None,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn unavailable(service: &str) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{service} is not configured"),
        )
        .with_message("Check the service account credentials and restart the server")
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.error, "request failed");
        } else {
            warn!(status = %self.status, error = %self.error, "request rejected");
        }

        let mut body = json!({ "success": false, "error": self.error });
        if let Some(message) = self.message {
            body["message"] = json!(message);
        }
        if let Some(data) = self.data {
            body["data"] = data;
        }
        (self.status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection {
            JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, "Invalid request body").with_message(rejection.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::MissingIdentifier => ApiError::bad_request(err.to_string()),
            RegistryError::NotFound(_) => ApiError::not_found("Device not found").with_message(err.to_string()),
            RegistryError::DuplicateDevice(ref existing) => {
                let data = serde_json::to_value(existing.as_ref()).unwrap_or(Value::Null);
                ApiError::new(StatusCode::CONFLICT, err.to_string()).with_data(data)
            }
            RegistryError::IdentifierConflict { .. } => {
                ApiError::new(StatusCode::CONFLICT, err.to_string())
            }
            RegistryError::Storage(_) | RegistryError::Serialization(_) => {
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<GoogleApiError> for ApiError {
    fn from(err: GoogleApiError) -> Self {
        match err {
            GoogleApiError::InvalidRequest(msg) => ApiError::bad_request(msg),
            GoogleApiError::Api { status: 404, message, .. } => ApiError::not_found(message),
            GoogleApiError::Api { message, .. } => ApiError::new(StatusCode::BAD_GATEWAY, message),
            GoogleApiError::Credentials(_) | GoogleApiError::Auth(_) => {
                ApiError::new(StatusCode::BAD_GATEWAY, err.to_string())
                    .with_message("Failed to authenticate with Google")
            }
            GoogleApiError::Transport(_) => ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()),
        }
    }
}

impl From<FcmFlowError> for ApiError {
    fn from(err: FcmFlowError) -> Self {
        match err {
            FcmFlowError::Registry(inner) => inner.into(),
            FcmFlowError::MissingToken(_) | FcmFlowError::EmptyToken => {
                ApiError::bad_request(err.to_string())
            }
            FcmFlowError::Send { token_invalid, .. } => {
                let upstream = ApiError::new(StatusCode::BAD_GATEWAY, err.to_string());
                if token_invalid {
                    upstream
                        .with_message("The device's FCM token is no longer valid; the app must re-register")
                        .with_data(json!({ "tokenInvalid": true }))
                } else {
                    upstream
                }
            }
        }
    }
}

impl From<ChecksumError> for ApiError {
    fn from(err: ChecksumError) -> Self {
        match err {
            ChecksumError::NotFound(_) | ChecksumError::NoApk => ApiError::not_found(err.to_string()),
            ChecksumError::Io { .. } => ApiError::internal(err.to_string()),
        }
    }
}
