use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GoogleApiError {
    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("token exchange failed: {0}")]
    Auth(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        body: Option<Value>,
    },
}

impl GoogleApiError {
    /// Build an `Api` error from a non-success response, keeping Google's
    /// own `error.message` when the body carries one.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body: Option<Value> = serde_json::from_str(&text).ok();
        let message = body
            .as_ref()
            .and_then(google_error_message)
            .unwrap_or_else(|| {
                if text.is_empty() {
                    format!("upstream returned status {status}")
                } else {
                    text.clone()
                }
            });

        GoogleApiError::Api {
            status,
            message,
            body,
        }
    }

    /// FCM's `errorCode` detail (e.g. `UNREGISTERED`), when present.
    pub fn error_code(&self) -> Option<String> {
        let GoogleApiError::Api {
            body: Some(body), ..
        } = self
        else {
            return None;
        };

        body["error"]["details"]
            .as_array()
            .and_then(|details| {
                details
                    .iter()
                    .find_map(|d| d.get("errorCode").and_then(Value::as_str))
            })
            .or_else(|| body["error"]["status"].as_str())
            .map(str::to_string)
    }
}

fn google_error_message(body: &Value) -> Option<String> {
    match &body["error"] {
        Value::Object(err) => err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::String(code) => Some(
            body["error_description"]
                .as_str()
                .map(|d| format!("{code}: {d}"))
                .unwrap_or_else(|| code.clone()),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_and_oauth_messages() {
        let api = json!({"error": {"code": 404, "message": "Device not found", "status": "NOT_FOUND"}});
        assert_eq!(google_error_message(&api).as_deref(), Some("Device not found"));

        let oauth = json!({"error": "invalid_grant", "error_description": "Invalid JWT"});
        assert_eq!(
            google_error_message(&oauth).as_deref(),
            Some("invalid_grant: Invalid JWT")
        );
    }

    #[test]
    fn reads_fcm_error_code() {
        let err = GoogleApiError::Api {
            status: 404,
            message: "Requested entity was not found.".into(),
            body: Some(json!({
                "error": {
                    "status": "NOT_FOUND",
                    "details": [{"@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError", "errorCode": "UNREGISTERED"}]
                }
            })),
        };
        assert_eq!(err.error_code().as_deref(), Some("UNREGISTERED"));
    }
}
