pub mod service;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::{
    google::{AccessTokenSource, GoogleApiError},
    model::device::DeviceRecord,
};

pub use service::{CommandDispatch, FcmCommandService, FcmFlowError};

pub const FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1";
pub const DEFAULT_TTL: &str = "3600s";
pub const TEST_TTL: &str = "300s";
const TEST_MESSAGE: &str = "This is a test data message from MDM server";

/// Commands the on-device agent understands, delivered as FCM data messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdmCommand {
    LockDevice,
    UnlockDevice,
    WipeDevice,
    Test,
    Custom(String),
}

impl MdmCommand {
    pub fn command(&self) -> String {
        match self {
            MdmCommand::LockDevice => "LOCK_DEVICE".into(),
            MdmCommand::UnlockDevice => "UNLOCK_DEVICE".into(),
            MdmCommand::WipeDevice => "WIPE_DEVICE".into(),
            MdmCommand::Test => "TEST_MESSAGE".into(),
            MdmCommand::Custom(name) => name.trim().to_uppercase(),
        }
    }

    pub fn action(&self) -> String {
        match self {
            MdmCommand::LockDevice => "lock".into(),
            MdmCommand::UnlockDevice => "unlock".into(),
            MdmCommand::WipeDevice => "wipe".into(),
            MdmCommand::Test => "test".into(),
            MdmCommand::Custom(name) => name.trim().to_lowercase(),
        }
    }

    pub fn ttl(&self) -> &'static str {
        match self {
            MdmCommand::Test => TEST_TTL,
            _ => DEFAULT_TTL,
        }
    }

    /// Data payload for `device`. Caller-supplied `extra` keys may add fields
    /// but never replace `command` or `action`.
    pub fn payload(&self, device: &DeviceRecord, extra: Option<&Map<String, Value>>) -> Map<String, Value> {
        let mut data = Map::new();
        if let MdmCommand::Test = self {
            data.insert("message".into(), json!(TEST_MESSAGE));
        }
        data.insert("device_imei".into(), json!(device.imei.as_deref().unwrap_or_default()));
        data.insert(
            "device_android_id".into(),
            json!(device.android_id.as_deref().unwrap_or_default()),
        );
        data.insert(
            "device_name".into(),
            json!(device.device_name.as_deref().unwrap_or_default()),
        );
        data.insert("device_model".into(), json!(device.model.as_deref().unwrap_or_default()));

        if let Some(extra) = extra {
            for (key, value) in extra {
                data.insert(key.clone(), value.clone());
            }
        }

        data.insert("command".into(), json!(self.command()));
        data.insert("action".into(), json!(self.action()));
        data
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
}

/// FCM HTTP v1 sender for one Firebase project.
pub struct FcmClient {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    send_url: String,
    project_id: String,
}

impl FcmClient {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenSource>,
        base_url: &str,
        project_id: &str,
    ) -> Self {
        Self {
            http,
            tokens,
            send_url: format!(
                "{}/projects/{project_id}/messages:send",
                base_url.trim_end_matches('/')
            ),
            project_id: project_id.to_string(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub async fn send_data_message(
        &self,
        token: &str,
        data: &Map<String, Value>,
        ttl: &str,
    ) -> Result<SendReceipt, GoogleApiError> {
        let message = data_message(token, data, ttl, Utc::now());
        self.send(token, &message).await
    }

    pub async fn send_notification(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &Map<String, Value>,
    ) -> Result<SendReceipt, GoogleApiError> {
        let message = notification_message(token, title, body, data, Utc::now());
        self.send(token, &message).await
    }

    async fn send(&self, token: &str, message: &Value) -> Result<SendReceipt, GoogleApiError> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(message)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = GoogleApiError::from_response(response).await;
            error!(token = %redact(token), error = %err, code = ?err.error_code(), "fcm send failed");
            return Err(err);
        }

        let result: Value = response.json().await?;
        let message_id = result["name"].as_str().unwrap_or_default().to_string();
        info!(token = %redact(token), message_id = %message_id, "fcm message sent");
        Ok(SendReceipt { message_id })
    }
}

/// Whether FCM rejected the registration token itself. `INVALID_ARGUMENT`
/// also covers bad payloads, so it only counts when the message names the token.
pub fn is_token_invalid(err: &GoogleApiError) -> bool {
    match err.error_code().as_deref() {
        Some("UNREGISTERED") => true,
        Some("INVALID_ARGUMENT") => match err {
            GoogleApiError::Api { message, .. } => {
                message.to_ascii_lowercase().contains("registration token")
            }
            _ => false,
        },
        _ => false,
    }
}

/// First 20 characters of a registration token, for logs.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(20).collect();
    format!("{prefix}...")
}

/// FCM data values must be strings.
fn stringify(data: &Map<String, Value>, now: DateTime<Utc>) -> Map<String, Value> {
    let mut out: Map<String, Value> = data
        .iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), Value::String(s))
        })
        .collect();
    out.insert(
        "timestamp".into(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    out
}

pub fn data_message(token: &str, data: &Map<String, Value>, ttl: &str, now: DateTime<Utc>) -> Value {
    let data = stringify(data, now);
    json!({
        "message": {
            "token": token,
            "data": data,
            "android": {
                "priority": "high",
                "ttl": ttl,
            },
            "apns": {
                "headers": { "apns-priority": "10" },
                "payload": { "aps": { "content-available": 1 } }
            }
        }
    })
}

pub fn notification_message(
    token: &str,
    title: &str,
    body: &str,
    data: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Value {
    let data = stringify(data, now);
    json!({
        "message": {
            "token": token,
            "notification": { "title": title, "body": body },
            "data": data,
            "android": {
                "priority": "high",
                "ttl": DEFAULT_TTL,
                "notification": { "sound": "default" }
            },
            "apns": {
                "payload": { "aps": { "sound": "default", "badge": 1 } }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::{fake, StaticTokenSource};
    use crate::model::device::NewDevice;
    use axum::http::StatusCode;

    fn device() -> DeviceRecord {
        DeviceRecord::from_registration(
            "id-1".into(),
            NewDevice {
                imei: Some("356938035643809".into()),
                model: Some("Pixel 8".into()),
                ..NewDevice::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn data_values_are_strings_with_timestamp() {
        let mut data = Map::new();
        data.insert("count".into(), json!(3));
        data.insert("flag".into(), json!(true));
        data.insert("nested".into(), json!({"a": 1}));

        let msg = data_message("tok", &data, "300s", Utc::now());
        let sent = &msg["message"]["data"];
        assert_eq!(sent["count"], "3");
        assert_eq!(sent["flag"], "true");
        assert_eq!(sent["nested"], r#"{"a":1}"#);
        assert!(sent["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(msg["message"]["android"]["ttl"], "300s");
        assert_eq!(msg["message"]["android"]["priority"], "high");
        assert_eq!(msg["message"]["apns"]["payload"]["aps"]["content-available"], 1);
    }

    #[test]
    fn command_payload_cannot_be_overridden() {
        let mut extra = Map::new();
        extra.insert("command".into(), json!("WIPE_DEVICE"));
        extra.insert("reason".into(), json!("audit"));

        let payload = MdmCommand::LockDevice.payload(&device(), Some(&extra));
        assert_eq!(payload["command"], "LOCK_DEVICE");
        assert_eq!(payload["action"], "lock");
        assert_eq!(payload["reason"], "audit");
        assert_eq!(payload["device_imei"], "356938035643809");
        assert_eq!(payload["device_android_id"], "");

        let custom = MdmCommand::Custom("show_message".into());
        assert_eq!(custom.command(), "SHOW_MESSAGE");
        assert_eq!(custom.action(), "show_message");
        assert_eq!(MdmCommand::Test.ttl(), TEST_TTL);
    }

    #[test]
    fn redact_keeps_twenty_chars() {
        assert_eq!(redact("abcdefghijklmnopqrstuvwxyz"), "abcdefghijklmnopqrst...");
    }

    #[tokio::test]
    async fn send_posts_to_project_endpoint() {
        let upstream = fake::spawn(|_| {
            (
                StatusCode::OK,
                json!({ "name": "projects/mdm-project/messages/0:1234" }),
            )
        })
        .await;
        let client = FcmClient::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenSource("fcm-token".into())),
            &upstream.base_url,
            "mdm-project",
        );

        let receipt = client
            .send_data_message("device-token", &Map::new(), DEFAULT_TTL)
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "projects/mdm-project/messages/0:1234");

        let call = upstream.last();
        assert_eq!(call.path, "/projects/mdm-project/messages:send");
        assert_eq!(call.body["message"]["token"], "device-token");
    }

    #[tokio::test]
    async fn unregistered_token_is_flagged() {
        let upstream = fake::spawn(|_| {
            (
                StatusCode::NOT_FOUND,
                json!({
                    "error": {
                        "code": 404,
                        "message": "Requested entity was not found.",
                        "status": "NOT_FOUND",
                        "details": [{ "errorCode": "UNREGISTERED" }]
                    }
                }),
            )
        })
        .await;
        let client = FcmClient::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenSource("fcm-token".into())),
            &upstream.base_url,
            "mdm-project",
        );

        let err = client
            .send_notification("stale", "Hi", "There", &Map::new())
            .await
            .unwrap_err();
        assert!(is_token_invalid(&err));
        assert_eq!(err.to_string(), "Requested entity was not found.");
    }

    fn invalid_argument(message: &str) -> GoogleApiError {
        GoogleApiError::Api {
            status: 400,
            message: message.into(),
            body: Some(json!({
                "error": { "code": 400, "message": message, "status": "INVALID_ARGUMENT" }
            })),
        }
    }

    #[test]
    fn only_token_errors_flag_the_token() {
        assert!(is_token_invalid(&invalid_argument(
            "The registration token is not a valid FCM registration token"
        )));
        assert!(!is_token_invalid(&invalid_argument(
            "Invalid data payload key: from"
        )));
    }
}
