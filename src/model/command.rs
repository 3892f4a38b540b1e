use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_LOCK_DURATION: &str = "120s";
const LOST_MODE_DEFAULT_MESSAGE: &str = "This device has been reported as lost.";

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d{1,9})?s$").expect("valid duration regex"));

/// A device command as accepted from API callers.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Lock {
        #[serde(default)]
        duration: Option<String>,
    },
    Reboot,
    ResetPassword,
    #[serde(rename_all = "camelCase")]
    ClearAppData { package_name: String },
    #[serde(rename_all = "camelCase")]
    StartLostMode {
        start_lost_mode_params: StartLostModeParams,
    },
    StopLostMode,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Lock { .. } => "LOCK",
            Command::Reboot => "REBOOT",
            Command::ResetPassword => "RESET_PASSWORD",
            Command::ClearAppData { .. } => "CLEAR_APP_DATA",
            Command::StartLostMode { .. } => "START_LOST_MODE",
            Command::StopLostMode => "STOP_LOST_MODE",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Lock {
                duration: Some(duration),
            } if !is_valid_duration(duration) => Err(format!(
                "invalid duration '{duration}', expected seconds such as \"120s\""
            )),
            Command::ClearAppData { package_name } if package_name.trim().is_empty() => {
                Err("packageName is required for CLEAR_APP_DATA".into())
            }
            Command::StartLostMode {
                start_lost_mode_params,
            } if start_lost_mode_params.is_empty() => Err(
                "startLostModeParams needs at least one of lostMessage, lostPhoneNumber, lostEmailAddress, lostStreetAddress, lostOrganization"
                    .into(),
            ),
            _ => Ok(()),
        }
    }

    /// Request body for `enterprises.devices.issueCommand`.
    pub fn to_request_body(&self) -> Value {
        match self {
            Command::Lock { duration } => match duration {
                Some(duration) => json!({ "type": "LOCK", "duration": duration }),
                None => json!({ "type": "LOCK" }),
            },
            Command::ClearAppData { package_name } => json!({
                "type": "CLEAR_APP_DATA",
                "clearAppsDataParams": { "packageNames": [package_name] },
            }),
            Command::StartLostMode {
                start_lost_mode_params,
            } => json!({
                "type": "START_LOST_MODE",
                "startLostModeParams": start_lost_mode_params,
            }),
            other => json!({ "type": other.kind() }),
        }
    }
}

pub fn is_valid_duration(duration: &str) -> bool {
    DURATION_RE.is_match(duration)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserFacingMessage {
    pub default_message: String,
}

impl UserFacingMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            default_message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartLostModeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_message: Option<UserFacingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_phone_number: Option<UserFacingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_street_address: Option<UserFacingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_organization: Option<UserFacingMessage>,
}

impl StartLostModeParams {
    pub fn is_empty(&self) -> bool {
        self.lost_message.is_none()
            && self.lost_phone_number.is_none()
            && self.lost_email_address.is_none()
            && self.lost_street_address.is_none()
            && self.lost_organization.is_none()
    }
}

/// Operator-facing lost mode request; at least one field must be present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LostModeContact {
    #[serde(default)]
    pub lost_message: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
}

impl LostModeContact {
    pub fn is_empty(&self) -> bool {
        [
            &self.lost_message,
            &self.phone_number,
            &self.email_address,
            &self.street_address,
            &self.organization_name,
        ]
        .iter()
        .all(|v| v.as_deref().map(str::trim).unwrap_or("").is_empty())
    }

    /// Lock-screen text: the custom message (or a default) followed by the contact details.
    pub fn compose_message(&self) -> String {
        let mut contact = Vec::new();
        if let Some(phone) = present(&self.phone_number) {
            contact.push(format!("Phone: {phone}"));
        }
        if let Some(email) = present(&self.email_address) {
            contact.push(format!("Email: {email}"));
        }
        if let Some(address) = present(&self.street_address) {
            contact.push(format!("Address: {address}"));
        }
        if let Some(org) = present(&self.organization_name) {
            contact.push(format!("Organization: {org}"));
        }

        let mut message = present(&self.lost_message)
            .unwrap_or(LOST_MODE_DEFAULT_MESSAGE)
            .to_string();
        if !contact.is_empty() {
            message.push_str(&format!(" Please contact: {}.", contact.join(", ")));
        }
        message
    }

    pub fn to_params(&self) -> StartLostModeParams {
        StartLostModeParams {
            lost_message: Some(UserFacingMessage::new(self.compose_message())),
            lost_phone_number: present(&self.phone_number).map(UserFacingMessage::new),
            lost_email_address: present(&self.email_address).map(str::to_string),
            lost_street_address: present(&self.street_address).map(UserFacingMessage::new),
            lost_organization: present(&self.organization_name).map(UserFacingMessage::new),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Long-running operation returned by issueCommand / operations.get.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOperation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let cmd: Command = serde_json::from_str(r#"{"type":"LOCK","duration":"300s"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Lock {
                duration: Some("300s".into())
            }
        );

        let cmd: Command =
            serde_json::from_str(r#"{"type":"CLEAR_APP_DATA","packageName":"com.example"}"#)
                .unwrap();
        assert_eq!(cmd.kind(), "CLEAR_APP_DATA");

        assert!(serde_json::from_str::<Command>(r#"{"type":"CLEAR_APP_DATA"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"type":"UNLOCK"}"#).is_err());
    }

    #[test]
    fn clear_app_data_uses_api_shape() {
        let body = Command::ClearAppData {
            package_name: "com.example".into(),
        }
        .to_request_body();
        assert_eq!(body["clearAppsDataParams"]["packageNames"][0], "com.example");
    }

    #[test]
    fn validates_lock_duration() {
        assert!(is_valid_duration("120s"));
        assert!(is_valid_duration("1.5s"));
        assert!(!is_valid_duration("2m"));
        let bad = Command::Lock {
            duration: Some("ten".into()),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn lost_mode_message_includes_contact() {
        let contact = LostModeContact {
            phone_number: Some("+1 555 0100".into()),
            organization_name: Some("Acme".into()),
            ..LostModeContact::default()
        };
        assert_eq!(
            contact.compose_message(),
            "This device has been reported as lost. Please contact: Phone: +1 555 0100, Organization: Acme."
        );

        let params = contact.to_params();
        assert_eq!(
            params.lost_phone_number,
            Some(UserFacingMessage::new("+1 555 0100"))
        );
        assert!(params.lost_email_address.is_none());
    }

    #[test]
    fn empty_lost_mode_contact_is_detected() {
        let contact = LostModeContact {
            lost_message: Some("  ".into()),
            ..LostModeContact::default()
        };
        assert!(contact.is_empty());
    }
}
