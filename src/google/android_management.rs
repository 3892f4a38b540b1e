use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{auth::AccessTokenSource, error::GoogleApiError};
use crate::model::{
    amapi::{Device, EnrollmentToken, Enterprise, Policy},
    command::{is_valid_duration, Command, CommandOperation, LostModeContact, DEFAULT_LOCK_DURATION},
};

pub const AMAPI_BASE_URL: &str = "https://androidmanagement.googleapis.com/v1";
pub const DEFAULT_POLICY_ID: &str = "policy1";
pub const DEFAULT_ENROLLMENT_DURATION: &str = "3600s";
const PAGE_SIZE: &str = "100";

static DEVICE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^enterprises/[^/]+/devices/[^/]+$").expect("valid device name regex"));
static POLICY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^enterprises/[^/]+/policies/[^/]+$").expect("valid policy name regex"));
static OPERATION_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^enterprises/[^/]+/devices/[^/]+/operations/[^/]+$")
        .expect("valid operation name regex")
});

/// Thin client over the Android Management API v1 for a single enterprise.
pub struct AndroidManagementClient {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    base_url: String,
    enterprise: String,
}

impl AndroidManagementClient {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenSource>,
        base_url: &str,
        enterprise_id: &str,
    ) -> Self {
        let enterprise = if enterprise_id.starts_with("enterprises/") {
            enterprise_id.to_string()
        } else {
            format!("enterprises/{enterprise_id}")
        };

        Self {
            http,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            enterprise,
        }
    }

    pub fn enterprise_name(&self) -> &str {
        &self.enterprise
    }

    // ============================================================
    // NAMES
    // ============================================================

    /// Accepts a full `enterprises/{e}/devices/{d}` name or a bare device id.
    pub fn device_name(&self, name_or_id: &str) -> Result<String, GoogleApiError> {
        self.resource_name(name_or_id, "devices", &DEVICE_NAME_RE)
    }

    pub fn policy_name(&self, name_or_id: &str) -> Result<String, GoogleApiError> {
        self.resource_name(name_or_id, "policies", &POLICY_NAME_RE)
    }

    fn resource_name(
        &self,
        name_or_id: &str,
        collection: &str,
        pattern: &Regex,
    ) -> Result<String, GoogleApiError> {
        let value = name_or_id.trim().trim_matches('/');
        if value.is_empty() {
            return Err(GoogleApiError::InvalidRequest(format!(
                "{collection} name is required"
            )));
        }

        let full = if value.contains('/') {
            value.to_string()
        } else {
            format!("{}/{collection}/{value}", self.enterprise)
        };

        if pattern.is_match(&full) {
            Ok(full)
        } else {
            Err(GoogleApiError::InvalidRequest(format!(
                "invalid {collection} name '{name_or_id}'"
            )))
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GoogleApiError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        if !response.status().is_success() {
            return Err(GoogleApiError::from_response(response).await);
        }

        let text = response.text().await?;
        // Deletes answer with an empty body.
        let text = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(text).map_err(|e| GoogleApiError::Api {
            status: 200,
            message: format!("unexpected response shape: {e}"),
            body: None,
        })
    }

    /// Walk `nextPageToken` until exhausted, collecting `field` from each page.
    async fn list_all<T: DeserializeOwned>(
        &self,
        resource: &str,
        field: &str,
    ) -> Result<Vec<T>, GoogleApiError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.url(resource))
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page)]);
            }

            let mut page: Value = self.send(request).await?;
            if let Some(Value::Array(values)) = page.get_mut(field).map(Value::take) {
                for value in values {
                    items.push(serde_json::from_value(value).map_err(|e| {
                        GoogleApiError::Api {
                            status: 200,
                            message: format!("unexpected {field} entry: {e}"),
                            body: None,
                        }
                    })?);
                }
            }

            match page["nextPageToken"].as_str() {
                Some(next) if !next.is_empty() => page_token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(items)
    }

    // ============================================================
    // DEVICES
    // ============================================================

    pub async fn list_devices(&self) -> Result<Vec<Device>, GoogleApiError> {
        let devices = self
            .list_all(&format!("{}/devices", self.enterprise), "devices")
            .await?;
        debug!(count = devices.len(), "listed enterprise devices");
        Ok(devices)
    }

    pub async fn get_device(&self, name_or_id: &str) -> Result<Device, GoogleApiError> {
        let name = self.device_name(name_or_id)?;
        self.send(self.http.get(self.url(&name))).await
    }

    pub async fn issue_command(
        &self,
        name_or_id: &str,
        command: &Command,
    ) -> Result<CommandOperation, GoogleApiError> {
        let name = self.device_name(name_or_id)?;
        command.validate().map_err(GoogleApiError::InvalidRequest)?;

        let request = self
            .http
            .post(self.url(&format!("{name}:issueCommand")))
            .json(&command.to_request_body());
        let operation: CommandOperation = self.send(request).await?;

        info!(device = %name, command = command.kind(), operation = %operation.name, "command issued");
        Ok(operation)
    }

    pub async fn lock_device(
        &self,
        name_or_id: &str,
        duration: Option<&str>,
    ) -> Result<CommandOperation, GoogleApiError> {
        let duration = duration
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_LOCK_DURATION);
        self.issue_command(
            name_or_id,
            &Command::Lock {
                duration: Some(duration.to_string()),
            },
        )
        .await
    }

    /// There is no UNLOCK command; a reboot clears the lock screen.
    pub async fn unlock_device(&self, name_or_id: &str) -> Result<CommandOperation, GoogleApiError> {
        self.issue_command(name_or_id, &Command::Reboot).await
    }

    pub async fn reboot_device(&self, name_or_id: &str) -> Result<CommandOperation, GoogleApiError> {
        self.issue_command(name_or_id, &Command::Reboot).await
    }

    pub async fn reset_password(&self, name_or_id: &str) -> Result<CommandOperation, GoogleApiError> {
        self.issue_command(name_or_id, &Command::ResetPassword).await
    }

    pub async fn enable_lost_mode(
        &self,
        name_or_id: &str,
        contact: &LostModeContact,
    ) -> Result<CommandOperation, GoogleApiError> {
        if contact.is_empty() {
            return Err(GoogleApiError::InvalidRequest(
                "at least one of lostMessage, phoneNumber, emailAddress, streetAddress or organizationName is required".into(),
            ));
        }
        self.issue_command(
            name_or_id,
            &Command::StartLostMode {
                start_lost_mode_params: contact.to_params(),
            },
        )
        .await
    }

    pub async fn disable_lost_mode(
        &self,
        name_or_id: &str,
    ) -> Result<CommandOperation, GoogleApiError> {
        self.issue_command(name_or_id, &Command::StopLostMode).await
    }

    pub async fn clear_app_data(
        &self,
        name_or_id: &str,
        package_name: &str,
    ) -> Result<CommandOperation, GoogleApiError> {
        self.issue_command(
            name_or_id,
            &Command::ClearAppData {
                package_name: package_name.trim().to_string(),
            },
        )
        .await
    }

    /// Factory-resets the device by deleting it from the enterprise.
    pub async fn wipe_device(
        &self,
        name_or_id: &str,
        reason: Option<&str>,
    ) -> Result<String, GoogleApiError> {
        let name = self.device_name(name_or_id)?;

        let mut request = self
            .http
            .delete(self.url(&name))
            .query(&[("wipeDataFlags", "WIPE_EXTERNAL_STORAGE")]);
        if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
            request = request.query(&[("wipeReasonMessage", reason)]);
        }

        let _: Value = self.send(request).await?;
        info!(device = %name, "device wipe requested");
        Ok(name)
    }

    pub async fn get_operation(&self, name: &str) -> Result<CommandOperation, GoogleApiError> {
        let name = name.trim().trim_matches('/');
        if !OPERATION_NAME_RE.is_match(name) {
            return Err(GoogleApiError::InvalidRequest(format!(
                "invalid operation name '{name}'"
            )));
        }
        self.send(self.http.get(self.url(name))).await
    }

    // ============================================================
    // ENTERPRISE & POLICIES
    // ============================================================

    pub async fn get_enterprise(&self) -> Result<Enterprise, GoogleApiError> {
        self.send(self.http.get(self.url(&self.enterprise))).await
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>, GoogleApiError> {
        self.list_all(&format!("{}/policies", self.enterprise), "policies")
            .await
    }

    pub async fn get_policy(&self, name_or_id: &str) -> Result<Policy, GoogleApiError> {
        let name = self.policy_name(name_or_id)?;
        self.send(self.http.get(self.url(&name))).await
    }

    /// `policies.patch` creates the policy when it does not exist yet.
    pub async fn upsert_policy(
        &self,
        name_or_id: &str,
        mut policy: Value,
    ) -> Result<Policy, GoogleApiError> {
        let name = self.policy_name(name_or_id)?;
        if !policy.is_object() {
            return Err(GoogleApiError::InvalidRequest(
                "policy body must be a JSON object".into(),
            ));
        }
        // The resource name comes from the URL.
        if let Some(map) = policy.as_object_mut() {
            map.remove("name");
        }

        let saved: Policy = self
            .send(self.http.patch(self.url(&name)).json(&policy))
            .await?;
        info!(policy = %name, version = ?saved.version, "policy saved");
        Ok(saved)
    }

    pub async fn create_enrollment_token(
        &self,
        policy: Option<&str>,
        duration: Option<&str>,
    ) -> Result<EnrollmentToken, GoogleApiError> {
        let policy_name =
            self.policy_name(policy.map(str::trim).filter(|p| !p.is_empty()).unwrap_or(DEFAULT_POLICY_ID))?;
        let duration = duration
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_ENROLLMENT_DURATION);
        if !is_valid_duration(duration) {
            return Err(GoogleApiError::InvalidRequest(format!(
                "invalid duration '{duration}', expected seconds such as \"3600s\""
            )));
        }

        let request = self
            .http
            .post(self.url(&format!("{}/enrollmentTokens", self.enterprise)))
            .json(&json!({ "policyName": policy_name, "duration": duration }));
        let token: EnrollmentToken = self.send(request).await?;

        info!(policy = %policy_name, expires = ?token.expiration_timestamp, "enrollment token created");
        Ok(token)
    }

    pub async fn list_enrollment_tokens(&self) -> Result<Vec<EnrollmentToken>, GoogleApiError> {
        self.list_all(
            &format!("{}/enrollmentTokens", self.enterprise),
            "enrollmentTokens",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::{fake, StaticTokenSource};
    use axum::http::{Method, StatusCode};

    fn client(base_url: &str) -> AndroidManagementClient {
        AndroidManagementClient::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenSource("test-token".into())),
            base_url,
            "LC048psd8h",
        )
    }

    fn operation(call: &fake::Recorded) -> (StatusCode, Value) {
        (
            StatusCode::OK,
            json!({ "name": format!("{}/operations/op-1", call.path.trim_start_matches('/').trim_end_matches(":issueCommand")) }),
        )
    }

    #[test]
    fn device_names_are_validated_and_expanded() {
        let amapi = client("http://unused");
        assert_eq!(
            amapi.device_name("3abc").unwrap(),
            "enterprises/LC048psd8h/devices/3abc"
        );
        assert_eq!(
            amapi.device_name("enterprises/other/devices/9").unwrap(),
            "enterprises/other/devices/9"
        );
        assert!(amapi.device_name("enterprises/x/policies/p").is_err());
        assert!(amapi.device_name("  ").is_err());
        assert_eq!(
            amapi.policy_name("kiosk").unwrap(),
            "enterprises/LC048psd8h/policies/kiosk"
        );
    }

    #[tokio::test]
    async fn lock_defaults_to_two_minutes() {
        let upstream = fake::spawn(operation).await;
        let op = client(&upstream.base_url)
            .lock_device("dev1", None)
            .await
            .unwrap();

        let call = upstream.last();
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.path, "/enterprises/LC048psd8h/devices/dev1:issueCommand");
        assert_eq!(call.bearer.as_deref(), Some("test-token"));
        assert_eq!(call.body, json!({ "type": "LOCK", "duration": "120s" }));
        assert_eq!(op.name, "enterprises/LC048psd8h/devices/dev1/operations/op-1");
    }

    #[tokio::test]
    async fn unlock_and_lost_mode_bodies() {
        let upstream = fake::spawn(operation).await;
        let amapi = client(&upstream.base_url);

        amapi.unlock_device("dev1").await.unwrap();
        assert_eq!(upstream.last().body, json!({ "type": "REBOOT" }));

        amapi
            .enable_lost_mode(
                "dev1",
                &LostModeContact {
                    phone_number: Some("+1 555 0100".into()),
                    ..LostModeContact::default()
                },
            )
            .await
            .unwrap();
        let body = upstream.last().body;
        assert_eq!(body["type"], "START_LOST_MODE");
        assert_eq!(
            body["startLostModeParams"]["lostPhoneNumber"]["defaultMessage"],
            "+1 555 0100"
        );

        amapi.disable_lost_mode("dev1").await.unwrap();
        assert_eq!(upstream.last().body, json!({ "type": "STOP_LOST_MODE" }));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_upstream() {
        let upstream = fake::spawn(operation).await;
        let amapi = client(&upstream.base_url);

        let err = amapi.lock_device("dev1", Some("2 minutes")).await.unwrap_err();
        assert!(matches!(err, GoogleApiError::InvalidRequest(_)));
        let err = amapi
            .enable_lost_mode("dev1", &LostModeContact::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GoogleApiError::InvalidRequest(_)));
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn list_devices_follows_pages() {
        let upstream = fake::spawn(|call| {
            let second_page = call
                .query
                .as_deref()
                .is_some_and(|q| q.contains("pageToken=next"));
            let body = if second_page {
                json!({ "devices": [{ "name": "enterprises/LC048psd8h/devices/b" }] })
            } else {
                json!({
                    "devices": [{ "name": "enterprises/LC048psd8h/devices/a", "state": "ACTIVE" }],
                    "nextPageToken": "next"
                })
            };
            (StatusCode::OK, body)
        })
        .await;

        let devices = client(&upstream.base_url).list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].state.as_deref(), Some("ACTIVE"));
        assert_eq!(upstream.calls().len(), 2);
    }

    #[tokio::test]
    async fn upstream_errors_keep_google_message() {
        let upstream = fake::spawn(|_| {
            (
                StatusCode::NOT_FOUND,
                json!({ "error": { "code": 404, "message": "Resource not found", "status": "NOT_FOUND" } }),
            )
        })
        .await;

        match client(&upstream.base_url).get_device("gone").await {
            Err(GoogleApiError::Api { status, message, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "Resource not found");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wipe_deletes_device_with_reason() {
        let upstream = fake::spawn(|_| (StatusCode::OK, json!({}))).await;
        let name = client(&upstream.base_url)
            .wipe_device("dev1", Some("stolen"))
            .await
            .unwrap();

        let call = upstream.last();
        assert_eq!(name, "enterprises/LC048psd8h/devices/dev1");
        assert_eq!(call.method, Method::DELETE);
        let query = call.query.unwrap();
        assert!(query.contains("wipeDataFlags=WIPE_EXTERNAL_STORAGE"));
        assert!(query.contains("wipeReasonMessage=stolen"));
    }

    #[tokio::test]
    async fn enrollment_token_uses_default_policy() {
        let upstream = fake::spawn(|_| {
            (
                StatusCode::OK,
                json!({ "name": "enterprises/LC048psd8h/enrollmentTokens/t1", "value": "ABCDEF", "expirationTimestamp": "2024-01-01T01:00:00Z" }),
            )
        })
        .await;

        let token = client(&upstream.base_url)
            .create_enrollment_token(None, None)
            .await
            .unwrap();
        assert_eq!(token.value, "ABCDEF");
        assert_eq!(
            upstream.last().body,
            json!({ "policyName": "enterprises/LC048psd8h/policies/policy1", "duration": "3600s" })
        );
    }

    #[tokio::test]
    async fn upsert_policy_patches_without_name() {
        let upstream = fake::spawn(|call| {
            let mut body = call.body.clone();
            body["name"] = json!("enterprises/LC048psd8h/policies/kiosk");
            body["version"] = json!("3");
            (StatusCode::OK, body)
        })
        .await;

        let policy = client(&upstream.base_url)
            .upsert_policy("kiosk", json!({ "name": "ignored", "cameraDisabled": true }))
            .await
            .unwrap();

        let call = upstream.last();
        assert_eq!(call.method, Method::PATCH);
        assert!(call.body.get("name").is_none());
        assert_eq!(policy.version.as_deref(), Some("3"));
        assert_eq!(policy.extra["cameraDisabled"], true);
    }
}
