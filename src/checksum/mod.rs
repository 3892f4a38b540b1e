use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_APK_PATHS: [&str; 3] = [
    "./public/downloads/mdm-dpc-app.apk",
    "./downloads/mdm-dpc-app.apk",
    "./mdm-dpc-app.apk",
];

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("APK file not found: {0}")]
    NotFound(String),

    #[error("MDM DPC APK file not found in any of the expected locations")]
    NoApk,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumResult {
    /// Lower-case hex SHA-256 of the APK.
    pub checksum: String,
    /// Same digest as URL-safe base64 without padding, the form Android
    /// provisioning expects.
    pub checksum_base64_url: String,
    pub file_path: String,
    pub file_size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub is_valid: bool,
    pub expected: String,
    pub actual: String,
}

/// Where to look for the DPC APK and what to put in the provisioning payload.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub apk_path: Option<PathBuf>,
    pub download_url: String,
    pub component_name: String,
    pub enrollment_token: Option<String>,
}

impl ProvisioningSettings {
    fn candidates(&self) -> Vec<PathBuf> {
        self.apk_path
            .iter()
            .cloned()
            .chain(DEFAULT_APK_PATHS.iter().map(PathBuf::from))
            .collect()
    }
}

pub async fn calculate_signature_checksum(
    path: impl AsRef<Path>,
) -> Result<ChecksumResult, ChecksumError> {
    let path = path.as_ref();
    let display_path = path.display().to_string();
    let io_err = |source: std::io::Error| ChecksumError::Io {
        path: display_path.clone(),
        source,
    };

    if !tokio::fs::try_exists(path).await.map_err(io_err)? {
        return Err(ChecksumError::NotFound(display_path.clone()));
    }

    let bytes = tokio::fs::read(path).await.map_err(io_err)?;
    let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
    let digest = Sha256::digest(&bytes);

    let result = ChecksumResult {
        checksum: hex(&digest),
        checksum_base64_url: URL_SAFE_NO_PAD.encode(digest),
        file_path: display_path.clone(),
        file_size: meta.len(),
        last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
    };

    info!(path = %display_path, checksum = %result.checksum, "calculated signature checksum");
    Ok(result)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// First existing APK among the configured path and the default locations.
pub async fn find_dpc_apk(settings: &ProvisioningSettings) -> Result<PathBuf, ChecksumError> {
    for candidate in settings.candidates() {
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            info!(path = %candidate.display(), "found MDM DPC APK");
            return Ok(candidate);
        }
    }
    Err(ChecksumError::NoApk)
}

pub async fn dpc_checksum(settings: &ProvisioningSettings) -> Result<ChecksumResult, ChecksumError> {
    let path = find_dpc_apk(settings).await?;
    calculate_signature_checksum(path).await
}

pub fn verify(result: &ChecksumResult, expected: &str) -> Verification {
    let expected = expected.trim();
    Verification {
        is_valid: result.checksum.eq_ignore_ascii_case(expected)
            || result.checksum_base64_url == expected,
        expected: expected.to_string(),
        actual: result.checksum.clone(),
    }
}

pub async fn verify_checksum(
    settings: &ProvisioningSettings,
    expected: &str,
) -> Result<Verification, ChecksumError> {
    let result = dpc_checksum(settings).await?;
    let verification = verify(&result, expected);
    info!(valid = verification.is_valid, "checksum verification");
    Ok(verification)
}

pub fn provisioning_payload(settings: &ProvisioningSettings, result: &ChecksumResult) -> Value {
    let mut payload = json!({
        "android.app.extra.PROVISIONING_DEVICE_ADMIN_COMPONENT_NAME": settings.component_name,
        "android.app.extra.PROVISIONING_DEVICE_ADMIN_PACKAGE_DOWNLOAD_LOCATION": settings.download_url,
        "android.app.extra.PROVISIONING_DEVICE_ADMIN_SIGNATURE_CHECKSUM": result.checksum_base64_url,
        "android.app.extra.PROVISIONING_SKIP_ENCRYPTION": true,
    });
    if let Some(token) = settings.enrollment_token.as_deref().filter(|t| !t.is_empty()) {
        payload["android.app.extra.PROVISIONING_ADMIN_EXTRAS_BUNDLE"] =
            json!({ "com.google.android.apps.work.clouddpc.EXTRA_ENROLLMENT_TOKEN": token });
        payload["android.app.extra.PROVISIONING_ENROLLMENT_TOKEN"] = json!(token);
    }
    payload
}
