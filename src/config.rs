use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};

use crate::{
    checksum::ProvisioningSettings,
    fcm::FCM_BASE_URL,
    google::android_management::AMAPI_BASE_URL,
    registry::{firestore::FIRESTORE_BASE_URL, DuplicatePolicy},
};

const PLACEHOLDER_ENTERPRISE: &str = "your_enterprise_id";
const DEFAULT_APK_URL: &str = "https://localhost/public/downloads/mdm-dpc-app.apk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    Memory,
    RocksDb,
    Firestore,
    MongoDb,
}

impl FromStr for RegistryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(RegistryBackend::Memory),
            "rocksdb" | "rocks" => Ok(RegistryBackend::RocksDb),
            "firestore" | "firebase" => Ok(RegistryBackend::Firestore),
            "mongodb" | "mongo" => Ok(RegistryBackend::MongoDb),
            other => Err(format!(
                "invalid registry backend '{other}', expected memory, rocksdb, firestore or mongodb"
            )),
        }
    }
}

/// Process configuration, read once at startup from the environment
/// (and `.env`, when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub enterprise_id: String,
    pub credentials_path: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    pub app_env: String,
    pub http_timeout_secs: u64,

    pub registry_backend: RegistryBackend,
    pub registry_path: String,
    pub duplicate_policy: DuplicatePolicy,
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,

    /// Bearer token used instead of the service account, e.g. from
    /// `gcloud auth print-access-token`.
    pub static_access_token: Option<String>,
    pub amapi_base_url: String,
    pub fcm_base_url: String,
    pub firestore_base_url: String,

    pub provisioning: ProvisioningSettings,
}

fn var(key: &str) -> Option<String> {
    dotenvy::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key}: {e}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = Self {
            enterprise_id: var("ENTERPRISE_ID").unwrap_or_default(),
            credentials_path: var("GOOGLE_APPLICATION_CREDENTIALS")
                .unwrap_or_else(|| "mdm_server_key.json".into())
                .into(),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("PORT")
                .map(|p| p.parse::<u16>())
                .transpose()
                .context("PORT must be a number between 1 and 65535")?
                .unwrap_or(3000),
            app_env: var("APP_ENV")
                .or_else(|| var("NODE_ENV"))
                .unwrap_or_else(|| "development".into()),
            http_timeout_secs: parsed("HTTP_TIMEOUT_SECS", 30)?,

            registry_backend: parsed("REGISTRY_BACKEND", RegistryBackend::Memory)?,
            registry_path: var("REGISTRY_PATH").unwrap_or_else(|| "devicedb".into()),
            duplicate_policy: parsed("REGISTRY_DUPLICATE_POLICY", DuplicatePolicy::Merge)?,
            mongodb_uri: var("MONGODB_URI"),
            mongodb_database: var("MONGODB_DATABASE").unwrap_or_else(|| "mdm_backend".into()),

            static_access_token: var("GOOGLE_OAUTH_ACCESS_TOKEN"),
            amapi_base_url: var("AMAPI_BASE_URL").unwrap_or_else(|| AMAPI_BASE_URL.into()),
            fcm_base_url: var("FCM_BASE_URL").unwrap_or_else(|| FCM_BASE_URL.into()),
            firestore_base_url: var("FIRESTORE_BASE_URL")
                .unwrap_or_else(|| FIRESTORE_BASE_URL.into()),

            provisioning: ProvisioningSettings {
                apk_path: var("APK_PATH").map(PathBuf::from),
                download_url: var("APK_DOWNLOAD_URL").unwrap_or_else(|| DEFAULT_APK_URL.into()),
                component_name: var("DPC_COMPONENT_NAME")
                    .unwrap_or_else(|| "com.mdm.dpc/.DeviceAdminReceiver".into()),
                enrollment_token: var("ENROLLMENT_TOKEN"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enterprise_id.is_empty() || self.enterprise_id == PLACEHOLDER_ENTERPRISE {
            bail!("ENTERPRISE_ID must be set to your Android Management enterprise id");
        }
        if self.port == 0 {
            bail!("PORT must be between 1 and 65535");
        }
        if self.http_timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be greater than zero");
        }
        if self.registry_backend == RegistryBackend::RocksDb && self.registry_path.is_empty() {
            bail!("REGISTRY_PATH is required for the rocksdb backend");
        }
        if self.registry_backend == RegistryBackend::MongoDb {
            if self.mongodb_uri.is_none() {
                bail!("MONGODB_URI is required for the mongodb backend");
            }
            if !cfg!(feature = "mongo") {
                bail!("the mongodb backend needs a build with the `mongo` feature");
            }
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Config for tests and tools that never touch the environment.
    pub fn for_enterprise(enterprise_id: &str) -> Self {
        Self {
            enterprise_id: enterprise_id.to_string(),
            credentials_path: "mdm_server_key.json".into(),
            bind_addr: "127.0.0.1".into(),
            port: 3000,
            app_env: "development".into(),
            http_timeout_secs: 30,
            registry_backend: RegistryBackend::Memory,
            registry_path: "devicedb".into(),
            duplicate_policy: DuplicatePolicy::Merge,
            mongodb_uri: None,
            mongodb_database: "mdm_backend".into(),
            static_access_token: None,
            amapi_base_url: AMAPI_BASE_URL.into(),
            fcm_base_url: FCM_BASE_URL.into(),
            firestore_base_url: FIRESTORE_BASE_URL.into(),
            provisioning: ProvisioningSettings {
                apk_path: None,
                download_url: DEFAULT_APK_URL.into(),
                component_name: "com.mdm.dpc/.DeviceAdminReceiver".into(),
                enrollment_token: None,
            },
        }
    }
}
