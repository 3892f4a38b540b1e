use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::{AppConfig, RegistryBackend},
    fcm::{FcmClient, FcmCommandService},
    google::{
        auth::{SCOPE_ANDROID_MANAGEMENT, SCOPE_DATASTORE, SCOPE_FIREBASE_MESSAGING},
        AccessTokenSource, AndroidManagementClient, ServiceAccountKey, ServiceAccountTokenSource,
        StaticTokenSource,
    },
    registry::{open_store, DeviceRegistry, StoreBackend},
};

/// Shared handles for every request handler. Upstream clients are `None`
/// when their credentials could not be loaded; those routes answer 503.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<DeviceRegistry>,
    pub amapi: Option<Arc<AndroidManagementClient>>,
    pub fcm: Option<Arc<FcmCommandService>>,
}

/// Service-account credentials for the Android Management API (key file)
/// and for Firebase (FIREBASE_* vars, falling back to the key file).
struct Credentials {
    amapi_key: Option<ServiceAccountKey>,
    firebase_key: Option<ServiceAccountKey>,
}

impl Credentials {
    fn load(config: &AppConfig) -> Self {
        let amapi_key = Self::amapi_key(config);
        let firebase_key = ServiceAccountKey::from_firebase_env().or_else(|| amapi_key.clone());
        Self {
            amapi_key,
            firebase_key,
        }
    }

    fn amapi_key(config: &AppConfig) -> Option<ServiceAccountKey> {
        match ServiceAccountKey::from_file(&config.credentials_path) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "service account key unavailable");
                None
            }
        }
    }

    fn token_source(
        config: &AppConfig,
        key: Option<&ServiceAccountKey>,
        scope: &str,
        http: &reqwest::Client,
    ) -> Option<Arc<dyn AccessTokenSource>> {
        if let Some(token) = &config.static_access_token {
            return Some(Arc::new(StaticTokenSource(token.clone())));
        }
        key.map(|key| {
            Arc::new(ServiceAccountTokenSource::new(key.clone(), scope, http.clone()))
                as Arc<dyn AccessTokenSource>
        })
    }
}

impl AppState {
    pub fn http_client(config: &AppConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("failed to build HTTP client")
    }

    /// The Android Management client on its own, without opening the
    /// device store. `None` when no credentials are available.
    pub fn amapi_client(
        config: &AppConfig,
        http: &reqwest::Client,
    ) -> Option<Arc<AndroidManagementClient>> {
        let key = if config.static_access_token.is_some() {
            None
        } else {
            Credentials::amapi_key(config)
        };
        Self::amapi_with_key(config, key.as_ref(), http)
    }

    fn amapi_with_key(
        config: &AppConfig,
        key: Option<&ServiceAccountKey>,
        http: &reqwest::Client,
    ) -> Option<Arc<AndroidManagementClient>> {
        let amapi = Credentials::token_source(config, key, SCOPE_ANDROID_MANAGEMENT, http).map(
            |tokens| {
                Arc::new(AndroidManagementClient::new(
                    http.clone(),
                    tokens,
                    &config.amapi_base_url,
                    &config.enterprise_id,
                ))
            },
        );
        match &amapi {
            Some(client) => info!(enterprise = client.enterprise_name(), "android management client ready"),
            None => warn!("android management client not configured"),
        }
        amapi
    }

    pub async fn build(config: AppConfig) -> Result<Self> {
        let http = Self::http_client(&config)?;
        let credentials = Credentials::load(&config);
        let firebase_project = credentials
            .firebase_key
            .as_ref()
            .and_then(|k| k.project_id.clone());

        // -----------------------------
        // Device registry
        // -----------------------------
        let backend = match config.registry_backend {
            RegistryBackend::Memory => StoreBackend::Memory,
            RegistryBackend::RocksDb => StoreBackend::Rocks {
                path: config.registry_path.clone(),
            },
            RegistryBackend::Firestore => {
                let tokens = Credentials::token_source(
                    &config,
                    credentials.firebase_key.as_ref(),
                    SCOPE_DATASTORE,
                    &http,
                )
                .context("firestore backend needs Firebase credentials")?;
                StoreBackend::Firestore {
                    http: http.clone(),
                    tokens,
                    base_url: config.firestore_base_url.clone(),
                    project_id: firebase_project
                        .clone()
                        .context("firestore backend needs FIREBASE_PROJECT_ID")?,
                }
            }
            #[cfg(feature = "mongo")]
            RegistryBackend::MongoDb => StoreBackend::Mongo {
                uri: config
                    .mongodb_uri
                    .clone()
                    .context("MONGODB_URI is required for the mongodb backend")?,
                database: config.mongodb_database.clone(),
            },
            #[cfg(not(feature = "mongo"))]
            RegistryBackend::MongoDb => {
                anyhow::bail!("the mongodb backend needs a build with the `mongo` feature")
            }
        };
        let store = open_store(backend).await?;
        let registry = Arc::new(DeviceRegistry::new(store, config.duplicate_policy));

        // -----------------------------
        // Upstream clients
        // -----------------------------
        let amapi = Self::amapi_with_key(&config, credentials.amapi_key.as_ref(), &http);

        let fcm = Credentials::token_source(
            &config,
            credentials.firebase_key.as_ref(),
            SCOPE_FIREBASE_MESSAGING,
            &http,
        )
        .zip(firebase_project)
        .map(|(tokens, project_id)| {
            let client = Arc::new(FcmClient::new(
                http.clone(),
                tokens,
                &config.fcm_base_url,
                &project_id,
            ));
            Arc::new(FcmCommandService::new(registry.clone(), client))
        });
        if fcm.is_none() {
            warn!("fcm client not configured");
        }

        Ok(Self {
            config: Arc::new(config),
            registry,
            amapi,
            fcm,
        })
    }
}
