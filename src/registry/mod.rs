pub mod error;
pub mod firestore;
pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod rocks;
pub mod store;

use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Arc, Mutex as StdMutex},
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    google::AccessTokenSource,
    model::device::{DeviceRecord, DeviceStatus, DeviceStatusView, DeviceUpdate, NewDevice},
};

pub use error::RegistryError;
pub use store::DeviceStore;

/// What `register_device` does when a record already carries one of the
/// submitted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Merge,
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(DuplicatePolicy::Merge),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(format!("invalid duplicate policy '{other}', expected merge or reject")),
        }
    }
}

/// Backend selection plus whatever that backend needs to connect.
pub enum StoreBackend {
    Memory,
    Rocks {
        path: String,
    },
    Firestore {
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenSource>,
        base_url: String,
        project_id: String,
    },
    #[cfg(feature = "mongo")]
    Mongo {
        uri: String,
        database: String,
    },
}

pub async fn open_store(backend: StoreBackend) -> Result<Arc<dyn DeviceStore>, RegistryError> {
    let store: Arc<dyn DeviceStore> = match backend {
        StoreBackend::Memory => Arc::new(memory::MemoryStore::new()),
        StoreBackend::Rocks { path } => Arc::new(rocks::RocksStore::open(&path)?),
        StoreBackend::Firestore {
            http,
            tokens,
            base_url,
            project_id,
        } => Arc::new(firestore::FirestoreStore::new(
            http,
            tokens,
            &base_url,
            &project_id,
        )),
        #[cfg(feature = "mongo")]
        StoreBackend::Mongo { uri, database } => {
            Arc::new(mongo::MongoStore::connect(&uri, &database).await?)
        }
    };

    info!(backend = store.backend_name(), "device store ready");
    Ok(store)
}

/// Result of a registration: the stored record and whether it is new.
#[derive(Debug, Clone)]
pub struct Registration {
    pub record: DeviceRecord,
    pub created: bool,
}

/// Per-record async locks so read-modify-write on one device is serialized.
#[derive(Default)]
struct RecordLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    const PRUNE_THRESHOLD: usize = 1024;

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if locks.len() > Self::PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(id.to_string()).or_default().clone()
    }

    fn forget(&self, id: &str) {
        let mut locks = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        locks.remove(id);
    }
}

/// Device identity reconciliation and state transitions over any
/// [`DeviceStore`].
///
/// A device is addressed by either of its identifiers (IMEI is tried
/// first, then Android ID). Every mutation refreshes `lastSeen` and
/// `updatedAt`, and leaves `isLocked` in agreement with `status`.
pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    policy: DuplicatePolicy,
    registration: Mutex<()>,
    locks: RecordLocks,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn DeviceStore>, policy: DuplicatePolicy) -> Self {
        Self {
            store,
            policy,
            registration: Mutex::new(()),
            locks: RecordLocks::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    // ============================================================
    // REGISTRATION
    // ============================================================

    pub async fn register_device(&self, data: NewDevice) -> Result<Registration, RegistryError> {
        let data = data.normalized();
        if !data.has_identifier() {
            return Err(RegistryError::MissingIdentifier);
        }

        // Dedup check and insert must not interleave with another registration.
        let _registering = self.registration.lock().await;

        let by_imei = match data.imei.as_deref() {
            Some(imei) => self.store.find_by_imei(imei).await?,
            None => None,
        };
        let by_android = match data.android_id.as_deref() {
            Some(android_id) => self.store.find_by_android_id(android_id).await?,
            None => None,
        };

        let existing = match (by_imei, by_android) {
            (Some(a), Some(b)) if a.id != b.id => {
                return Err(RegistryError::IdentifierConflict {
                    imei: data.imei.unwrap_or_default(),
                    android_id: data.android_id.unwrap_or_default(),
                });
            }
            (Some(a), _) => Some(a),
            (None, b) => b,
        };

        match existing {
            Some(found) if self.policy == DuplicatePolicy::Reject => {
                warn!(device = found.label(), "duplicate registration rejected");
                Err(RegistryError::DuplicateDevice(Box::new(found)))
            }
            Some(found) => {
                let record = self
                    .mutate(&found.id, |record, _| record.merge_registration(data))
                    .await?;
                info!(device = record.label(), id = %record.id, "device registration merged");
                Ok(Registration {
                    record,
                    created: false,
                })
            }
            None => {
                let record =
                    DeviceRecord::from_registration(Uuid::new_v4().to_string(), data, Utc::now());
                self.store.put(&record).await?;
                info!(device = record.label(), id = %record.id, "device registered");
                Ok(Registration {
                    record,
                    created: true,
                })
            }
        }
    }

    // ============================================================
    // LOOKUP
    // ============================================================

    pub async fn get_device(&self, identifier: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(None);
        }
        if let Some(found) = self.store.find_by_imei(identifier).await? {
            return Ok(Some(found));
        }
        self.store.find_by_android_id(identifier).await
    }

    pub async fn device_status_by_imei(
        &self,
        imei: &str,
    ) -> Result<Option<DeviceStatusView>, RegistryError> {
        Ok(self
            .store
            .find_by_imei(imei.trim())
            .await?
            .map(DeviceStatusView::from))
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        self.store.list().await
    }

    pub async fn list_devices_by_status(
        &self,
        status: DeviceStatus,
    ) -> Result<Vec<DeviceRecord>, RegistryError> {
        self.store.list_by_status(status).await
    }

    // ============================================================
    // STATE TRANSITIONS
    // ============================================================

    pub async fn lock_device(&self, identifier: &str) -> Result<DeviceRecord, RegistryError> {
        let id = self.resolve_id(identifier).await?;
        let record = self
            .mutate(&id, |record, now| {
                if !record.is_locked {
                    record.last_lock_time = Some(now);
                }
                record.is_locked = true;
                record.status = DeviceStatus::Locked;
            })
            .await?;
        info!(device = record.label(), "device locked");
        Ok(record)
    }

    pub async fn unlock_device(&self, identifier: &str) -> Result<DeviceRecord, RegistryError> {
        let id = self.resolve_id(identifier).await?;
        let record = self
            .mutate(&id, |record, now| {
                if record.is_locked {
                    record.last_unlock_time = Some(now);
                }
                record.is_locked = false;
                record.status = DeviceStatus::Active;
            })
            .await?;
        info!(device = record.label(), "device unlocked");
        Ok(record)
    }

    pub async fn update_device_status(
        &self,
        identifier: &str,
        update: DeviceUpdate,
    ) -> Result<DeviceRecord, RegistryError> {
        let id = self.resolve_id(identifier).await?;
        self.mutate(&id, |record, _| record.apply_update(update))
            .await
    }

    pub async fn update_fcm_token(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<DeviceRecord, RegistryError> {
        let record = self
            .update_device_status(identifier, DeviceUpdate::fcm_token(token.trim()))
            .await?;
        info!(device = record.label(), "fcm token updated");
        Ok(record)
    }

    pub async fn delete_device(&self, identifier: &str) -> Result<DeviceRecord, RegistryError> {
        let id = self.resolve_id(identifier).await?;
        let lock = self.locks.lock_for(&id);
        let guard = lock.lock().await;

        let record = self
            .store
            .get(&id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))?;
        self.store.delete(&id).await?;

        drop(guard);
        self.locks.forget(&id);
        info!(device = record.label(), id = %id, "device deleted");
        Ok(record)
    }

    // ============================================================
    // INTERNALS
    // ============================================================

    async fn resolve_id(&self, identifier: &str) -> Result<String, RegistryError> {
        self.get_device(identifier)
            .await?
            .map(|record| record.id)
            .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))
    }

    /// Re-read the record under its lock, apply `change`, stamp it and
    /// write it back.
    async fn mutate<F>(&self, id: &str, change: F) -> Result<DeviceRecord, RegistryError>
    where
        F: FnOnce(&mut DeviceRecord, DateTime<Utc>) + Send,
    {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let now = Utc::now();
        change(&mut record, now);
        record.last_seen = now;
        record.updated_at = now;

        self.store.put(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_registry(policy: DuplicatePolicy) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(memory::MemoryStore::new()), policy)
    }

    fn imei(value: &str) -> NewDevice {
        NewDevice {
            imei: Some(value.into()),
            ..NewDevice::default()
        }
    }

    fn android(value: &str) -> NewDevice {
        NewDevice {
            android_id: Some(value.into()),
            ..NewDevice::default()
        }
    }

    #[tokio::test]
    async fn registration_requires_an_identifier() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        let err = registry
            .register_device(NewDevice {
                imei: Some("  ".into()),
                model: Some("Pixel".into()),
                ..NewDevice::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingIdentifier));
    }

    #[tokio::test]
    async fn new_device_starts_unlocked_and_active() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        let reg = registry
            .register_device(imei("356938035643809"))
            .await
            .unwrap();
        assert!(reg.created);
        assert!(!reg.record.is_locked);
        assert_eq!(reg.record.status, DeviceStatus::Active);
        assert_eq!(reg.record.registered_at, reg.record.last_seen);
    }

    #[tokio::test]
    async fn merge_keeps_state_and_fills_fields() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        let first = registry.register_device(imei("111")).await.unwrap();
        registry.lock_device("111").await.unwrap();

        let second = registry
            .register_device(NewDevice {
                imei: Some("111".into()),
                android_id: Some("droid".into()),
                model: Some("Pixel 8".into()),
                custom_data: Some(json!({"site": "hq"})),
                ..NewDevice::default()
            })
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.model.as_deref(), Some("Pixel 8"));
        assert!(second.record.is_locked);
        assert_eq!(second.record.status, DeviceStatus::Locked);
        assert_eq!(second.record.registered_at, first.record.registered_at);

        // Now reachable by the merged android id too.
        let by_android = registry.get_device("droid").await.unwrap().unwrap();
        assert_eq!(by_android.id, first.record.id);
        assert_eq!(registry.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reject_policy_reports_existing_record() {
        let registry = memory_registry(DuplicatePolicy::Reject);
        registry.register_device(android("droid")).await.unwrap();

        match registry.register_device(android("droid")).await {
            Err(RegistryError::DuplicateDevice(existing)) => {
                assert_eq!(existing.android_id.as_deref(), Some("droid"))
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identifiers_of_different_devices_conflict() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        registry.register_device(imei("111")).await.unwrap();
        registry.register_device(android("droid")).await.unwrap();

        let err = registry
            .register_device(NewDevice {
                imei: Some("111".into()),
                android_id: Some("droid".into()),
                ..NewDevice::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::IdentifierConflict { .. }));
    }

    #[tokio::test]
    async fn lookup_prefers_imei_over_android_id() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        // One device whose android id equals another device's imei.
        let by_imei = registry.register_device(imei("shared")).await.unwrap();
        registry.register_device(android("shared")).await.unwrap();

        let found = registry.get_device("shared").await.unwrap().unwrap();
        assert_eq!(found.id, by_imei.record.id);
        assert!(registry.get_device("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_lock_keeps_first_lock_time() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        registry.register_device(imei("111")).await.unwrap();

        let first = registry.lock_device("111").await.unwrap();
        let second = registry.lock_device("111").await.unwrap();
        assert_eq!(first.last_lock_time, second.last_lock_time);
        assert!(second.last_seen >= first.last_seen);
        assert!(second.is_locked);

        let unlocked = registry.unlock_device("111").await.unwrap();
        assert!(!unlocked.is_locked);
        assert_eq!(unlocked.status, DeviceStatus::Active);
        assert!(unlocked.last_unlock_time.is_some());

        let again = registry.unlock_device("111").await.unwrap();
        assert_eq!(again.last_unlock_time, unlocked.last_unlock_time);
    }

    #[tokio::test]
    async fn transitions_on_unknown_device_are_not_found() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        assert!(matches!(
            registry.lock_device("nope").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.update_fcm_token("nope", "tok").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete_device("nope").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_update_refreshes_last_seen_and_syncs_lock() {
        let registry = memory_registry(DuplicatePolicy::Merge);
        let reg = registry.register_device(android("droid")).await.unwrap();

        let updated = registry
            .update_device_status(
                "droid",
                DeviceUpdate {
                    status: Some(DeviceStatus::Locked),
                    os_version: Some("14".into()),
                    ..DeviceUpdate::default()
                },
            )
            .await
            .unwrap();

        assert!(updated.is_locked);
        assert_eq!(updated.os_version.as_deref(), Some("14"));
        assert!(updated.last_seen >= reg.record.last_seen);
        assert_eq!(
            registry
                .list_devices_by_status(DeviceStatus::Locked)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn rocksdb_backend_behaves_like_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(StoreBackend::Rocks {
            path: dir.path().to_string_lossy().into_owned(),
        })
        .await
        .unwrap();
        let registry = DeviceRegistry::new(store, DuplicatePolicy::Merge);
        assert_eq!(registry.backend_name(), "rocksdb");

        registry.register_device(imei("111")).await.unwrap();
        registry
            .register_device(NewDevice {
                imei: Some("111".into()),
                android_id: Some("droid".into()),
                ..NewDevice::default()
            })
            .await
            .unwrap();
        registry.lock_device("droid").await.unwrap();

        let view = registry.device_status_by_imei("111").await.unwrap().unwrap();
        assert!(view.is_locked);
        assert_eq!(view.android_id.as_deref(), Some("droid"));

        registry.delete_device("111").await.unwrap();
        assert!(registry.get_device("droid").await.unwrap().is_none());
        assert!(registry.list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_registrations_collapse_to_one_record() {
        let registry = Arc::new(memory_registry(DuplicatePolicy::Merge));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register_device(imei("race")).await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(registry.list_devices().await.unwrap().len(), 1);
    }

    #[test]
    fn duplicate_policy_parses() {
        assert_eq!("Reject".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert!("ignore".parse::<DuplicatePolicy>().is_err());
    }
}
