use std::str;

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use super::{error::RegistryError, store::DeviceStore};
use crate::model::device::DeviceRecord;

const DEVICE_PREFIX: &str = "device:";

/// Embedded RocksDB store. Records live under `device:{id}`; the identifier
/// indexes map `device_imei:{imei}` and `device_android:{android_id}` to ids.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(path: &str) -> Result<Self, RegistryError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn device_key(id: &str) -> String {
        format!("{DEVICE_PREFIX}{id}")
    }

    fn imei_key(imei: &str) -> String {
        format!("device_imei:{imei}")
    }

    fn android_key(android_id: &str) -> String {
        format!("device_android:{android_id}")
    }

    fn load(&self, id: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        match self.db.get(Self::device_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn lookup_index(&self, key: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        let Some(raw_id) = self.db.get(key)? else {
            return Ok(None);
        };
        let id = str::from_utf8(&raw_id).map_err(|e| RegistryError::Storage(e.to_string()))?;
        self.load(id)
    }
}

#[async_trait]
impl DeviceStore for RocksStore {
    fn backend_name(&self) -> &'static str {
        "rocksdb"
    }

    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        self.load(id)
    }

    async fn find_by_imei(&self, imei: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        self.lookup_index(&Self::imei_key(imei))
    }

    async fn find_by_android_id(
        &self,
        android_id: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError> {
        self.lookup_index(&Self::android_key(android_id))
    }

    async fn put(&self, record: &DeviceRecord) -> Result<(), RegistryError> {
        let mut batch = WriteBatch::default();

        // Drop index entries that no longer point at this record.
        if let Some(previous) = self.load(&record.id)? {
            if let Some(old) = previous.imei.as_deref() {
                if record.imei.as_deref() != Some(old) {
                    batch.delete(Self::imei_key(old));
                }
            }
            if let Some(old) = previous.android_id.as_deref() {
                if record.android_id.as_deref() != Some(old) {
                    batch.delete(Self::android_key(old));
                }
            }
        }

        batch.put(Self::device_key(&record.id), serde_json::to_vec(record)?);
        if let Some(imei) = record.imei.as_deref() {
            batch.put(Self::imei_key(imei), record.id.as_bytes());
        }
        if let Some(android_id) = record.android_id.as_deref() {
            batch.put(Self::android_key(android_id), record.id.as_bytes());
        }

        self.db.write(batch)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let mut results = Vec::new();

        let iter = self.db.iterator(IteratorMode::From(
            DEVICE_PREFIX.as_bytes(),
            Direction::Forward,
        ));

        for item in iter {
            let (key, val) = item?;
            let k = str::from_utf8(&key).map_err(|e| RegistryError::Storage(e.to_string()))?;
            if !k.starts_with(DEVICE_PREFIX) {
                break;
            }
            results.push(serde_json::from_slice::<DeviceRecord>(&val)?);
        }

        results.sort_by_key(|d| d.registered_at);
        Ok(results)
    }

    async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let Some(record) = self.load(id)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        batch.delete(Self::device_key(id));
        if let Some(imei) = record.imei.as_deref() {
            batch.delete(Self::imei_key(imei));
        }
        if let Some(android_id) = record.android_id.as_deref() {
            batch.delete(Self::android_key(android_id));
        }
        self.db.write(batch)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::NewDevice;
    use chrono::Utc;

    fn open_temp() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn index_follows_identifier_changes() {
        let (_dir, store) = open_temp();
        let mut record = DeviceRecord::from_registration(
            "r1".into(),
            NewDevice {
                imei: Some("111".into()),
                ..NewDevice::default()
            },
            Utc::now(),
        );
        store.put(&record).await.unwrap();
        assert!(store.find_by_imei("111").await.unwrap().is_some());

        record.imei = Some("222".into());
        record.android_id = Some("droid".into());
        store.put(&record).await.unwrap();

        assert!(store.find_by_imei("111").await.unwrap().is_none());
        assert_eq!(store.find_by_imei("222").await.unwrap().unwrap().id, "r1");
        assert_eq!(
            store.find_by_android_id("droid").await.unwrap().unwrap().id,
            "r1"
        );
    }

    #[tokio::test]
    async fn delete_clears_indexes() {
        let (_dir, store) = open_temp();
        let record = DeviceRecord::from_registration(
            "r2".into(),
            NewDevice {
                android_id: Some("droid-2".into()),
                ..NewDevice::default()
            },
            Utc::now(),
        );
        store.put(&record).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete("r2").await.unwrap());
        assert!(!store.delete("r2").await.unwrap());
        assert!(store.find_by_android_id("droid-2").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
