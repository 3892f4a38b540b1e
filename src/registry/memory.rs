use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{error::RegistryError, store::DeviceStore};
use crate::model::device::DeviceRecord;

/// Process-local store. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, DeviceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn find_by_imei(&self, imei: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        let devices = self.inner.read().await;
        Ok(devices
            .values()
            .find(|d| d.imei.as_deref() == Some(imei))
            .cloned())
    }

    async fn find_by_android_id(
        &self,
        android_id: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError> {
        let devices = self.inner.read().await;
        Ok(devices
            .values()
            .find(|d| d.android_id.as_deref() == Some(android_id))
            .cloned())
    }

    async fn put(&self, record: &DeviceRecord) -> Result<(), RegistryError> {
        self.inner
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let mut devices: Vec<_> = self.inner.read().await.values().cloned().collect();
        devices.sort_by_key(|d| d.registered_at);
        Ok(devices)
    }

    async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.inner.write().await.remove(id).is_some())
    }
}
