use async_trait::async_trait;

use super::error::RegistryError;
use crate::model::device::{DeviceRecord, DeviceStatus};

/// Persistence seam for device records. Implementations only store and find
/// documents; identity reconciliation and state transitions live in
/// [`super::DeviceRegistry`].
#[async_trait]
pub trait DeviceStore: Send + Sync + 'static {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>, RegistryError>;

    async fn find_by_imei(&self, imei: &str) -> Result<Option<DeviceRecord>, RegistryError>;

    async fn find_by_android_id(
        &self,
        android_id: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError>;

    /// Insert or replace the whole document keyed by `record.id`.
    async fn put(&self, record: &DeviceRecord) -> Result<(), RegistryError>;

    async fn list(&self) -> Result<Vec<DeviceRecord>, RegistryError>;

    async fn list_by_status(
        &self,
        status: DeviceStatus,
    ) -> Result<Vec<DeviceRecord>, RegistryError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }

    /// Returns `true` when a document was removed.
    async fn delete(&self, id: &str) -> Result<bool, RegistryError>;
}
