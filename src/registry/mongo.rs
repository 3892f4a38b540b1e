use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{bson::doc, Client, Collection};

use super::{error::RegistryError, store::DeviceStore};
use crate::model::device::{DeviceRecord, DeviceStatus};

const COLLECTION: &str = "devices";

/// MongoDB collection of device documents, upserted by the registry `id`.
pub struct MongoStore {
    devices: Collection<DeviceRecord>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RegistryError> {
        let client = Client::with_uri_str(uri).await?;
        let devices = client.database(database).collection::<DeviceRecord>(COLLECTION);
        Ok(Self { devices })
    }
}

#[async_trait]
impl DeviceStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        Ok(self.devices.find_one(doc! { "id": id }).await?)
    }

    async fn find_by_imei(&self, imei: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        Ok(self.devices.find_one(doc! { "imei": imei }).await?)
    }

    async fn find_by_android_id(
        &self,
        android_id: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError> {
        Ok(self.devices.find_one(doc! { "androidId": android_id }).await?)
    }

    async fn put(&self, record: &DeviceRecord) -> Result<(), RegistryError> {
        self.devices
            .replace_one(doc! { "id": &record.id }, record)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let cursor = self.devices.find(doc! {}).await?;
        let mut devices: Vec<DeviceRecord> = cursor.try_collect().await?;
        devices.sort_by_key(|d| d.registered_at);
        Ok(devices)
    }

    async fn list_by_status(
        &self,
        status: DeviceStatus,
    ) -> Result<Vec<DeviceRecord>, RegistryError> {
        let cursor = self.devices.find(doc! { "status": status.as_str() }).await?;
        let mut devices: Vec<DeviceRecord> = cursor.try_collect().await?;
        devices.sort_by_key(|d| d.registered_at);
        Ok(devices)
    }

    async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let result = self.devices.delete_one(doc! { "id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}
