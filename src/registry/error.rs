use thiserror::Error;

use crate::model::device::DeviceRecord;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("either imei or androidId is required")]
    MissingIdentifier,

    #[error("device already registered: {}", .0.label())]
    DuplicateDevice(Box<DeviceRecord>),

    #[error("imei {imei} and androidId {android_id} belong to different devices")]
    IdentifierConflict { imei: String, android_id: String },

    #[error("device not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

impl From<rocksdb::Error> for RegistryError {
    fn from(err: rocksdb::Error) -> Self {
        RegistryError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Storage(err.to_string())
    }
}

impl From<crate::google::GoogleApiError> for RegistryError {
    fn from(err: crate::google::GoogleApiError) -> Self {
        RegistryError::Storage(err.to_string())
    }
}

#[cfg(feature = "mongo")]
impl From<mongodb::error::Error> for RegistryError {
    fn from(err: mongodb::error::Error) -> Self {
        RegistryError::Storage(err.to_string())
    }
}
