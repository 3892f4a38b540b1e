use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use super::{is_token_invalid, redact, FcmClient, MdmCommand, SendReceipt};
use crate::{
    google::GoogleApiError,
    model::device::DeviceRecord,
    registry::{DeviceRegistry, RegistryError},
};

#[derive(Error, Debug)]
pub enum FcmFlowError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("device {0} does not have an FCM token registered")]
    MissingToken(String),

    #[error("fcm token is required")]
    EmptyToken,

    #[error("failed to send FCM {command} command: {source}")]
    Send {
        command: String,
        token_invalid: bool,
        #[source]
        source: GoogleApiError,
    },
}

/// Outcome of a delivered command: the device as it stands afterwards
/// and the FCM message id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDispatch {
    pub device: DeviceRecord,
    pub fcm_result: SendReceipt,
}

/// Registry-aware command delivery: resolve the device, push the message
/// to its registered token, then record the resulting state.
pub struct FcmCommandService {
    registry: Arc<DeviceRegistry>,
    client: Arc<FcmClient>,
}

impl FcmCommandService {
    pub fn new(registry: Arc<DeviceRegistry>, client: Arc<FcmClient>) -> Self {
        Self { registry, client }
    }

    pub async fn update_token(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<DeviceRecord, FcmFlowError> {
        if token.trim().is_empty() {
            return Err(FcmFlowError::EmptyToken);
        }
        Ok(self.registry.update_fcm_token(identifier, token).await?)
    }

    /// Lock, unlock or wipe. Lock and unlock are only recorded in the
    /// registry once FCM accepted the message.
    pub async fn send_command(
        &self,
        identifier: &str,
        command: MdmCommand,
    ) -> Result<CommandDispatch, FcmFlowError> {
        let (device, token) = self.target(identifier).await?;
        let payload = command.payload(&device, None);
        let receipt = self.deliver(&command, &token, &payload).await?;

        let device = match command {
            MdmCommand::LockDevice => self.registry.lock_device(identifier).await?,
            MdmCommand::UnlockDevice => self.registry.unlock_device(identifier).await?,
            _ => device,
        };

        Ok(CommandDispatch {
            device,
            fcm_result: receipt,
        })
    }

    /// Free-form command. Sent as a notification when both `title` and
    /// `body` are given, as a silent data message otherwise.
    pub async fn send_custom(
        &self,
        identifier: &str,
        command: &str,
        title: Option<&str>,
        body: Option<&str>,
        data: Option<&Map<String, Value>>,
    ) -> Result<CommandDispatch, FcmFlowError> {
        let (device, token) = self.target(identifier).await?;
        let command = MdmCommand::Custom(command.to_string());
        let payload = command.payload(&device, data);

        let receipt = match (title, body) {
            (Some(title), Some(body)) => self
                .client
                .send_notification(&token, title, body, &payload)
                .await
                .map_err(|source| send_error(&command, source))?,
            _ => self.deliver(&command, &token, &payload).await?,
        };

        Ok(CommandDispatch {
            device,
            fcm_result: receipt,
        })
    }

    pub async fn send_test(
        &self,
        identifier: &str,
        data: Option<&Map<String, Value>>,
    ) -> Result<CommandDispatch, FcmFlowError> {
        let (device, token) = self.target(identifier).await?;
        let command = MdmCommand::Test;
        let payload = command.payload(&device, data);
        let receipt = self.deliver(&command, &token, &payload).await?;

        Ok(CommandDispatch {
            device,
            fcm_result: receipt,
        })
    }

    async fn target(&self, identifier: &str) -> Result<(DeviceRecord, String), FcmFlowError> {
        let device = self
            .registry
            .get_device(identifier)
            .await?
            .ok_or_else(|| RegistryError::NotFound(identifier.to_string()))?;

        let token = device
            .fcm_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| FcmFlowError::MissingToken(device.label().to_string()))?;

        Ok((device, token))
    }

    async fn deliver(
        &self,
        command: &MdmCommand,
        token: &str,
        payload: &Map<String, Value>,
    ) -> Result<SendReceipt, FcmFlowError> {
        let receipt = self
            .client
            .send_data_message(token, payload, command.ttl())
            .await
            .map_err(|source| send_error(command, source))?;

        info!(command = %command.command(), token = %redact(token), "fcm command delivered");
        Ok(receipt)
    }
}

fn send_error(command: &MdmCommand, source: GoogleApiError) -> FcmFlowError {
    let token_invalid = is_token_invalid(&source);
    if token_invalid {
        warn!(command = %command.command(), "fcm rejected the registration token");
    }
    FcmFlowError::Send {
        command: command.action(),
        token_invalid,
        source,
    }
}
