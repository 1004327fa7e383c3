//! Connection admission.
//!
//! A connecting device presents `device_id` and `device_token` as query
//! parameters. The token is resolved through the registry and must belong to
//! the claimed device.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use peerlink_core::{AccountId, DeviceId, DeviceRegistry, RegistryError};

/// Query parameters of the signaling upgrade request.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConnectParams {
    /// Claimed device.
    pub device_id: Option<String>,
    /// Bearer secret.
    pub device_token: Option<String>,
}

/// Who an admitted connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated device.
    pub device_id: DeviceId,
    /// Owner of the device.
    pub account_id: AccountId,
}

/// Why a connection was refused. `Display` is the text sent to the client.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// One or both query parameters absent or empty.
    #[error("device_id and device_token are required")]
    MissingCredentials,
    /// `device_id` is not a UUID.
    #[error("invalid device_id")]
    InvalidDeviceId,
    /// No device owns this token.
    #[error("invalid device_token")]
    InvalidToken,
    /// Token belongs to a different device than the one claimed.
    #[error("device_id does not match device_token")]
    IdentityMismatch,
    /// Registry failed; reported to the client as a bad token.
    #[error("invalid device_token")]
    Registry(#[source] RegistryError),
}

impl AdmissionError {
    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidDeviceId => "invalid_device_id",
            Self::InvalidToken => "invalid_token",
            Self::IdentityMismatch => "identity_mismatch",
            Self::Registry(_) => "registry_error",
        }
    }
}

/// Validates connection credentials against the device registry.
#[derive(Clone)]
pub struct Authenticator {
    registry: Arc<dyn DeviceRegistry>,
}

impl Authenticator {
    /// Create an authenticator over `registry`.
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Admit or refuse a connection.
    ///
    /// On success a last-seen update is fired off in the background; its
    /// outcome never affects admission.
    pub async fn authenticate(&self, params: &ConnectParams) -> Result<Identity, AdmissionError> {
        let (Some(raw_id), Some(token)) = (
            non_empty(params.device_id.as_deref()),
            non_empty(params.device_token.as_deref()),
        ) else {
            return Err(AdmissionError::MissingCredentials);
        };

        let claimed = DeviceId::parse(raw_id).map_err(|_| AdmissionError::InvalidDeviceId)?;

        let device = match self.registry.resolve_by_token(token).await {
            Ok(Some(device)) => device,
            Ok(None) => return Err(AdmissionError::InvalidToken),
            Err(e) => {
                error!(device_id = %claimed, error = %e, "device lookup failed during admission");
                return Err(AdmissionError::Registry(e));
            }
        };

        if device.id != claimed {
            return Err(AdmissionError::IdentityMismatch);
        }

        let registry = Arc::clone(&self.registry);
        let device_id = device.id;
        let _ = tokio::spawn(async move {
            if let Err(e) = registry.touch_last_seen(device_id).await {
                warn!(%device_id, error = %e, "failed to update last_seen_at");
            }
        });

        debug!(device_id = %device.id, account_id = %device.account_id, "device authenticated");
        Ok(Identity {
            device_id: device.id,
            account_id: device.account_id,
        })
    }
}

/// Credentials are taken exactly as sent; only an empty value counts as absent.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
