//! Device records as seen by the signaling core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, DeviceId};

/// Kind of device. Stored as lowercase text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Desktop client.
    Desktop,
    /// Phone or tablet client.
    Mobile,
}

impl DeviceType {
    /// Wire/storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known [`DeviceType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device_type must be 'desktop' or 'mobile', got '{0}'")]
pub struct UnknownDeviceType(pub String);

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            other => Err(UnknownDeviceType(other.to_owned())),
        }
    }
}

/// A registered device.
///
/// `token` is the bearer secret the device presents when it connects. It is
/// never serialized and is redacted from `Debug` output.
#[derive(Clone, Serialize)]
pub struct Device {
    /// Device identifier.
    pub id: DeviceId,
    /// Owning account.
    pub account_id: AccountId,
    /// Human-readable name.
    pub name: String,
    /// Desktop or mobile.
    pub device_type: DeviceType,
    /// Bearer secret.
    #[serde(skip)]
    pub token: String,
    /// Last successful signaling connection.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("name", &self.name)
            .field("device_type", &self.device_type)
            .field("token", &"<redacted>")
            .field("last_seen_at", &self.last_seen_at)
            .finish_non_exhaustive()
    }
}
