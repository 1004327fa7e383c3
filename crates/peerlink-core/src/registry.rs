//! The device registry contract consumed by the signaling server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;

use crate::device::Device;
use crate::ids::DeviceId;

/// Failure talking to the registry backend. "Not found" is not an error;
/// lookups return `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The backing store failed.
    #[error("registry backend error: {0}")]
    Backend(String),
    /// The lookup task could not complete (panicked or was cancelled).
    #[error("registry task failed: {0}")]
    Task(String),
}

/// Resolves device identity, ownership and tokens.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Look up the device owning `token`.
    async fn resolve_by_token(&self, token: &str) -> Result<Option<Device>, RegistryError>;

    /// Look up a device by identifier.
    async fn resolve_by_id(&self, id: DeviceId) -> Result<Option<Device>, RegistryError>;

    /// Record that `id` connected just now.
    async fn touch_last_seen(&self, id: DeviceId) -> Result<(), RegistryError>;
}

/// Registry held entirely in memory. Handy for tests and embedding.
#[derive(Default)]
pub struct InMemoryRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device.
    pub fn insert(&self, device: Device) {
        let _ = self.devices.write().insert(device.id, device);
    }

    /// Remove a device, returning it if present.
    pub fn remove(&self, id: DeviceId) -> Option<Device> {
        self.devices.write().remove(&id)
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    async fn resolve_by_token(&self, token: &str) -> Result<Option<Device>, RegistryError> {
        Ok(self
            .devices
            .read()
            .values()
            .find(|d| d.token == token)
            .cloned())
    }

    async fn resolve_by_id(&self, id: DeviceId) -> Result<Option<Device>, RegistryError> {
        Ok(self.devices.read().get(&id).cloned())
    }

    async fn touch_last_seen(&self, id: DeviceId) -> Result<(), RegistryError> {
        if let Some(device) = self.devices.write().get_mut(&id) {
            device.last_seen_at = Some(Utc::now());
        }
        Ok(())
    }
}
