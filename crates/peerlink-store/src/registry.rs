//! Async [`DeviceRegistry`] adapter over [`DeviceRepo`].

use async_trait::async_trait;
use tokio::task;

use peerlink_core::{Device, DeviceId, DeviceRegistry, RegistryError};

use crate::database::Database;
use crate::devices::DeviceRepo;
use crate::error::StoreError;

/// Device registry backed by the `SQLite` store.
///
/// Each call runs on the blocking pool so the connection mutex is never held
/// on an async worker.
#[derive(Clone)]
pub struct SqliteDeviceRegistry {
    devices: DeviceRepo,
}

impl SqliteDeviceRegistry {
    /// Wrap a database.
    pub fn new(db: Database) -> Self {
        Self {
            devices: DeviceRepo::new(db),
        }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(DeviceRepo) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.devices.clone();
        task::spawn_blocking(move || f(repo))
            .await
            .map_err(|e| RegistryError::Task(e.to_string()))?
            .map_err(|e| RegistryError::Backend(e.to_string()))
    }
}

#[async_trait]
impl DeviceRegistry for SqliteDeviceRegistry {
    async fn resolve_by_token(&self, token: &str) -> Result<Option<Device>, RegistryError> {
        let token = token.to_owned();
        self.blocking(move |repo| repo.get_by_token(&token)).await
    }

    async fn resolve_by_id(&self, id: DeviceId) -> Result<Option<Device>, RegistryError> {
        self.blocking(move |repo| repo.get(id)).await
    }

    async fn touch_last_seen(&self, id: DeviceId) -> Result<(), RegistryError> {
        let _ = self.blocking(move |repo| repo.touch_last_seen(id)).await?;
        Ok(())
    }
}
