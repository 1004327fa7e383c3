use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use rusqlite::{OptionalExtension, Row};
use tracing::{debug, instrument};

use peerlink_core::{AccountId, Device, DeviceId, DeviceType};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::row_helpers::{parse_col, parse_opt_time, parse_time};

/// Longest accepted device name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Random bytes behind each device token.
const TOKEN_BYTES: usize = 32;

const SELECT_COLUMNS: &str = "SELECT id, account_id, name, device_type, device_token, \
     last_seen_at, created_at, updated_at FROM devices";

struct RawDevice {
    id: String,
    account_id: String,
    name: String,
    device_type: String,
    token: String,
    last_seen_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawDevice> {
    Ok(RawDevice {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        device_type: row.get(3)?,
        token: row.get(4)?,
        last_seen_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn decode(raw: RawDevice) -> Result<Device> {
    Ok(Device {
        id: parse_col("id", &raw.id)?,
        account_id: parse_col("account_id", &raw.account_id)?,
        name: raw.name,
        device_type: parse_col("device_type", &raw.device_type)?,
        token: raw.token,
        last_seen_at: parse_opt_time("last_seen_at", raw.last_seen_at.as_deref())?,
        created_at: parse_time("created_at", &raw.created_at)?,
        updated_at: parse_time("updated_at", &raw.updated_at)?,
    })
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Invalid("device name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(StoreError::Invalid(format!(
            "device name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

/// Generate a fresh bearer token: 32 random bytes, url-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// CRUD over the `devices` table.
#[derive(Clone)]
pub struct DeviceRepo {
    db: Database,
}

impl DeviceRepo {
    /// Create a repo over a shared database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new device under `account_id` with a freshly generated token.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn create(
        &self,
        account_id: AccountId,
        name: &str,
        device_type: DeviceType,
    ) -> Result<Device> {
        let name = validate_name(name)?;
        let now = Utc::now();
        let device = Device {
            id: DeviceId::new(),
            account_id,
            name: name.to_owned(),
            device_type,
            token: generate_token(),
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        };

        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO devices (id, account_id, name, device_type, device_token, \
                 last_seen_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
                rusqlite::params![
                    device.id.to_string(),
                    device.account_id.to_string(),
                    device.name,
                    device.device_type.as_str(),
                    device.token,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        debug!(device_id = %device.id, "device registered");
        Ok(device)
    }

    /// Get a device by ID.
    #[instrument(skip(self), fields(device_id = %id))]
    pub fn get(&self, id: DeviceId) -> Result<Option<Device>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id.to_string()],
                read_raw,
            )
            .optional()?
            .map(decode)
            .transpose()
        })
    }

    /// Get the device owning `token`.
    #[instrument(skip_all)]
    pub fn get_by_token(&self, token: &str) -> Result<Option<Device>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE device_token = ?1"),
                [token],
                read_raw,
            )
            .optional()?
            .map(decode)
            .transpose()
        })
    }

    /// List every device belonging to `account_id`, oldest first.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub fn list_for_account(&self, account_id: AccountId) -> Result<Vec<Device>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE account_id = ?1 ORDER BY created_at, id"
            ))?;
            let raws = stmt
                .query_map([account_id.to_string()], read_raw)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raws.into_iter().map(decode).collect()
        })
    }

    /// Persist the mutable fields of `device` (name, type, token) and bump
    /// `updated_at`. Returns the stored row, or `None` if the device is gone.
    #[instrument(skip(self, device), fields(device_id = %device.id))]
    pub fn update(&self, device: &Device) -> Result<Option<Device>> {
        let name = validate_name(&device.name)?;
        let now = Utc::now().to_rfc3339();
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE devices SET name = ?1, device_type = ?2, device_token = ?3, updated_at = ?4 \
                 WHERE id = ?5",
                rusqlite::params![
                    name,
                    device.device_type.as_str(),
                    device.token,
                    now,
                    device.id.to_string(),
                ],
            )?)
        })?;
        if changed == 0 {
            return Ok(None);
        }
        self.get(device.id)
    }

    /// Stamp `last_seen_at` with the current time. Returns whether the
    /// device exists.
    #[instrument(skip(self), fields(device_id = %id))]
    pub fn touch_last_seen(&self, id: DeviceId) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE devices SET last_seen_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    /// Delete a device. Returns whether a row was removed.
    #[instrument(skip(self), fields(device_id = %id))]
    pub fn delete(&self, id: DeviceId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM devices WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }
}
