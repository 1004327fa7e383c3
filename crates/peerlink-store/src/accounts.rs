use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use tracing::instrument;

use peerlink_core::AccountId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::row_helpers::{parse_col, parse_time};

/// An account that owns devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,
    /// Unique contact address.
    pub email: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "SELECT id, email, created_at, updated_at FROM accounts";

type RawAccount = (String, String, String, String);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawAccount> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode((id, email, created_at, updated_at): RawAccount) -> Result<Account> {
    Ok(Account {
        id: parse_col("id", &id)?,
        email,
        created_at: parse_time("created_at", &created_at)?,
        updated_at: parse_time("updated_at", &updated_at)?,
    })
}

/// CRUD over the `accounts` table.
#[derive(Clone)]
pub struct AccountRepo {
    db: Database,
}

impl AccountRepo {
    /// Create a repo over a shared database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an account. A duplicate email yields [`StoreError::Conflict`].
    #[instrument(skip(self))]
    pub fn create(&self, email: &str) -> Result<Account> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::Invalid(format!("invalid email '{email}'")));
        }

        let now = Utc::now();
        let account = Account {
            id: AccountId::new(),
            email: email.to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO accounts (id, email, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    account.id.to_string(),
                    account.email,
                    now.to_rfc3339(),
                    now.to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(account)
    }

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = %id))]
    pub fn get(&self, id: AccountId) -> Result<Option<Account>> {
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

    /// Get an account by email.
    #[instrument(skip(self))]
    pub fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE email = ?1"),
                [email.trim()],
                read_raw,
            )
            .optional()?
            .map(decode)
            .transpose()
        })
    }

    /// List all accounts, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Account>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at, id"))?;
            let raws = stmt
                .query_map([], read_raw)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raws.into_iter().map(decode).collect()
        })
    }

    /// Delete an account and, by cascade, its devices. Returns whether a
    /// row was removed.
    #[instrument(skip(self), fields(account_id = %id))]
    pub fn delete(&self, id: AccountId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM accounts WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }
}
