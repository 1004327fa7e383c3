//! # peerlink-store
//!
//! `SQLite` persistence for accounts and devices.
//!
//! - [`Database`]: a shared connection behind a `parking_lot::Mutex`
//! - [`AccountRepo`] / [`DeviceRepo`]: synchronous CRUD
//! - [`SqliteDeviceRegistry`]: the async `DeviceRegistry` adapter used by the
//!   signaling server

#![deny(unsafe_code)]

pub mod accounts;
pub mod database;
pub mod devices;
pub mod error;
pub mod registry;
mod row_helpers;
pub mod schema;

pub use accounts::{Account, AccountRepo};
pub use database::Database;
pub use devices::DeviceRepo;
pub use error::{Result, StoreError};
pub use registry::SqliteDeviceRegistry;
