//! # peerlink-core
//!
//! Shared vocabulary for the peerlink signaling service.
//!
//! - **Identifiers**: `DeviceId`, `AccountId` (UUID newtypes) and `SessionId`
//! - **Devices**: the `Device` record and its `DeviceType`
//! - **Registry contract**: the `DeviceRegistry` trait the signaling server
//!   authenticates against, and its `RegistryError`

#![deny(unsafe_code)]

pub mod device;
pub mod ids;
pub mod registry;

pub use device::{Device, DeviceType};
pub use ids::{AccountId, DeviceId, SessionId};
pub use registry::{DeviceRegistry, InMemoryRegistry, RegistryError};
