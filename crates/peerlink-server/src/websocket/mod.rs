//! WebSocket sessions: shared handle, frame handling and the read/write loops.

pub mod connection;
pub mod handler;
pub mod session;
