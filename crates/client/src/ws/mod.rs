//! WebSocket module for real-time job events.
//!
//! This module provides:
//! - A transport abstraction ([`Connector`] / [`TransportLink`]) with a
//!   tokio-tungstenite implementation
//! - The connection manager: authentication, keepalive, subscription and
//!   exponential-backoff reconnects, all driven from one actor task
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   JobSyncClient                     │
//! │       (facade: commands in, snapshots out)          │
//! └─────────────────────────────────────────────────────┘
//!             │ Command                 ▲ ClientSnapshot
//!             ▼                         │
//! ┌─────────────────────────────────────────────────────┐
//! │                ConnectionManager                    │
//! │  state machine · reconnect timer · outbox · JobMap  │
//! └─────────────────────────────────────────────────────┘
//!             │                         ▲
//!             ▼ text frames             │ TransportEvent
//! ┌─────────────────────────────────────────────────────┐
//! │             TransportLink (one at a time)           │
//! └─────────────────────────────────────────────────────┘
//! ```

mod connection;
pub(crate) mod manager;

// Re-export connection types
pub use connection::{
    ConnectionState, Connector, ReconnectConfig, TransportError, TransportEvent, TransportLink,
    TungsteniteConnector,
};
