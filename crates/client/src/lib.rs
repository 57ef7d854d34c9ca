//! Jobsync Client - real-time job event synchronization
//!
//! This crate keeps a live map of server-side background jobs (downloads,
//! imports, metadata refreshes, library scans) over a persistent WebSocket,
//! re-authenticating and re-subscribing across connection loss.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod stores;
pub mod subscription;
pub mod ws;

pub use client::JobSyncClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use stores::ClientSnapshot;
pub use ws::{
    ConnectionState, Connector, ReconnectConfig, TransportError, TransportEvent, TransportLink,
    TungsteniteConnector,
};

pub use jobsync_shared::{ClientMessage, JobMap, JobState, JobStatus, JobSubscription};
