//! Transport abstraction, connection state and reconnect policy.
//!
//! The tokio-tungstenite transport lives in `connection_native`; tests plug
//! in their own [`Connector`].

use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Connection state for the job-sync socket
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No token, or torn down. No transport and no timer.
    #[default]
    Idle,
    /// Transport opening or waiting for `auth_success`.
    Connecting,
    /// Authenticated and subscribed.
    Connected,
    /// Transport lost; a reconnect is scheduled.
    Disconnected,
    /// Authentication rejected (or reconnect budget exhausted). Not retried automatically.
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        // Float-to-int casts saturate, so an overflowing exponent lands on the cap.
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }

    /// Whether `attempt` reconnects have already used up the budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Transport-level failures. All of them lead to a scheduled reconnect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport closed")]
    Closed,
}

/// What a live transport can report back to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Message(String),
    /// The transport is gone, for whatever reason.
    Closed { reason: Option<String> },
}

/// One open bidirectional connection.
///
/// Dropping the link closes it: the outbound channel is released and any
/// reader tasks registered with [`TransportLink::with_task`] are aborted.
pub struct TransportLink {
    /// Short id used to correlate log lines for this physical connection.
    pub id: String,
    outbound: UnboundedSender<String>,
    inbound: UnboundedReceiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(outbound: UnboundedSender<String>, inbound: UnboundedReceiver<TransportEvent>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: id[..8].to_string(),
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    /// Tie a background task to the lifetime of this link.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Queue a text frame for the peer.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .unbounded_send(text)
            .map_err(|_| TransportError::Closed)
    }

    /// Wait for the next inbound event. A dropped inbound channel reads as `Closed`.
    pub async fn next_event(&mut self) -> TransportEvent {
        self.inbound
            .next()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None })
    }

    /// Close the link now.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.outbound.close_channel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").field("id", &self.id).finish()
    }
}

/// Opens transports. The connection manager owns exactly one link at a time.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

mod connection_native;
pub use connection_native::TungsteniteConnector;
