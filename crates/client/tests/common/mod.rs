//! In-memory transport for driving the client from tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use jobsync_client::{
    ClientConfig, ClientSnapshot, Connector, JobSyncClient, TransportError, TransportEvent,
    TransportLink,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

pub const TOKEN: &str = "token-abc";

pub fn config() -> ClientConfig {
    ClientConfig::new("http://jobs.test/api")
}

/// Hands every opened link to the test as a [`MockServer`].
pub struct MockConnector {
    servers: mpsc::UnboundedSender<MockServer>,
    connects: Mutex<Vec<Instant>>,
    failures: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            connects: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<TransportLink, TransportError> {
        self.connects.lock().unwrap().push(Instant::now());
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (out_tx, out_rx) = unbounded();
        let (in_tx, in_rx) = unbounded();
        let _ = self.servers.send(MockServer {
            from_client: out_rx,
            to_client: in_tx,
        });
        Ok(TransportLink::new(out_tx, in_rx))
    }
}

/// The server end of one mock connection.
pub struct MockServer {
    from_client: UnboundedReceiver<String>,
    to_client: UnboundedSender<TransportEvent>,
}

impl MockServer {
    pub async fn recv_json(&mut self) -> Value {
        let text = timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the transport");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    pub async fn expect_type(&mut self, kind: &str) -> Value {
        let frame = self.recv_json().await;
        assert_eq!(frame["type"], kind, "unexpected frame {frame}");
        frame
    }

    /// Nothing else arrives within a short window.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(text)) = timeout(Duration::from_millis(50), self.from_client.next()).await {
            panic!("unexpected client frame {text}");
        }
    }

    /// Accept the auth frame and return the subscribe that follows.
    pub async fn accept(&mut self) -> Value {
        let auth = self.expect_type("auth").await;
        assert_eq!(auth["token"], TOKEN);
        self.send(json!({"type": "auth_success"}));
        self.expect_type("subscribe_jobs").await
    }

    pub fn send(&self, frame: Value) {
        self.send_text(&frame.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self
            .to_client
            .unbounded_send(TransportEvent::Message(text.to_string()));
    }

    /// Drop the connection from the server side.
    pub fn close(self) {
        let _ = self.to_client.unbounded_send(TransportEvent::Closed {
            reason: Some("server going away".to_string()),
        });
    }

    /// Resolves once the client has dropped its end of the link.
    pub async fn client_closed(&mut self) -> bool {
        let drained = timeout(Duration::from_secs(5), async {
            while self.from_client.next().await.is_some() {}
        })
        .await;
        drained.is_ok()
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    timeout(Duration::from_secs(120), servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Wait until a published snapshot satisfies `pred`.
pub async fn wait_until<F>(client: &JobSyncClient, mut pred: F) -> Arc<ClientSnapshot>
where
    F: FnMut(&ClientSnapshot) -> bool,
{
    let mut rx = client.watch();
    let found = timeout(Duration::from_secs(120), rx.wait_for(|snapshot| pred(snapshot)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("client task ended");
    Arc::clone(&found)
}

pub fn event(kind: &str, payload: Value) -> Value {
    json!({
        "event_type": kind,
        "timestamp": "2024-05-01T10:00:05Z",
        "payload": payload,
    })
}
