//! Client facade: the only surface UI code talks to.

use std::sync::Arc;

use jobsync_shared::{ClientMessage, JobMap, JobState, JobSubscription};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::stores::{ClientSnapshot, SnapshotPublisher};
use crate::subscription::SubscriptionController;
use crate::ws::manager::{Command, ConnectionManager};
use crate::ws::{ConnectionState, Connector, TungsteniteConnector};

/// Keeps a live, locally consistent map of server jobs.
///
/// Must be created inside a tokio runtime. Dropping the client aborts the
/// background task; see the `Drop` impl for when resources are released.
///
/// ```rust,ignore
/// let client = JobSyncClient::connect(ClientConfig::from_env(), Some(token))?;
/// let mut changes = client.changes();
/// while let Ok(snapshot) = changes.recv().await {
///     render(&snapshot.state, &snapshot.jobs);
/// }
/// ```
pub struct JobSyncClient {
    commands: mpsc::UnboundedSender<Command>,
    latest: watch::Receiver<Arc<ClientSnapshot>>,
    changes: broadcast::Sender<Arc<ClientSnapshot>>,
    endpoint: String,
    task: Option<JoinHandle<()>>,
}

impl JobSyncClient {
    /// Start a client over real WebSockets.
    pub fn connect(config: ClientConfig, token: Option<String>) -> Result<Self, ClientError> {
        Self::with_connector(config, Arc::new(TungsteniteConnector::new()), token)
    }

    /// Start a client over any transport.
    ///
    /// With `token == None` the client stays idle and opens nothing.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        token: Option<String>,
    ) -> Result<Self, ClientError> {
        let endpoint = config.ws_endpoint()?;
        let publisher = SnapshotPublisher::new(config.change_buffer);
        let latest = publisher.subscribe_latest();
        let changes = publisher.changes();

        let (commands, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            endpoint.clone(),
            connector,
            config.reconnect,
            SubscriptionController::new(config.subscription),
            publisher,
            token,
        );
        let task = tokio::spawn(manager.run(rx));

        Ok(Self {
            commands,
            latest,
            changes,
            endpoint,
            task: Some(task),
        })
    }

    /// Supply, replace or remove the auth token.
    ///
    /// A new token reconnects from scratch; `None` tears the connection down.
    pub fn set_token(&self, token: Option<String>) -> Result<(), ClientError> {
        self.dispatch(Command::SetToken(token))
    }

    /// Replace the job filter. Sent now if authenticated, otherwise on the next auth.
    pub fn set_subscription(&self, subscription: JobSubscription) -> Result<(), ClientError> {
        self.dispatch(Command::SetSubscription(subscription))
    }

    /// Send a raw message. Held back until the connection is authenticated.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        self.dispatch(Command::Send(msg))
    }

    pub fn state(&self) -> ConnectionState {
        self.latest.borrow().state.clone()
    }

    pub fn jobs(&self) -> JobMap {
        self.latest.borrow().jobs.clone()
    }

    pub fn job(&self, job_id: &str) -> Option<JobState> {
        self.latest.borrow().jobs.get(job_id).cloned()
    }

    pub fn last_error(&self) -> Option<String> {
        self.latest.borrow().last_error.clone()
    }

    /// The newest published snapshot.
    pub fn snapshot(&self) -> Arc<ClientSnapshot> {
        self.latest.borrow().clone()
    }

    /// Latest-value channel; intermediate revisions may be skipped.
    pub fn watch(&self) -> watch::Receiver<Arc<ClientSnapshot>> {
        self.latest.clone()
    }

    /// One item per processed event, in order.
    pub fn changes(&self) -> broadcast::Receiver<Arc<ClientSnapshot>> {
        self.changes.subscribe()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Close the transport, cancel timers and wait for the background task.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                crate::log_warn!("Job sync task ended abnormally: {}", e);
            }
        }
    }

    fn dispatch(&self, cmd: Command) -> Result<(), ClientError> {
        self.commands.send(cmd).map_err(|_| ClientError::ShutDown)
    }
}

/// Dropping the client aborts the background task. It is cancelled at its
/// next poll, which drops the transport and any pending reconnect timer
/// without attempting another connection. The release is asynchronous;
/// [`JobSyncClient::shutdown`] waits for it.
impl Drop for JobSyncClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            // Aborting drops the manager, and with it the timer and the transport.
            task.abort();
        }
    }
}

impl std::fmt::Debug for JobSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.latest.borrow();
        f.debug_struct("JobSyncClient")
            .field("endpoint", &self.endpoint)
            .field("state", &snapshot.state)
            .field("jobs", &snapshot.jobs.len())
            .finish()
    }
}
