//! Connection manager for the job event socket.
//!
//! A single actor task owns the transport, the reconnect timer, the outbound
//! queue and the job map. Commands, transport events, timer expiry and
//! reducer applications are all handled one at a time on that task, so
//! nothing here needs a lock.
//!
//! ```text
//!            token                 opened              auth_success
//!   Idle ───────────▶ Connecting ─────────▶ (send auth) ─────────────▶ Connected
//!    ▲                   ▲   │                                            │
//!    │ teardown          │   │ close / open failure                       │ close
//!    │                   │   ▼                                            │
//!    └──────────── timer fires ◀──────── Disconnected ◀──────────────────┘
//!
//!   Connecting/Connected ── auth_error ──▶ Error (waits for a new token)
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use jobsync_shared::{ClientMessage, JobMap, JobSubscription, ServerMessage};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, Sleep};

use super::connection::{
    ConnectionState, Connector, ReconnectConfig, TransportError, TransportEvent, TransportLink,
};
use crate::stores::{jobs, Applied, SnapshotPublisher};
use crate::subscription::SubscriptionController;

/// Requests from the facade to the actor.
#[derive(Debug)]
pub(crate) enum Command {
    SetToken(Option<String>),
    SetSubscription(JobSubscription),
    Send(ClientMessage),
    Shutdown,
}

enum Step {
    Command(Command),
    Opened(Result<TransportLink, TransportError>),
    Transport(TransportEvent),
    ReconnectDue,
}

type PendingConnect = BoxFuture<'static, Result<TransportLink, TransportError>>;

pub(crate) struct ConnectionManager {
    endpoint: String,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    token: Option<String>,

    state: ConnectionState,
    /// Consecutive reconnects since the last `auth_success`.
    attempt: u32,
    /// Set when the reconnect budget ran out, so the same token may retry.
    gave_up: bool,
    last_error: Option<String>,

    // At most one of these is live at any time.
    connecting: Option<PendingConnect>,
    link: Option<TransportLink>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,

    subscriptions: SubscriptionController,
    /// Caller sends issued before authentication; flushed after the subscribe.
    outbox: VecDeque<ClientMessage>,
    jobs: JobMap,
    publisher: SnapshotPublisher,
}

impl ConnectionManager {
    pub(crate) fn new(
        endpoint: String,
        connector: Arc<dyn Connector>,
        reconnect: ReconnectConfig,
        subscriptions: SubscriptionController,
        publisher: SnapshotPublisher,
        token: Option<String>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            reconnect,
            token,
            state: ConnectionState::Idle,
            attempt: 0,
            gave_up: false,
            last_error: None,
            connecting: None,
            link: None,
            reconnect_timer: None,
            subscriptions,
            outbox: VecDeque::new(),
            jobs: JobMap::new(),
            publisher,
        }
    }

    /// Drive the state machine until shutdown or until every command sender is gone.
    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        if self.token.is_some() {
            self.start_connect();
        } else {
            crate::log_debug!("No token supplied; staying idle");
        }

        loop {
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd.unwrap_or(Command::Shutdown)),
                opened = pending_connect(&mut self.connecting) => Step::Opened(opened),
                event = next_transport_event(&mut self.link) => Step::Transport(event),
                () = reconnect_due(&mut self.reconnect_timer) => Step::ReconnectDue,
            };

            match step {
                Step::Command(Command::Shutdown) => {
                    self.teardown();
                    crate::log_info!("Job sync for {} shut down", self.endpoint);
                    break;
                }
                Step::Command(cmd) => self.handle_command(cmd),
                Step::Opened(result) => self.handle_opened(result),
                Step::Transport(event) => self.handle_transport(event),
                Step::ReconnectDue => self.handle_reconnect_due(),
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetToken(token) => self.set_token(token),
            Command::SetSubscription(subscription) => {
                let authenticated = self.state.is_connected();
                if let Some(msg) = self.subscriptions.replace(subscription, authenticated) {
                    self.send_now(msg);
                } else {
                    crate::log_debug!("Subscription updated; will be sent after authentication");
                }
            }
            Command::Send(msg) => {
                if self.state.is_connected() {
                    self.send_now(msg);
                } else if self.state == ConnectionState::Error {
                    // Nothing will authenticate until a new token arrives.
                    crate::log_warn!("Dropping {}; connection is in error", msg.kind());
                } else {
                    crate::log_debug!("Queueing {} until authenticated", msg.kind());
                    self.outbox.push_back(msg);
                }
            }
            Command::Shutdown => self.teardown(),
        }
    }

    fn set_token(&mut self, token: Option<String>) {
        if token == self.token && !self.gave_up {
            crate::log_debug!("Token unchanged; ignoring");
            return;
        }

        let identity_changed = token != self.token;
        self.close_transport();
        self.attempt = 0;
        self.gave_up = false;
        if identity_changed {
            self.jobs.clear();
            // Queued messages belong to the previous identity.
            self.outbox.clear();
        }
        self.token = token;

        if self.token.is_some() {
            self.start_connect();
        } else {
            crate::log_info!("Token removed; disconnecting");
            self.state = ConnectionState::Idle;
            self.outbox.clear();
            self.publish();
        }
    }

    fn start_connect(&mut self) {
        if self.token.is_none() {
            return;
        }
        self.reconnect_timer = None;
        self.link = None;

        self.state = ConnectionState::Connecting;
        self.publish();

        crate::log_info!("Connecting to {} (attempt {})", self.endpoint, self.attempt);
        let connector = Arc::clone(&self.connector);
        let url = self.endpoint.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    fn handle_opened(&mut self, result: Result<TransportLink, TransportError>) {
        self.connecting = None;
        match result {
            Ok(link) => {
                // A live transport and a reconnect timer never coexist.
                self.reconnect_timer = None;
                let Some(token) = self.token.clone() else {
                    link.close();
                    return;
                };
                crate::log_info!("[{}] transport open, authenticating", link.id);
                self.link = Some(link);
                self.send_now(ClientMessage::Auth { token });
            }
            Err(e) => {
                crate::log_warn!("Connection to {} failed: {}", self.endpoint, e);
                self.handle_disconnect();
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.handle_frame(&text),
            TransportEvent::Closed { reason } => {
                let id = self.link.as_ref().map(|l| l.id.clone()).unwrap_or_default();
                match reason {
                    Some(reason) => crate::log_info!("[{}] transport closed: {}", id, reason),
                    None => crate::log_info!("[{}] transport closed", id),
                }
                self.link = None;
                self.handle_disconnect();
            }
        }
    }

    fn handle_disconnect(&mut self) {
        self.link = None;

        if self.state == ConnectionState::Error {
            // Auth was rejected; retrying with the same token is pointless.
            return;
        }
        if self.token.is_none() {
            self.state = ConnectionState::Idle;
            self.publish();
            return;
        }
        if self.reconnect.exhausted(self.attempt) {
            let reason = format!(
                "Max reconnect attempts ({}) exceeded",
                self.reconnect.max_attempts
            );
            crate::log_error!("{}", reason);
            self.state = ConnectionState::Error;
            self.gave_up = true;
            self.last_error = Some(reason);
            self.publish();
            return;
        }

        let delay = self.reconnect.delay_for_attempt(self.attempt);
        self.attempt += 1;
        crate::log_info!(
            "Reconnecting to {} in {}ms (attempt {})",
            self.endpoint,
            delay.as_millis(),
            self.attempt
        );
        self.state = ConnectionState::Disconnected;
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        self.publish();
    }

    fn handle_reconnect_due(&mut self) {
        self.reconnect_timer = None;
        if self.token.is_some() {
            self.start_connect();
        } else {
            self.state = ConnectionState::Idle;
            self.publish();
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                crate::log_warn!("Dropping malformed frame ({}): {}", e, preview(text));
                return;
            }
        };

        match message {
            ServerMessage::Ping => self.send_now(ClientMessage::Pong),
            ServerMessage::AuthSuccess => self.on_auth_success(),
            ServerMessage::AuthError { message } => self.on_auth_error(message),
            ServerMessage::SubscribeJobsSuccess => {
                crate::log_debug!("Job subscription acknowledged");
            }
            ServerMessage::Job(event) => {
                let job_id = event.job_id().map(str::to_owned);
                match jobs::apply(&mut self.jobs, event) {
                    Applied::Ignored(reason) => {
                        crate::log_debug!("Dropped event for {:?}: {:?}", job_id, reason);
                    }
                    applied => {
                        if let Applied::Updated {
                            progress_clamped: true,
                        } = applied
                        {
                            crate::log_debug!("Refused progress regression for {:?}", job_id);
                        }
                        self.publish();
                    }
                }
            }
        }
    }

    fn on_auth_success(&mut self) {
        if self.state.is_connected() {
            crate::log_debug!("Duplicate auth_success ignored");
            return;
        }

        self.state = ConnectionState::Connected;
        self.attempt = 0;
        self.gave_up = false;
        self.last_error = None;

        // The subscribe goes out before anything else on this connection.
        let subscribe = self.subscriptions.on_authenticated();
        self.send_now(subscribe);
        let queued: Vec<ClientMessage> = self.outbox.drain(..).collect();
        for msg in queued {
            self.send_now(msg);
        }

        crate::log_info!("Authenticated with {}; jobs subscribed", self.endpoint);
        self.publish();
    }

    fn on_auth_error(&mut self, message: String) {
        crate::log_error!("Authentication rejected: {}", message);
        self.state = ConnectionState::Error;
        self.last_error = Some(message);
        self.outbox.clear();
        self.close_transport();
        self.publish();
    }

    fn send_now(&mut self, msg: ClientMessage) {
        let Some(link) = self.link.as_ref() else {
            match msg {
                // Connection-scoped; meaningless on the next transport.
                ClientMessage::Auth { .. } | ClientMessage::Pong => {
                    crate::log_debug!("No transport; dropping {}", msg.kind());
                }
                msg => {
                    crate::log_warn!("No transport; requeueing {}", msg.kind());
                    self.outbox.push_back(msg);
                }
            }
            return;
        };
        match msg.encode() {
            Ok(text) => {
                if let Err(e) = link.send(text) {
                    // The close event will follow and drive the reconnect.
                    crate::log_warn!("[{}] failed to send {}: {}", link.id, msg.kind(), e);
                }
            }
            Err(e) => crate::log_error!("Failed to encode {}: {}", msg.kind(), e),
        }
    }

    /// Cancel the pending connect and the timer, and close the live transport.
    fn close_transport(&mut self) {
        self.connecting = None;
        self.reconnect_timer = None;
        if let Some(link) = self.link.take() {
            crate::log_debug!("[{}] closing transport", link.id);
            link.close();
        }
    }

    fn teardown(&mut self) {
        self.close_transport();
        if self.state != ConnectionState::Idle {
            self.state = ConnectionState::Idle;
            self.publish();
        }
    }

    fn publish(&mut self) {
        self.publisher
            .publish(&self.state, &self.jobs, &self.last_error, self.attempt);
    }
}

async fn pending_connect(
    connecting: &mut Option<PendingConnect>,
) -> Result<TransportLink, TransportError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_transport_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
