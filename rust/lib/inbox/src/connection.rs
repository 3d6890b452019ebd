//! Lifecycle of the single push channel of a session.
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──ack──▶ connected
//!                               │ timeout/error        │ transport drop
//!                               ▼                      ▼
//!                     degraded transport, once    reconnecting ──ok──▶ connected
//!                               │ fails                │ max_attempts exhausted
//!                               ▼                      ▼
//!                             failed ◀─────────────────┘  (terminal until connect())
//! ```
//!
//! `disconnect()` is valid from every state and always lands in
//! `disconnected`. Errors are delivered to `on_error` listeners; no method
//! here returns or panics with one.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{
    Channel, ChannelEvent, ChannelFactory, ChannelOptions, EVENT_JOIN_USER, EVENT_LEAVE_USER,
    Transport,
};
use crate::config::ConnectionConfig;
use crate::error::SyncError;
use crate::listeners::{ListenerId, Listeners};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Connection state owned by the manager. Read-only to everyone else.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub transport: Option<Transport>,
    pub session_id: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            transport: None,
            session_id: None,
        }
    }
}

/// Diagnostic view of the connection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub is_connected: bool,
    pub reconnect_attempts: u32,
    pub transport_name: Option<String>,
    pub session_id: Option<String>,
}

/// A server event received on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub event: String,
    pub payload: Value,
}

/// Owns the push channel. Cheap to clone; clones share one channel.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    factory: Arc<dyn ChannelFactory>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
    on_connect: Listeners<ConnectionState>,
    on_disconnect: Listeners<str>,
    on_error: Listeners<SyncError>,
    on_message: Listeners<InboundMessage>,
}

/// Mutable handle bookkeeping. `generation` changes on every
/// connect/disconnect; a driver task whose generation is stale may not
/// touch state.
#[derive(Default)]
struct Link {
    generation: u64,
    channel: Option<Arc<dyn Channel>>,
    cancel: Option<CancellationToken>,
    rooms: BTreeSet<String>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, factory: Arc<dyn ChannelFactory>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                state,
                link: Mutex::new(Link::default()),
                on_connect: Listeners::new("connection.on_connect"),
                on_disconnect: Listeners::new("connection.on_disconnect"),
                on_error: Listeners::new("connection.on_error"),
                on_message: Listeners::new("connection.on_message"),
            }),
        }
    }

    // ====================================================================
    // Lifecycle
    // ====================================================================

    /// Start connecting. No-op while connecting, connected or reconnecting.
    ///
    /// Must be called from within a tokio runtime; the channel is driven by
    /// a spawned task.
    pub fn connect(&self) {
        let inner = &self.inner;
        let mut link = inner.link();

        let status = inner.state.borrow().status;
        if matches!(
            status,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting
        ) {
            debug!(?status, "connect ignored; channel already active");
            return;
        }

        link.generation += 1;
        let generation = link.generation;

        let config_error = inner.config.validate().err().or_else(|| {
            tokio::runtime::Handle::try_current()
                .err()
                .map(|_| SyncError::Config("connect() called outside a tokio runtime".into()))
        });
        if let Some(err) = config_error {
            inner.state.send_replace(ConnectionState {
                status: ConnectionStatus::Failed,
                ..Default::default()
            });
            drop(link);
            error!(error = %err, "push channel not started");
            inner.on_error.emit(&err);
            return;
        }

        let cancel = CancellationToken::new();
        link.cancel = Some(cancel.clone());
        inner.state.send_replace(ConnectionState {
            status: ConnectionStatus::Connecting,
            ..Default::default()
        });
        drop(link);

        info!(url = %inner.config.url, "connecting push channel");
        tokio::spawn(drive(Arc::clone(inner), generation, cancel));
    }

    /// Tear the channel down. Always safe; a later `connect()` builds a
    /// fresh channel.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let (channel, cancel) = {
            let mut link = inner.link();
            link.generation += 1;
            link.rooms.clear();
            let taken = (link.channel.take(), link.cancel.take());
            inner.state.send_replace(ConnectionState::default());
            taken
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(channel) = channel {
            channel.close();
            info!("push channel disconnected");
            inner.on_disconnect.emit("client disconnect");
        }
    }

    // ====================================================================
    // Rooms
    // ====================================================================

    /// Join the user's room. Returns false (and only warns) when the
    /// channel is not connected. Rooms joined here are re-joined after
    /// every reconnect.
    pub fn join_room(&self, user_id: &str) -> bool {
        let channel = {
            let mut link = self.inner.link();
            let Some(channel) = link.channel.clone() else {
                warn!(user_id, "join_room skipped: channel not connected");
                return false;
            };
            if !link.rooms.insert(user_id.to_string()) {
                debug!(user_id, "room already joined");
                return true;
            }
            channel
        };
        send(&channel, EVENT_JOIN_USER, user_id)
    }

    /// Leave the user's room. Returns false (and only warns) when the
    /// channel is not connected; the room is forgotten either way.
    pub fn leave_room(&self, user_id: &str) -> bool {
        let channel = {
            let mut link = self.inner.link();
            link.rooms.remove(user_id);
            match link.channel.clone() {
                Some(channel) => channel,
                None => {
                    warn!(user_id, "leave_room skipped: channel not connected");
                    return false;
                }
            }
        };
        send(&channel, EVENT_LEAVE_USER, user_id)
    }

    // ====================================================================
    // Events
    // ====================================================================

    pub fn on_connect<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.on_connect.add(handler)
    }

    /// Handler receives the disconnect reason.
    pub fn on_disconnect<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.on_disconnect.add(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.inner.on_error.add(handler)
    }

    /// Handler receives `(event_type, payload)` for every server event.
    pub fn on_message<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.inner
            .on_message
            .add(move |m: &InboundMessage| handler(&m.event, &m.payload))
    }

    /// Remove a handler registered with any of the `on_*` methods.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let inner = &self.inner;
        inner.on_connect.remove(id)
            || inner.on_disconnect.remove(id)
            || inner.on_error.remove(id)
            || inner.on_message.remove(id)
    }

    // ====================================================================
    // State
    // ====================================================================

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().status == ConnectionStatus::Connected
    }

    pub fn telemetry(&self) -> Telemetry {
        let s = self.inner.state.borrow();
        Telemetry {
            is_connected: s.status == ConnectionStatus::Connected,
            reconnect_attempts: s.reconnect_attempts,
            transport_name: s.transport.map(|t| t.as_str().to_string()),
            session_id: s.session_id.clone(),
        }
    }
}

fn send(channel: &Arc<dyn Channel>, event: &str, user_id: &str) -> bool {
    match channel.emit(event, Value::String(user_id.to_string())) {
        Ok(()) => {
            debug!(event, user_id, "room control sent");
            true
        }
        Err(e) => {
            warn!(event, user_id, error = %e, "room control not sent");
            false
        }
    }
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the state if `generation` is still current.
    fn update<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut ConnectionState),
    {
        let link = self.link();
        if link.generation != generation {
            return false;
        }
        self.state.send_modify(f);
        true
    }

    fn options(&self, transport: Transport) -> ChannelOptions {
        ChannelOptions {
            url: self.config.url.clone(),
            timeout: self.config.connect_timeout(),
            transport,
            with_credentials: self.config.with_credentials,
        }
    }

    /// One bounded open attempt. `None` means cancelled.
    async fn attempt(
        &self,
        transport: Transport,
        cancel: &CancellationToken,
    ) -> Option<Result<Arc<dyn Channel>, SyncError>> {
        let options = self.options(transport);
        let timeout = options.timeout;
        tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(timeout, self.factory.open(&options)) => {
                Some(res.unwrap_or(Err(SyncError::Timeout(timeout))))
            }
        }
    }

    /// Record a successful (re)connection and re-join remembered rooms.
    fn connected(&self, generation: u64, channel: &Arc<dyn Channel>) -> bool {
        let rooms: Vec<String> = {
            let mut link = self.link();
            if link.generation != generation {
                drop(link);
                channel.close();
                return false;
            }
            link.channel = Some(Arc::clone(channel));
            self.state.send_modify(|s| {
                s.status = ConnectionStatus::Connected;
                s.reconnect_attempts = 0;
                s.transport = Some(channel.transport());
                s.session_id = channel.session_id();
            });
            link.rooms.iter().cloned().collect()
        };

        for room in &rooms {
            send(channel, EVENT_JOIN_USER, room);
        }
        let state = self.state.borrow().clone();
        info!(
            transport = %channel.transport(),
            session_id = state.session_id.as_deref().unwrap_or("-"),
            "push channel connected"
        );
        self.on_connect.emit(&state);
        true
    }

    /// Enter `failed` and emit the single terminal error, unless the
    /// generation is stale.
    fn give_up(&self, generation: u64, err: SyncError) {
        let failed = self.update(generation, |s| {
            s.status = ConnectionStatus::Failed;
            s.transport = None;
            s.session_id = None;
        });
        if failed {
            error!(error = %err, "push channel failed");
            self.on_error.emit(&err);
        }
    }

    /// Record a transport drop. Returns false if the generation is stale.
    fn dropped(&self, generation: u64, reason: &str) -> bool {
        {
            let mut link = self.link();
            if link.generation != generation {
                return false;
            }
            link.channel = None;
            self.state.send_modify(|s| {
                s.status = ConnectionStatus::Reconnecting;
                s.session_id = None;
            });
        }
        warn!(reason, "push channel dropped");
        self.on_disconnect.emit(reason);
        true
    }
}

/// Background driver for one connect cycle.
async fn drive(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let Some((mut channel, transport)) = initial(&inner, generation, &cancel).await else {
        return;
    };

    loop {
        if !inner.connected(generation, &channel) {
            return;
        }

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = channel.recv() => match event {
                    Some(ChannelEvent::Message { event, payload }) => {
                        debug!(%event, "push event received");
                        inner.on_message.emit(&InboundMessage { event, payload });
                    }
                    Some(ChannelEvent::Error(msg)) => {
                        warn!(error = %msg, "push channel error");
                        inner.on_error.emit(&SyncError::Transport(msg));
                    }
                    None => break "transport closed",
                },
            }
        };

        channel.close();
        if !inner.dropped(generation, reason) {
            return;
        }
        channel = match reconnect(&inner, generation, transport, &cancel).await {
            Some(channel) => channel,
            None => return,
        };
    }
}

/// First open of a cycle: the preferred transport, then the degraded one
/// exactly once. If both fail the manager goes straight to `failed`.
async fn initial(
    inner: &Inner,
    generation: u64,
    cancel: &CancellationToken,
) -> Option<(Arc<dyn Channel>, Transport)> {
    let preferred = inner.config.transports[0];
    let err = match inner.attempt(preferred, cancel).await? {
        Ok(channel) => return Some((channel, preferred)),
        Err(e) => e,
    };
    warn!(transport = %preferred, error = %err, "initial connect failed");

    let Some(fallback) = inner.config.transports.get(1).copied() else {
        inner.give_up(generation, terminal(err, &format!("could not connect over {preferred}")));
        return None;
    };

    info!(from = %preferred, to = %fallback, "falling back to degraded transport");
    match inner.attempt(fallback, cancel).await? {
        Ok(channel) => Some((channel, fallback)),
        Err(e) => {
            warn!(transport = %fallback, error = %e, "fallback connect failed");
            let context = format!("could not connect over {preferred} or {fallback}");
            inner.give_up(generation, terminal(e, &context));
            None
        }
    }
}

/// Bounded reconnect loop after a drop. Emits exactly one terminal error
/// when it gives up.
async fn reconnect(
    inner: &Inner,
    generation: u64,
    transport: Transport,
    cancel: &CancellationToken,
) -> Option<Arc<dyn Channel>> {
    let max = inner.config.max_attempts;
    let mut last = SyncError::Transport("connection lost".into());

    for attempt in 1..=max {
        let counted = inner.update(generation, |s| {
            s.status = ConnectionStatus::Reconnecting;
            s.reconnect_attempts = attempt;
        });
        if !counted {
            return None;
        }

        let delay = inner.config.backoff_delay(attempt);
        debug!(attempt, max, ?delay, "reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match inner.attempt(transport, cancel).await? {
            Ok(channel) => {
                info!(attempt, "reconnected");
                return Some(channel);
            }
            Err(e) => {
                warn!(attempt, max, error = %e, "reconnect attempt failed");
                let retry = e.is_retryable();
                last = e;
                if !retry {
                    break;
                }
            }
        }
    }

    let context = format!("giving up after {max} reconnect attempts");
    inner.give_up(generation, terminal(last, &context));
    None
}

/// Config errors are reported as they are; everything else is wrapped as
/// a transport failure with `context`.
fn terminal(err: SyncError, context: &str) -> SyncError {
    match err {
        SyncError::Config(_) => err,
        other => SyncError::Transport(format!("{context}: {other}")),
    }
}
