//! Session wiring.
//!
//! [`InboxSession`] owns one store, one preferences gate, one connection
//! manager and, while a user is signed in, one poller. The current user id
//! is the only activation switch:
//!
//! - `set_user(Some(id))` connects, joins the user's room, loads the
//!   snapshot and preferences, and starts polling;
//! - `set_user(None)` leaves the room, disconnects, stops polling and
//!   clears every piece of state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveTime;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::channel::{ChannelFactory, EVENT_NEW_NOTIFICATION};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, Telemetry};
use crate::error::SyncError;
use crate::listeners::{ListenerId, Listeners};
use crate::model::{Notification, PageRequest, PreferenceSet, PreferencesPatch};
use crate::poller::PollingFallback;
use crate::preferences::PreferencesGate;
use crate::store::NotificationStore;
use crate::transition::InboxState;

/// Read model for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxView {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub total_unread: usize,
    pub loading: bool,
    pub error: Option<String>,
    pub preferences: PreferenceSet,
}

impl InboxView {
    fn of(state: InboxState, preferences: PreferenceSet) -> Self {
        Self {
            notifications: state.notifications,
            unread_count: state.unread_count,
            total_unread: state.total_unread,
            loading: state.loading,
            error: state.error,
            preferences,
        }
    }
}

type Clock = Arc<dyn Fn() -> NaiveTime + Send + Sync>;

pub struct InboxSession {
    config: SyncConfig,
    store: Arc<NotificationStore>,
    gate: Arc<PreferencesGate>,
    connection: ConnectionManager,
    toasts: Arc<Listeners<Notification>>,
    views: Arc<Listeners<InboxView>>,
    clock: Clock,
    active: Mutex<Option<Active>>,
}

/// Everything that exists only while a user is signed in.
struct Active {
    user_id: String,
    poller: PollingFallback,
    listeners: Vec<ListenerId>,
}

impl InboxSession {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn NotificationApi>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        let page = PageRequest::first(config.api.page_size);
        let store = Arc::new(NotificationStore::with_page(api.clone(), page));
        let gate = Arc::new(PreferencesGate::new(api));
        let connection = ConnectionManager::new(config.connection.clone(), factory);
        let views = Arc::new(Listeners::new("session.views"));

        {
            let (gate_ref, views) = (Arc::downgrade(&gate), views.clone());
            store.subscribe(move |state| {
                let prefs = gate_ref.upgrade().map(|g| g.current()).unwrap_or_default();
                views.emit(&InboxView::of(state.clone(), prefs));
            });
        }
        {
            let (store_ref, views) = (Arc::downgrade(&store), views.clone());
            gate.subscribe(move |prefs| {
                let state = store_ref.upgrade().map(|s| s.state()).unwrap_or_default();
                views.emit(&InboxView::of(state, prefs.clone()));
            });
        }

        Self {
            config,
            store,
            gate,
            connection,
            toasts: Arc::new(Listeners::new("session.toasts")),
            views,
            clock: Arc::new(|| chrono::Local::now().time()),
            active: Mutex::new(None),
        }
    }

    /// Replace the wall clock used for quiet hours.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    // ====================================================================
    // Activation
    // ====================================================================

    /// Switch to `user`. Same user is a no-op. Returns the snapshot result
    /// of the new session; the error is also in `view().error`.
    pub async fn set_user(&self, user: Option<String>) -> Result<(), SyncError> {
        let previous = {
            let mut active = self.active();
            if active.as_ref().map(|a| &a.user_id) == user.as_ref() {
                return Ok(());
            }
            active.take()
        };
        if let Some(previous) = previous {
            self.deactivate(previous);
        }
        let Some(user_id) = user else {
            return Ok(());
        };
        let next = self.activate(user_id);
        *self.active() = Some(next);

        let (snapshot, _) = tokio::join!(self.store.fetch(), self.gate.load());
        snapshot
    }

    pub fn user(&self) -> Option<String> {
        self.active().as_ref().map(|a| a.user_id.clone())
    }

    fn activate(&self, user_id: String) -> Active {
        info!(%user_id, "inbox session started");
        let mut listeners = Vec::new();

        {
            let (connection, user_id) = (self.connection.clone(), user_id.clone());
            listeners.push(self.connection.on_connect(move |_| {
                connection.join_room(&user_id);
            }));
        }
        {
            let (store, gate, toasts, clock) = (
                self.store.clone(),
                self.gate.clone(),
                self.toasts.clone(),
                self.clock.clone(),
            );
            listeners.push(self.connection.on_message(move |event, payload| {
                if event != EVENT_NEW_NOTIFICATION {
                    debug!(event, "push event ignored");
                    return;
                }
                let Some(n) = decode_push(payload) else {
                    return;
                };
                if store.handle_push(n.clone()) && gate.should_surface(&n, clock()) {
                    toasts.emit(&n);
                }
            }));
        }
        listeners.push(self.connection.on_error(|e| {
            warn!(error = %e, "push channel error; polling keeps the counter fresh");
        }));

        self.connection.connect();
        let poller = PollingFallback::start(self.store.clone(), self.config.polling.interval());

        Active {
            user_id,
            poller,
            listeners,
        }
    }

    fn deactivate(&self, active: Active) {
        if self.connection.is_connected() {
            self.connection.leave_room(&active.user_id);
        }
        self.connection.disconnect();
        active.poller.stop();
        for id in active.listeners {
            self.connection.remove_listener(id);
        }
        self.store.reset();
        self.gate.reset();
        info!(user_id = %active.user_id, "inbox session ended");
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ====================================================================
    // Read model
    // ====================================================================

    pub fn view(&self) -> InboxView {
        InboxView::of(self.store.state(), self.gate.current())
    }

    /// Called with a fresh view after every store or preferences change.
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&InboxView) + Send + Sync + 'static,
    {
        self.views.add(handler)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.views.remove(id) || self.toasts.remove(id)
    }

    /// Called for each newly pushed notification the preferences allow
    /// to surface.
    pub fn on_toast<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.toasts.add(handler)
    }

    pub fn telemetry(&self) -> Telemetry {
        self.connection.telemetry()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    // ====================================================================
    // Operations
    // ====================================================================

    pub async fn fetch(&self) -> Result<(), SyncError> {
        self.store.fetch().await
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<(), SyncError> {
        self.store.mark_as_read(id).await
    }

    pub async fn mark_all_as_read(&self) -> Result<(), SyncError> {
        self.store.mark_all_as_read().await
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.store.delete_notification(id).await
    }

    pub async fn clear_all(&self) -> Result<(), SyncError> {
        self.store.clear_all_notifications().await
    }

    pub async fn update_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<PreferenceSet, SyncError> {
        self.gate.update(patch).await
    }

    pub async fn refresh_unread_count(&self) -> Result<usize, SyncError> {
        self.store.refresh_unread_count().await
    }
}

impl Drop for InboxSession {
    fn drop(&mut self) {
        let active = self.active().take();
        if let Some(active) = active {
            self.deactivate(active);
        }
    }
}

fn decode_push(payload: &Value) -> Option<Notification> {
    match serde_json::from_value::<Notification>(payload.clone()) {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "malformed new-notification payload dropped");
            None
        }
    }
}
