//! Scripted fakes for the REST API and the push channel.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};

use crate::api::NotificationApi;
use crate::channel::{Channel, ChannelEvent, ChannelFactory, ChannelOptions, Transport};
use crate::error::SyncError;
use crate::model::*;

// ── Fixtures ────────────────────────────────────────────────────────

pub fn notification(id: &str, read: bool, category: Category) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: "u1".to_string(),
        category,
        title: format!("title {id}"),
        message: format!("message {id}"),
        read,
        read_at: None,
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        link: None,
        related_entity: None,
    }
}

pub fn unread(id: &str) -> Notification {
    notification(id, false, Category::OrderUpdate)
}

pub fn read(id: &str) -> Notification {
    notification(id, true, Category::OrderUpdate)
}

pub fn snapshot(items: Vec<Notification>) -> Snapshot {
    let unread_count = items.iter().filter(|n| !n.read).count();
    Snapshot {
        notifications: items,
        unread_count,
        pagination: PageInfo::default(),
    }
}

// ── FakeApi ─────────────────────────────────────────────────────────

/// In-memory `NotificationApi`.
///
/// - `fail_once(method, err)` makes the next call of `method` fail.
/// - `hold(method)` parks calls of `method` until `release(method)`.
/// - `calls()` lists every method invoked, in order.
#[derive(Default)]
pub struct FakeApi {
    pub snapshot: Mutex<Snapshot>,
    pub unread: Mutex<usize>,
    pub preferences: Mutex<PreferenceSet>,
    failures: Mutex<HashMap<&'static str, VecDeque<SyncError>>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_snapshot(items: Vec<Notification>) -> Arc<Self> {
        let api = Self::new();
        api.set_snapshot(items);
        api
    }

    pub fn set_snapshot(&self, items: Vec<Notification>) {
        *self.snapshot.lock().unwrap() = snapshot(items);
    }

    pub fn set_unread(&self, n: usize) {
        *self.unread.lock().unwrap() = n;
    }

    pub fn fail_once(&self, method: &'static str, err: SyncError) {
        self.failures
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(err);
    }

    pub fn hold(&self, method: &'static str) {
        self.gates
            .lock()
            .unwrap()
            .insert(method, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, method: &'static str) {
        if let Some(gate) = self.gates.lock().unwrap().get(method) {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == method).count()
    }

    /// Yield until `method` has been invoked `n` times.
    pub async fn wait_for_calls(&self, method: &str, n: usize) {
        while self.call_count(method) < n {
            tokio::task::yield_now().await;
        }
    }

    async fn enter(&self, method: &'static str) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(method.to_string());
        let gate = self.gates.lock().unwrap().get(method).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        match self.failures.lock().unwrap().get_mut(method).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl NotificationApi for FakeApi {
    async fn fetch(&self, _page: PageRequest) -> Result<Snapshot, SyncError> {
        self.enter("fetch").await?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn unread_count(&self) -> Result<usize, SyncError> {
        self.enter("unread_count").await?;
        Ok(*self.unread.lock().unwrap())
    }

    async fn mark_read(&self, _id: &str) -> Result<(), SyncError> {
        self.enter("mark_read").await
    }

    async fn mark_all_read(&self) -> Result<(), SyncError> {
        self.enter("mark_all_read").await
    }

    async fn delete(&self, _id: &str) -> Result<(), SyncError> {
        self.enter("delete").await
    }

    async fn clear_all(&self) -> Result<(), SyncError> {
        self.enter("clear_all").await
    }

    async fn preferences(&self) -> Result<PreferenceSet, SyncError> {
        self.enter("preferences").await?;
        Ok(self.preferences.lock().unwrap().clone())
    }

    async fn update_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<PreferenceSet, SyncError> {
        self.enter("update_preferences").await?;
        let mut prefs = self.preferences.lock().unwrap();
        if let Some(freq) = patch.frequency {
            prefs.frequency = freq;
        }
        if let Some(q) = &patch.quiet_hours {
            prefs.quiet_hours = q.clone();
        }
        if let Some(c) = &patch.categories {
            let t = &mut prefs.categories;
            t.order_updates = c.order_updates.unwrap_or(t.order_updates);
            t.payments = c.payments.unwrap_or(t.payments);
            t.support = c.support.unwrap_or(t.support);
            t.promotions = c.promotions.unwrap_or(t.promotions);
            t.system = c.system.unwrap_or(t.system);
        }
        if let Some(d) = &patch.delivery {
            let m = &mut prefs.delivery;
            m.in_app = d.in_app.unwrap_or(m.in_app);
            m.email = d.email.unwrap_or(m.email);
            m.push = d.push.unwrap_or(m.push);
        }
        Ok(prefs.clone())
    }
}

// ── FakeChannel ─────────────────────────────────────────────────────

pub struct FakeChannel {
    session_id: String,
    transport: Transport,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
    emitted: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
}

impl FakeChannel {
    fn new(session_id: String, transport: Transport) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            session_id,
            transport,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            emitted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Deliver a server event.
    pub fn push(&self, event: &str, payload: Value) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().as_ref() {
            let _ = tx.send(ChannelEvent::Message {
                event: event.to_string(),
                payload,
            });
        }
    }

    /// Simulate the transport dropping.
    pub fn drop_connection(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Channel for FakeChannel {
    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Transport("channel closed".into()));
        }
        self.emitted.lock().unwrap().push((event.to_string(), payload));
        Ok(())
    }

    async fn recv(&self) -> Option<ChannelEvent> {
        self.inbound_rx.lock().await.recv().await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound_tx.lock().unwrap().take();
    }
}

// ── ScriptedFactory ─────────────────────────────────────────────────

/// What the next `open` call does.
pub enum Open {
    Accept,
    Fail(SyncError),
    /// Never resolve; the caller's timeout fires.
    Hang,
}

/// `ChannelFactory` that follows a script. Once the script is exhausted
/// every `open` fails with a transport error.
#[derive(Default)]
pub struct ScriptedFactory {
    script: Mutex<VecDeque<Open>>,
    calls: Mutex<Vec<ChannelOptions>>,
    opened: Mutex<Vec<Arc<FakeChannel>>>,
}

impl ScriptedFactory {
    pub fn new(script: Vec<Open>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn push(&self, step: Open) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> Vec<ChannelOptions> {
        self.calls.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<Arc<FakeChannel>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn last_opened(&self) -> Arc<FakeChannel> {
        self.opened.lock().unwrap().last().cloned().expect("no channel opened")
    }
}

#[async_trait::async_trait]
impl ChannelFactory for ScriptedFactory {
    async fn open(&self, options: &ChannelOptions) -> Result<Arc<dyn Channel>, SyncError> {
        let step = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(options.clone());
            self.script.lock().unwrap().pop_front()
        };
        match step {
            Some(Open::Accept) => {
                let mut opened = self.opened.lock().unwrap();
                let session_id = format!("sess-{}", opened.len() + 1);
                let channel = FakeChannel::new(session_id, options.transport);
                opened.push(Arc::clone(&channel));
                Ok(channel as Arc<dyn Channel>)
            }
            Some(Open::Fail(err)) => Err(err),
            Some(Open::Hang) => std::future::pending().await,
            None => Err(SyncError::Transport("connection refused".into())),
        }
    }
}
