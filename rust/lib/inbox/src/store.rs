//! NotificationStore: the single writer of [`InboxState`].
//!
//! Three inputs are reconciled here:
//!
//! - REST snapshots (`fetch`), which replace everything;
//! - push events (`handle_push`), deduplicated by id and prepended;
//! - optimistic user mutations, applied immediately and then confirmed or
//!   rolled back when the server answers.
//!
//! The state lock is never held across an `.await`; each network call is
//! bracketed by a synchronous apply and a synchronous settle. Subscribers
//! see every intermediate state, including the optimistic one, in the
//! order the changes were made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::error::SyncError;
use crate::listeners::{ListenerId, Listeners};
use crate::model::{Notification, PageRequest};
use crate::transition::{self, InboxState, Mutation, Outcome, Pending};

pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    page: RwLock<PageRequest>,
    state: RwLock<InboxState>,
    listeners: Listeners<InboxState>,
    /// States waiting for delivery, queued under the state lock.
    outbox: Mutex<VecDeque<InboxState>>,
    delivering: AtomicBool,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self::with_page(api, PageRequest::default())
    }

    pub fn with_page(api: Arc<dyn NotificationApi>, page: PageRequest) -> Self {
        Self {
            api,
            page: RwLock::new(page),
            state: RwLock::new(InboxState::default()),
            listeners: Listeners::new("store"),
            outbox: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
        }
    }

    // ====================================================================
    // Read side
    // ====================================================================

    pub fn state(&self) -> InboxState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Called with the full state after every change.
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&InboxState) + Send + Sync + 'static,
    {
        self.listeners.add(handler)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    // ====================================================================
    // Snapshot
    // ====================================================================

    /// Fetch the configured page and replace local state with it.
    pub async fn fetch(&self) -> Result<(), SyncError> {
        let page = *self.page.read().unwrap_or_else(PoisonError::into_inner);
        self.fetch_page(page).await
    }

    /// Fetch `page` and replace local state with it. The page becomes the
    /// one used by later `fetch()` calls.
    ///
    /// Only the most recent request lands. A response overtaken by a newer
    /// request (or by `reset`) is dropped and reported as
    /// [`SyncError::Superseded`].
    pub async fn fetch_page(&self, page: PageRequest) -> Result<(), SyncError> {
        *self.page.write().unwrap_or_else(PoisonError::into_inner) = page;
        let seq = self.mutate(|s| {
            s.loading = true;
            s.error = None;
            s.fetch_seq += 1;
            s.fetch_seq
        });

        let result = self.api.fetch(page).await;

        let landed = self.mutate(|s| {
            if s.fetch_seq != seq {
                debug!(seq, latest = s.fetch_seq, "superseded snapshot dropped");
                return false;
            }
            match &result {
                Ok(snapshot) => {
                    debug!(
                        items = snapshot.notifications.len(),
                        total_unread = snapshot.unread_count,
                        "snapshot applied"
                    );
                    transition::replace(s, snapshot.clone());
                }
                Err(e) => {
                    warn!(error = %e, "snapshot fetch failed");
                    s.loading = false;
                    s.error = Some(e.user_message());
                }
            }
            true
        });
        match result {
            Ok(_) if !landed => Err(SyncError::Superseded),
            other => other.map(|_| ()),
        }
    }

    // ====================================================================
    // Push
    // ====================================================================

    /// Ingest a pushed notification. Returns false if the id was already
    /// present (nothing changes).
    pub fn handle_push(&self, n: Notification) -> bool {
        let id = n.id.clone();
        let added = self.mutate(|s| transition::push(s, n));
        if added {
            debug!(%id, "push notification stored");
        } else {
            debug!(%id, "duplicate push ignored");
        }
        added
    }

    // ====================================================================
    // Optimistic mutations
    // ====================================================================

    pub async fn mark_as_read(&self, id: &str) -> Result<(), SyncError> {
        self.run(Mutation::MarkRead(id.to_string()), self.api.mark_read(id))
            .await
    }

    pub async fn mark_all_as_read(&self) -> Result<(), SyncError> {
        self.run(Mutation::MarkAllRead, self.api.mark_all_read()).await
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), SyncError> {
        self.run(Mutation::Delete(id.to_string()), self.api.delete(id))
            .await
    }

    pub async fn clear_all_notifications(&self) -> Result<(), SyncError> {
        self.run(Mutation::ClearAll, self.api.clear_all()).await
    }

    /// Apply `mutation` locally, await the server, then confirm or roll
    /// back. The remote call is made even if nothing changed locally; the
    /// server may hold the item on another page.
    async fn run<F>(&self, mutation: Mutation, call: F) -> Result<(), SyncError>
    where
        F: std::future::Future<Output = Result<(), SyncError>>,
    {
        let pending = self.mutate(|s| {
            s.error = None;
            transition::apply(s, &mutation)
        });
        debug!(?mutation, optimistic = pending.is_some(), "mutation applied");

        let result = call.await;
        let outcome = Outcome::of(&result);

        match &result {
            Ok(()) => debug!(?mutation, "mutation confirmed"),
            Err(e) => warn!(?mutation, error = %e, "mutation failed; rolling back"),
        }
        self.mutate(|s| {
            if outcome == Outcome::Confirmed {
                transition::confirm(s, &mutation);
            }
            settle(s, &mutation, pending, &outcome);
        });
        result
    }

    // ====================================================================
    // Counter reconciliation
    // ====================================================================

    /// Overwrite the badge total with the server's count. Failures are
    /// logged and returned but do not touch the error slot.
    pub async fn refresh_unread_count(&self) -> Result<usize, SyncError> {
        let total = self.api.unread_count().await?;
        self.mutate(|s| {
            if s.total_unread != total {
                debug!(local = s.total_unread, server = total, "unread total corrected");
            }
            transition::set_total_unread(s, total);
        });
        Ok(total)
    }

    /// Drop everything (session end). In-flight calls that complete later
    /// are ignored.
    pub fn reset(&self) {
        self.mutate(transition::reset);
        info!("notification store reset");
    }

    /// Run `f` under the write lock, then notify subscribers outside it.
    fn mutate<R>(&self, f: impl FnOnce(&mut InboxState) -> R) -> R {
        let result = {
            let mut state = self.write();
            let result = f(&mut state);
            self.outbox().push_back(state.clone());
            result
        };
        self.deliver();
        result
    }

    /// Drain the outbox in order. One caller delivers at a time; anyone
    /// arriving meanwhile (another thread, or a subscriber that mutates)
    /// leaves its state for the active deliverer.
    fn deliver(&self) {
        loop {
            if self.delivering.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                let next = self.outbox().pop_front();
                let Some(state) = next else { break };
                self.listeners.emit(&state);
            }
            self.delivering.store(false, Ordering::Release);
            if self.outbox().is_empty() {
                return;
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, InboxState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbox(&self) -> MutexGuard<'_, VecDeque<InboxState>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settle one mutation whose server call has answered.
fn settle(s: &mut InboxState, mutation: &Mutation, pending: Option<Pending>, outcome: &Outcome) {
    match pending {
        Some(p) => {
            if !transition::settle(s, p, outcome) && matches!(outcome, Outcome::RolledBack { .. }) {
                debug!(?mutation, "rollback superseded by newer state");
            }
        }
        None => {
            if let Outcome::RolledBack { reason } = outcome {
                s.error = Some(reason.clone());
            }
        }
    }
}

impl std::fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStore")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FakeApi, read, unread};
    use std::sync::Mutex;

    fn store(api: &Arc<FakeApi>) -> Arc<NotificationStore> {
        Arc::new(NotificationStore::new(api.clone()))
    }

    fn ids(s: &InboxState) -> Vec<String> {
        s.notifications.iter().map(|n| n.id.clone()).collect()
    }

    fn assert_invariant(s: &InboxState) {
        assert_eq!(
            s.unread_count,
            s.notifications.iter().filter(|n| !n.read).count(),
            "unread_count out of sync: {s:?}"
        );
    }

    // ====================================================================
    // Snapshot
    // ====================================================================

    #[tokio::test]
    async fn fetch_replaces_local_state() {
        let api = FakeApi::with_snapshot(vec![unread("a"), read("b"), unread("c")]);
        let s = store(&api);
        s.fetch().await.unwrap();
        assert_eq!(ids(&s.state()), vec!["a", "b", "c"]);

        api.set_snapshot(vec![read("p"), unread("q"), read("r"), unread("s"), read("t")]);
        s.fetch().await.unwrap();

        let state = s.state();
        assert_eq!(ids(&state), vec!["p", "q", "r", "s", "t"]);
        assert_eq!(state.unread_count, 2);
        assert_eq!(state.total_unread, 2);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn fetch_failure_records_error_and_keeps_state() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        let s = store(&api);
        s.fetch().await.unwrap();

        api.fail_once("fetch", SyncError::rejected(Some(500), "Server exploded"));
        assert!(s.fetch().await.is_err());

        let state = s.state();
        assert_eq!(ids(&state), vec!["a"]);
        assert_eq!(state.error.as_deref(), Some("Server exploded"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn loading_is_visible_while_fetch_is_in_flight() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        api.hold("fetch");
        let s = store(&api);

        let task = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 1).await;
        assert!(s.state().loading);

        api.release("fetch");
        task.await.unwrap().unwrap();
        assert!(!s.state().loading);
    }

    #[tokio::test]
    async fn snapshot_supersedes_push_received_during_fetch() {
        let api = FakeApi::with_snapshot(vec![unread("s1"), unread("s2")]);
        api.hold("fetch");
        let s = store(&api);

        let task = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 1).await;
        s.handle_push(unread("p1"));

        api.release("fetch");
        task.await.unwrap().unwrap();
        assert_eq!(ids(&s.state()), vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn snapshot_landing_after_reset_is_dropped() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        api.hold("fetch");
        let s = store(&api);

        let task = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 1).await;
        s.reset();

        api.release("fetch");
        assert_eq!(task.await.unwrap(), Err(SyncError::Superseded));
        assert!(s.state().notifications.is_empty());
    }

    #[tokio::test]
    async fn latest_of_overlapping_fetches_wins() {
        let api = FakeApi::with_snapshot(vec![unread("old")]);
        api.hold("fetch");
        let s = store(&api);

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 1).await;
        let second = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 2).await;

        // The older request answers first and is dropped.
        api.release("fetch");
        assert_eq!(first.await.unwrap(), Err(SyncError::Superseded));
        let mid = s.state();
        assert!(mid.notifications.is_empty());
        assert!(mid.loading);

        api.set_snapshot(vec![unread("new1"), read("new2")]);
        api.release("fetch");
        second.await.unwrap().unwrap();

        let state = s.state();
        assert_eq!(ids(&state), vec!["new1", "new2"]);
        assert_eq!(state.unread_count, 1);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn newer_fetch_failure_is_not_masked_by_older_success() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        api.hold("fetch");
        let s = store(&api);

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 1).await;
        let second = tokio::spawn({
            let s = s.clone();
            async move { s.fetch().await }
        });
        api.wait_for_calls("fetch", 2).await;

        api.release("fetch");
        assert_eq!(first.await.unwrap(), Err(SyncError::Superseded));
        api.fail_once("fetch", SyncError::rejected(Some(503), "maintenance"));
        api.release("fetch");
        assert!(second.await.unwrap().is_err());

        let state = s.state();
        assert!(state.notifications.is_empty());
        assert_eq!(state.error.as_deref(), Some("maintenance"));
        assert!(!state.loading);
    }

    // ====================================================================
    // Push
    // ====================================================================

    #[tokio::test]
    async fn push_is_idempotent() {
        let api = FakeApi::new();
        let s = store(&api);

        assert!(s.handle_push(unread("n1")));
        let once = s.state();
        assert!(!s.handle_push(unread("n1")));
        assert_eq!(s.state(), once);
        assert_eq!(once.unread_count, 1);
    }

    #[tokio::test]
    async fn pushes_are_prepended_in_arrival_order() {
        let api = FakeApi::new();
        let s = store(&api);
        s.handle_push(unread("a"));
        s.handle_push(read("b"));
        s.handle_push(unread("c"));
        let state = s.state();
        assert_eq!(ids(&state), vec!["c", "b", "a"]);
        assert_eq!(state.unread_count, 2);
    }

    // ====================================================================
    // Optimistic mutations
    // ====================================================================

    #[tokio::test]
    async fn mark_as_read_rollback_restores_flag_and_counter() {
        let api = FakeApi::with_snapshot(vec![unread("a"), read("b"), unread("c")]);
        let s = store(&api);
        s.fetch().await.unwrap();
        let before = s.state();

        api.fail_once("mark_read", SyncError::rejected(Some(500), "try later"));
        let err = s.mark_as_read("a").await.unwrap_err();
        assert_eq!(err.to_string(), "try later");

        let after = s.state();
        assert_eq!(after.notifications, before.notifications);
        assert_eq!(after.unread_count, before.unread_count);
        assert_eq!(after.error.as_deref(), Some("try later"));
    }

    #[tokio::test]
    async fn optimistic_state_is_observable_before_confirmation() {
        let api = FakeApi::with_snapshot(vec![unread("a"), unread("b")]);
        api.hold("mark_read");
        let s = store(&api);
        s.fetch().await.unwrap();

        let task = tokio::spawn({
            let s = s.clone();
            async move { s.mark_as_read("a").await }
        });
        api.wait_for_calls("mark_read", 1).await;
        let mid = s.state();
        assert!(mid.get("a").unwrap().read);
        assert_eq!(mid.unread_count, 1);

        api.release("mark_read");
        task.await.unwrap().unwrap();
        assert_eq!(s.state().unread_count, 1);
        assert!(s.get("a").unwrap().read);
    }

    #[tokio::test]
    async fn mark_all_failure_restores_previous_flags() {
        let api = FakeApi::with_snapshot(vec![unread("a"), read("b"), unread("c")]);
        let s = store(&api);
        s.fetch().await.unwrap();

        api.fail_once("mark_all_read", SyncError::Unreachable("dns".into()));
        assert!(s.mark_all_as_read().await.is_err());

        let state = s.state();
        assert_eq!(state.unread_count, 2);
        assert!(!state.notifications[0].read);
        assert!(state.notifications[1].read);
        assert_eq!(
            state.error.as_deref(),
            Some(crate::error::UNREACHABLE_MESSAGE)
        );
    }

    #[tokio::test]
    async fn clear_all_confirmed_then_failed() {
        let api = FakeApi::with_snapshot(vec![unread("a"), read("b")]);
        let s = store(&api);
        s.fetch().await.unwrap();

        api.fail_once("clear_all", SyncError::rejected(Some(403), "forbidden"));
        assert!(s.clear_all_notifications().await.is_err());
        assert_eq!(ids(&s.state()), vec!["a", "b"]);
        assert_eq!(s.state().unread_count, 1);

        s.clear_all_notifications().await.unwrap();
        let state = s.state();
        assert!(state.notifications.is_empty());
        assert_eq!((state.unread_count, state.total_unread), (0, 0));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn failure_on_unknown_id_still_reports_error() {
        let api = FakeApi::new();
        let s = store(&api);
        api.fail_once("delete", SyncError::rejected(Some(404), "not found"));
        assert!(s.delete_notification("ghost").await.is_err());
        assert_eq!(s.state().error.as_deref(), Some("not found"));
        assert_eq!(api.call_count("delete"), 1);
    }

    #[tokio::test]
    async fn new_operation_clears_previous_error() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        let s = store(&api);
        s.fetch().await.unwrap();
        api.fail_once("mark_read", SyncError::rejected(None, "nope"));
        let _ = s.mark_as_read("a").await;
        assert!(s.state().error.is_some());

        s.mark_as_read("a").await.unwrap();
        assert!(s.state().error.is_none());
    }

    #[tokio::test]
    async fn interleaved_operations_keep_invariant() {
        let api = FakeApi::with_snapshot(vec![unread("a"), unread("b"), read("c"), unread("d")]);
        api.hold("delete");
        api.hold("mark_read");
        let s = store(&api);
        s.fetch().await.unwrap();

        let violations = Arc::new(Mutex::new(Vec::new()));
        let v = violations.clone();
        s.subscribe(move |state| {
            if state.unread_count != state.notifications.iter().filter(|n| !n.read).count() {
                v.lock().unwrap().push(state.clone());
            }
        });

        api.fail_once("delete", SyncError::rejected(Some(404), "gone"));
        let del = tokio::spawn({
            let s = s.clone();
            async move { s.delete_notification("b").await }
        });
        let mark = tokio::spawn({
            let s = s.clone();
            async move { s.mark_as_read("d").await }
        });
        api.wait_for_calls("delete", 1).await;
        api.wait_for_calls("mark_read", 1).await;

        s.handle_push(unread("e"));
        api.set_unread(9);
        s.refresh_unread_count().await.unwrap();

        api.release("mark_read");
        mark.await.unwrap().unwrap();
        api.release("delete");
        assert!(del.await.unwrap().is_err());

        let state = s.state();
        assert_eq!(ids(&state), vec!["e", "a", "b", "c", "d"]);
        assert_eq!(state.unread_count, 3);
        // The server's total was written after both optimistic changes.
        assert_eq!(state.total_unread, 9);
        assert_invariant(&state);
        assert!(violations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_mark_read_does_not_undo_confirmed_mark_all() {
        let api = FakeApi::with_snapshot(vec![unread("a"), unread("b")]);
        api.hold("mark_read");
        api.fail_once("mark_read", SyncError::rejected(Some(500), "try later"));
        let s = store(&api);
        s.fetch().await.unwrap();

        let mark = tokio::spawn({
            let s = s.clone();
            async move { s.mark_as_read("a").await }
        });
        api.wait_for_calls("mark_read", 1).await;
        s.mark_all_as_read().await.unwrap();

        api.release("mark_read");
        assert!(mark.await.unwrap().is_err());

        let state = s.state();
        assert!(state.get("a").unwrap().read);
        assert!(state.get("b").unwrap().read);
        assert_eq!((state.unread_count, state.total_unread), (0, 0));
        assert_invariant(&state);
    }

    #[tokio::test]
    async fn failed_mark_all_keeps_ids_confirmed_read_meanwhile() {
        let api = FakeApi::with_snapshot(vec![unread("a"), unread("b")]);
        api.hold("mark_all_read");
        api.fail_once("mark_all_read", SyncError::Unreachable("reset".into()));
        let s = store(&api);
        s.fetch().await.unwrap();

        let all = tokio::spawn({
            let s = s.clone();
            async move { s.mark_all_as_read().await }
        });
        api.wait_for_calls("mark_all_read", 1).await;
        s.mark_as_read("a").await.unwrap();
        api.set_unread(1);
        s.refresh_unread_count().await.unwrap();

        api.release("mark_all_read");
        assert!(all.await.unwrap().is_err());

        let state = s.state();
        assert!(state.get("a").unwrap().read);
        assert!(!state.get("b").unwrap().read);
        assert_eq!(state.unread_count, 1);
        // The poll landed after the optimistic change; its value stands.
        assert_eq!(state.total_unread, 1);
        assert_invariant(&state);
    }

    // ====================================================================
    // Counter / lifecycle
    // ====================================================================

    #[tokio::test]
    async fn refresh_overwrites_total_without_touching_items() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        let s = store(&api);
        s.fetch().await.unwrap();

        api.set_unread(42);
        assert_eq!(s.refresh_unread_count().await.unwrap(), 42);
        let state = s.state();
        assert_eq!(state.total_unread, 42);
        assert_eq!(state.unread_count, 1);

        api.fail_once("unread_count", SyncError::Unreachable("down".into()));
        assert!(s.refresh_unread_count().await.is_err());
        assert_eq!(s.state().total_unread, 42);
        assert!(s.state().error.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_every_change_until_unsubscribed() {
        let api = FakeApi::new();
        let s = store(&api);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let c = seen.clone();
        let id = s.subscribe(move |state| c.lock().unwrap().push(state.unread_count));

        s.handle_push(unread("a"));
        s.handle_push(unread("b"));
        assert!(s.unsubscribe(id));
        s.handle_push(unread("c"));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn changes_made_by_subscribers_are_delivered_after_the_current_one() {
        let api = FakeApi::new();
        let s = store(&api);
        let seen = Arc::new(Mutex::new(Vec::<Vec<String>>::new()));
        let weak = Arc::downgrade(&s);
        let c = seen.clone();
        s.subscribe(move |state| {
            let current = ids(state);
            c.lock().unwrap().push(current.clone());
            // A push landing while subscribers are still being notified.
            if current == ["a"] {
                if let Some(s) = weak.upgrade() {
                    s.handle_push(unread("b"));
                }
            }
        });

        s.handle_push(unread("a"));

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![vec!["a"], vec!["b", "a"]]);
        assert_eq!(seen.last(), Some(&ids(&s.state())));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let api = FakeApi::with_snapshot(vec![unread("a")]);
        let s = store(&api);
        s.fetch().await.unwrap();
        s.reset();
        let state = s.state();
        assert!(state.notifications.is_empty());
        assert_eq!((state.unread_count, state.total_unread), (0, 0));
        assert!(s.get("a").is_none());
    }
}
