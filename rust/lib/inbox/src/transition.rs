//! Pure state transitions for the inbox.
//!
//! Every user mutation goes through [`apply`] (optimistic change, returns
//! the undo record) and later [`settle`] (confirm or guarded rollback).
//! Snapshots, pushes and counter refreshes have their own transitions.
//! All of them end with [`InboxState::recount`], so
//! `unread_count == count(!read)` holds after every call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncError;
use crate::model::{Notification, Snapshot};

/// The store's aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxState {
    /// Newest first.
    pub notifications: Vec<Notification>,
    /// Unread items in `notifications`. Always derived.
    pub unread_count: usize,
    /// Server-reported unread total across all pages (badge count).
    pub total_unread: usize,
    pub loading: bool,
    pub error: Option<String>,
    /// Bumped by every snapshot and reset.
    #[serde(skip)]
    pub epoch: u64,
    /// Bumped whenever `total_unread` is overwritten by the server.
    #[serde(skip)]
    pub counter_epoch: u64,
    /// Bumped when a snapshot request starts and by reset. Only the latest
    /// request may land.
    #[serde(skip)]
    pub fetch_seq: u64,
    #[serde(skip)]
    pub confirmed: Confirmations,
}

impl InboxState {
    pub fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.read).count();
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.notifications.iter().position(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }
}

/// Mutations the server has confirmed, stamped in confirmation order.
///
/// An in-flight rollback compares these stamps with the sequence it saw at
/// `apply` time and leaves alone anything a later confirmation covers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Confirmations {
    seq: u64,
    all_read: u64,
    cleared: u64,
    read: HashMap<String, u64>,
    deleted: HashMap<String, u64>,
}

impl Confirmations {
    fn record(&mut self, mutation: &Mutation) {
        self.seq += 1;
        let seq = self.seq;
        match mutation {
            Mutation::MarkRead(id) => {
                self.read.insert(id.clone(), seq);
            }
            Mutation::MarkAllRead => self.all_read = seq,
            Mutation::Delete(id) => {
                self.deleted.insert(id.clone(), seq);
            }
            Mutation::ClearAll => self.cleared = seq,
        }
    }

    /// The server confirmed `id` as read after `since`.
    fn read_since(&self, id: &str, since: u64) -> bool {
        self.all_read > since || self.read.get(id).is_some_and(|&at| at > since)
    }

    /// The server confirmed `id` as deleted after `since`.
    fn deleted_since(&self, id: &str, since: u64) -> bool {
        self.cleared > since || self.deleted.get(id).is_some_and(|&at| at > since)
    }

    /// Per-id stamps refer to items a snapshot just replaced.
    fn forget(&mut self) {
        self.read.clear();
        self.deleted.clear();
    }
}

// ── Mutations ───────────────────────────────────────────────────────

/// A user-initiated change that needs server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    MarkRead(String),
    MarkAllRead,
    Delete(String),
    ClearAll,
}

/// Result of one optimistic operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Applied locally; the server has not answered yet.
    Applied,
    Confirmed,
    RolledBack { reason: String },
}

impl Outcome {
    pub fn of(result: &Result<(), SyncError>) -> Self {
        match result {
            Ok(()) => Outcome::Confirmed,
            Err(e) => Outcome::RolledBack {
                reason: e.user_message(),
            },
        }
    }
}

/// Undo record for an in-flight mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    epoch: u64,
    counter_epoch: u64,
    /// `Confirmations::seq` at apply time.
    seq: u64,
    /// Amount removed from `total_unread` by the optimistic change.
    total_delta: usize,
    undo: Undo,
}

#[derive(Debug, Clone, PartialEq)]
enum Undo {
    MarkRead {
        id: String,
        read_at: Option<DateTime<Utc>>,
    },
    MarkAllRead {
        flipped: Vec<(String, Option<DateTime<Utc>>)>,
    },
    Delete {
        index: usize,
        /// Neighbours at removal time, used to find the slot again.
        next: Option<String>,
        prev: Option<String>,
        item: Notification,
    },
    ClearAll {
        items: Vec<Notification>,
    },
}

/// Optimistically apply `mutation`. Returns `None` when nothing changed
/// locally (unknown id, already read).
pub fn apply(state: &mut InboxState, mutation: &Mutation) -> Option<Pending> {
    let before_total = state.total_unread;
    let undo = match mutation {
        Mutation::MarkRead(id) => {
            let n = state.notifications.iter_mut().find(|n| n.id == *id)?;
            if n.read {
                return None;
            }
            let read_at = n.read_at.replace(Utc::now());
            n.read = true;
            state.total_unread = state.total_unread.saturating_sub(1);
            Undo::MarkRead {
                id: id.clone(),
                read_at,
            }
        }
        Mutation::MarkAllRead => {
            let now = Utc::now();
            let flipped = state
                .notifications
                .iter_mut()
                .filter(|n| !n.read)
                .map(|n| {
                    n.read = true;
                    (n.id.clone(), n.read_at.replace(now))
                })
                .collect();
            state.total_unread = 0;
            Undo::MarkAllRead { flipped }
        }
        Mutation::Delete(id) => {
            let index = state.position(id)?;
            let prev = index
                .checked_sub(1)
                .map(|i| state.notifications[i].id.clone());
            let next = state.notifications.get(index + 1).map(|n| n.id.clone());
            let item = state.notifications.remove(index);
            if !item.read {
                state.total_unread = state.total_unread.saturating_sub(1);
            }
            Undo::Delete {
                index,
                next,
                prev,
                item,
            }
        }
        Mutation::ClearAll => {
            state.total_unread = 0;
            Undo::ClearAll {
                items: std::mem::take(&mut state.notifications),
            }
        }
    };
    state.recount();
    Some(Pending {
        epoch: state.epoch,
        counter_epoch: state.counter_epoch,
        seq: state.confirmed.seq,
        total_delta: before_total - state.total_unread,
        undo,
    })
}

/// Resolve an in-flight mutation. Returns true if a rollback was applied.
///
/// A rollback is skipped when a snapshot or reset landed since `apply`
/// (the pre-state it would restore no longer exists). Parts of it that a
/// later confirmed mutation covers are skipped too, so a failed mark-read
/// never resurrects an item a confirmed mark-all-read already settled. The
/// badge total is only restored if the server has not overwritten it in
/// the meantime.
pub fn settle(state: &mut InboxState, pending: Pending, outcome: &Outcome) -> bool {
    let reason = match outcome {
        Outcome::Applied | Outcome::Confirmed => return false,
        Outcome::RolledBack { reason } => reason,
    };
    state.error = Some(reason.clone());
    if pending.epoch != state.epoch {
        return false;
    }

    let since = pending.seq;
    let mut restore = pending.total_delta;
    match pending.undo {
        Undo::MarkRead { id, read_at } => {
            if state.confirmed.read_since(&id, since) {
                restore = 0;
            } else if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id && n.read) {
                n.read = false;
                n.read_at = read_at;
            }
        }
        Undo::MarkAllRead { flipped } => {
            if state.confirmed.all_read > since {
                restore = 0;
            } else {
                for (id, read_at) in flipped {
                    if state.confirmed.read_since(&id, since) {
                        restore = restore.saturating_sub(1);
                        continue;
                    }
                    if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id && n.read) {
                        n.read = false;
                        n.read_at = read_at;
                    }
                }
            }
        }
        Undo::Delete {
            index,
            next,
            prev,
            item,
        } => {
            if state.confirmed.deleted_since(&item.id, since) {
                restore = 0;
            } else if !state.contains(&item.id) {
                let slot = next
                    .and_then(|id| state.position(&id))
                    .or_else(|| prev.and_then(|id| state.position(&id)).map(|i| i + 1))
                    .unwrap_or(index.min(state.notifications.len()));
                state.notifications.insert(slot, item);
            }
        }
        Undo::ClearAll { items } => {
            if state.confirmed.cleared > since {
                restore = 0;
            } else {
                let mut restored = Vec::with_capacity(items.len());
                for n in items {
                    if state.contains(&n.id) {
                        continue;
                    }
                    if state.confirmed.deleted_since(&n.id, since) {
                        if !n.read {
                            restore = restore.saturating_sub(1);
                        }
                        continue;
                    }
                    restored.push(n);
                }
                state.notifications.extend(restored);
            }
        }
    }

    if pending.counter_epoch == state.counter_epoch {
        state.total_unread += restore;
    }
    state.recount();
    true
}

/// Record that the server accepted `mutation`. Called for every confirmed
/// call, including ones that changed nothing locally.
pub fn confirm(state: &mut InboxState, mutation: &Mutation) {
    state.confirmed.record(mutation);
}

// ── Server-driven transitions ───────────────────────────────────────

/// Replace everything with a server snapshot. Duplicate ids in the
/// snapshot keep their first occurrence.
pub fn replace(state: &mut InboxState, snapshot: Snapshot) {
    let mut items: Vec<Notification> = Vec::with_capacity(snapshot.notifications.len());
    for n in snapshot.notifications {
        if !items.iter().any(|m| m.id == n.id) {
            items.push(n);
        }
    }
    state.notifications = items;
    state.total_unread = snapshot.unread_count;
    state.loading = false;
    state.error = None;
    state.epoch += 1;
    state.counter_epoch += 1;
    state.confirmed.forget();
    state.recount();
}

/// Prepend a pushed notification. Returns false (and changes nothing) if
/// the id is already present.
pub fn push(state: &mut InboxState, n: Notification) -> bool {
    if state.contains(&n.id) {
        return false;
    }
    if !n.read {
        state.total_unread += 1;
    }
    state.notifications.insert(0, n);
    state.recount();
    true
}

/// Overwrite the badge total with the server's value.
pub fn set_total_unread(state: &mut InboxState, total: usize) {
    state.total_unread = total;
    state.counter_epoch += 1;
}

/// Back to empty. Epochs keep counting so stale completions are ignored.
pub fn reset(state: &mut InboxState) {
    *state = InboxState {
        epoch: state.epoch + 1,
        counter_epoch: state.counter_epoch + 1,
        fetch_seq: state.fetch_seq + 1,
        ..Default::default()
    };
}
