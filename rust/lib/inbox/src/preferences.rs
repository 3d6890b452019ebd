use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveTime;
use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::error::SyncError;
use crate::listeners::{ListenerId, Listeners};
use crate::model::{DeliveryFrequency, Notification, PreferenceSet, PreferencesPatch};

/// Holds the user's [`PreferenceSet`] and decides whether a new
/// notification is surfaced (toast). Storage is never gated: the store
/// keeps every notification regardless of what this says.
///
/// Local state changes only to a server-returned set (or the default on
/// load failure). Partial updates are never merged locally.
pub struct PreferencesGate {
    api: Arc<dyn NotificationApi>,
    current: RwLock<PreferenceSet>,
    /// Bumped by `reset`; responses from an older generation are dropped.
    generation: AtomicU64,
    listeners: Listeners<PreferenceSet>,
}

impl PreferencesGate {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        Self {
            api,
            current: RwLock::new(PreferenceSet::default()),
            generation: AtomicU64::new(0),
            listeners: Listeners::new("preferences"),
        }
    }

    pub fn current(&self) -> PreferenceSet {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch the server copy. Falls back to the defaults on failure, so
    /// this never fails; the fetch error is only logged.
    pub async fn load(&self) -> PreferenceSet {
        let generation = self.generation.load(Ordering::SeqCst);
        let prefs = match self.api.preferences().await {
            Ok(p) => {
                debug!("preferences loaded");
                p
            }
            Err(e) => {
                warn!(error = %e, "preferences unavailable; using defaults");
                PreferenceSet::default()
            }
        };
        self.replace(generation, prefs.clone());
        prefs
    }

    /// Send `patch`; on success adopt the server's full set. On failure
    /// local state is untouched and the error is returned.
    pub async fn update(&self, patch: &PreferencesPatch) -> Result<PreferenceSet, SyncError> {
        if patch.is_empty() {
            return Ok(self.current());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        match self.api.update_preferences(patch).await {
            Ok(prefs) => {
                info!("preferences updated");
                self.replace(generation, prefs.clone());
                Ok(prefs)
            }
            Err(e) => {
                warn!(error = %e, "preferences update rejected");
                Err(e)
            }
        }
    }

    /// Whether `n` should trigger a user-visible toast at local time `at`.
    pub fn should_surface(&self, n: &Notification, at: NaiveTime) -> bool {
        surfaces(&self.current.read().unwrap_or_else(PoisonError::into_inner), n, at)
    }

    /// Back to defaults (session end). Loads still in flight are dropped.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = PreferenceSet::default();
        self.listeners.emit(&PreferenceSet::default());
    }

    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&PreferenceSet) + Send + Sync + 'static,
    {
        self.listeners.add(handler)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn replace(&self, generation: u64, prefs: PreferenceSet) {
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("stale preferences response dropped");
                return;
            }
            *current = prefs.clone();
        }
        self.listeners.emit(&prefs);
    }
}

/// In-app delivery on, category on, immediate frequency, outside quiet
/// hours. Digest frequencies never toast.
pub fn surfaces(prefs: &PreferenceSet, n: &Notification, at: NaiveTime) -> bool {
    prefs.delivery.in_app
        && prefs.category_enabled(n.category)
        && prefs.frequency == DeliveryFrequency::Immediate
        && !prefs.quiet_hours.contains(at)
}
