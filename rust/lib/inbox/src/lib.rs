//! Storefront notification inbox: real-time sync engine.
//!
//! Keeps a client-side notification list and unread counter consistent
//! across four inputs:
//!
//! - REST snapshots ([`NotificationStore::fetch`]);
//! - a persistent push channel ([`ConnectionManager`]);
//! - a periodic unread-count poll ([`PollingFallback`]);
//! - optimistic local mutations, confirmed or rolled back by the server.
//!
//! [`InboxSession`] wires them together behind a single
//! `set_user(Option<String>)` switch.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use storefront_inbox::{HttpNotificationApi, InboxSession, StaticToken, SyncConfig};
//!
//! let config = SyncConfig::load(path)?;
//! let api = HttpNotificationApi::from_config(&config.api, Arc::new(StaticToken::new(jwt)))?;
//! let session = InboxSession::new(config, Arc::new(api), channel_factory);
//! session.set_user(Some(user_id)).await?;
//! println!("{} unread", session.view().unread_count);
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod listeners;
pub mod model;
pub mod poller;
pub mod preferences;
pub mod session;
pub mod store;
pub mod transition;

#[cfg(test)]
mod testkit;

pub use api::{HttpNotificationApi, NoAuth, NotificationApi, StaticToken, TokenSource};
pub use channel::{Channel, ChannelEvent, ChannelFactory, ChannelOptions, Transport};
pub use config::{ApiConfig, ConnectionConfig, PollingConfig, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, Telemetry};
pub use error::SyncError;
pub use listeners::{ListenerId, Listeners};
pub use model::{Category, Notification, PreferenceSet, PreferencesPatch};
pub use poller::PollingFallback;
pub use preferences::PreferencesGate;
pub use session::{InboxSession, InboxView};
pub use store::NotificationStore;
pub use transition::{InboxState, Outcome};
