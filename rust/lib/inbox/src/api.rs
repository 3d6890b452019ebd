//! REST side of the engine.
//!
//! [`NotificationApi`] is the seam the store and the preferences gate talk
//! to. [`HttpNotificationApi`] implements it with reqwest against the
//! storefront's `{ success, data, message? }` envelope. Authentication is
//! pluggable through [`TokenSource`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::SyncError;
use crate::model::{
    Envelope, Notification, PageInfo, PageRequest, PreferenceSet, PreferencesPatch, Snapshot,
    UnreadCount,
};

// ── NotificationApi ─────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait NotificationApi: Send + Sync + 'static {
    /// One page of notifications plus the server's unread total.
    async fn fetch(&self, page: PageRequest) -> Result<Snapshot, SyncError>;

    async fn unread_count(&self) -> Result<usize, SyncError>;

    async fn mark_read(&self, id: &str) -> Result<(), SyncError>;

    async fn mark_all_read(&self) -> Result<(), SyncError>;

    async fn delete(&self, id: &str) -> Result<(), SyncError>;

    async fn clear_all(&self) -> Result<(), SyncError>;

    async fn preferences(&self) -> Result<PreferenceSet, SyncError>;

    /// Send a partial update; the server answers with the full set.
    async fn update_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<PreferenceSet, SyncError>;
}

// ── TokenSource ─────────────────────────────────────────────────────

/// Pluggable token provider. Called before every request.
/// `Ok(None)` sends the request without an Authorization header.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + 'static {
    async fn token(&self) -> Result<Option<String>, SyncError>;
}

/// Anonymous requests.
pub struct NoAuth;

#[async_trait::async_trait]
impl TokenSource for NoAuth {
    async fn token(&self) -> Result<Option<String>, SyncError> {
        Ok(None)
    }
}

/// Bearer token obtained elsewhere (the auth collaborator).
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>, SyncError> {
        Ok(Some(self.0.clone()))
    }
}

// ── Envelope decoding ───────────────────────────────────────────────

/// Validate status and envelope; return the parsed body object.
///
/// Non-2xx, or `success: false`, becomes [`SyncError::Rejected`] carrying
/// the server's `message` (or the raw body if it is not an envelope).
fn open_envelope(status: u16, body: &str) -> Result<(Envelope<Value>, Value), SyncError> {
    let ok = (200..300).contains(&status);
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let envelope = parsed
        .clone()
        .and_then(|v| serde_json::from_value::<Envelope<Value>>(v).ok());

    match envelope {
        Some(env) if ok && env.success => {
            let raw = parsed.unwrap_or(Value::Null);
            Ok((env, raw))
        }
        Some(env) => {
            let message = env
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("request failed (HTTP {status})"));
            Err(SyncError::rejected(Some(status), message))
        }
        None if ok => Err(SyncError::Decode(format!(
            "response is not an envelope: {}",
            truncate(body)
        ))),
        None => {
            let message = if body.trim().is_empty() {
                format!("request failed (HTTP {status})")
            } else {
                body.trim().to_string()
            };
            Err(SyncError::rejected(Some(status), message))
        }
    }
}

/// Decode the `data` field of an envelope response.
pub fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, SyncError> {
    let (env, _) = open_envelope(status, body)?;
    let data = env
        .data
        .ok_or_else(|| SyncError::Decode("envelope has no data".into()))?;
    serde_json::from_value(data).map_err(SyncError::from)
}

/// Decode a mutation response; `data` is ignored.
pub fn decode_ack(status: u16, body: &str) -> Result<(), SyncError> {
    open_envelope(status, body).map(|_| ())
}

/// Decode a snapshot response. Accepts both shapes the server uses:
/// `data` as the item array with `unreadCount`/`pagination` beside it, or
/// `data` as an object holding all three.
pub fn decode_snapshot(status: u16, body: &str) -> Result<Snapshot, SyncError> {
    let (env, raw) = open_envelope(status, body)?;
    match env.data {
        Some(Value::Array(items)) => {
            let notifications: Vec<Notification> =
                serde_json::from_value(Value::Array(items))?;
            let unread_count = match raw.get("unreadCount").and_then(Value::as_u64) {
                Some(n) => n as usize,
                None => notifications.iter().filter(|n| n.is_unread()).count(),
            };
            let pagination = match raw.get("pagination") {
                Some(p) => serde_json::from_value::<PageInfo>(p.clone())?,
                None => PageInfo::default(),
            };
            Ok(Snapshot {
                notifications,
                unread_count,
                pagination,
            })
        }
        Some(data @ Value::Object(_)) => Ok(serde_json::from_value(data)?),
        Some(Value::Null) | None => Ok(Snapshot::default()),
        Some(other) => Err(SyncError::Decode(format!(
            "unexpected snapshot data: {}",
            truncate(&other.to_string())
        ))),
    }
}

fn truncate(s: &str) -> String {
    const MAX: usize = 120;
    match s.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

// ── HttpNotificationApi ─────────────────────────────────────────────

/// reqwest client for the `/notifications` resource.
///
/// Paths are `{base_url}/notifications/...`.
pub struct HttpNotificationApi {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<dyn TokenSource>,
}

impl HttpNotificationApi {
    pub fn new(base_url: impl Into<String>, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_source,
        }
    }

    pub fn from_config(
        config: &ApiConfig,
        token_source: Arc<dyn TokenSource>,
    ) -> Result<Self, SyncError> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::Config("api base_url is not set".into()));
        }
        Ok(Self::new(config.base_url.trim(), token_source))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/notifications{}", self.base_url, path)
    }

    async fn authed(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, SyncError> {
        match self.token_source.token().await? {
            Some(token) => Ok(builder.bearer_auth(token)),
            None => Ok(builder),
        }
    }

    /// Send and return `(status, body)`. Only transport failures error here.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<(u16, String), SyncError> {
        let req = self.authed(builder).await?;
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!(status, bytes = body.len(), "notification api response");
        Ok((status, body))
    }
}

#[async_trait::async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch(&self, page: PageRequest) -> Result<Snapshot, SyncError> {
        let req = self
            .http
            .get(self.url(""))
            .query(&[("page", page.page), ("limit", page.limit)]);
        let (status, body) = self.send(req).await?;
        decode_snapshot(status, &body)
    }

    async fn unread_count(&self) -> Result<usize, SyncError> {
        let (status, body) = self.send(self.http.get(self.url("/unread-count"))).await?;
        decode_envelope::<UnreadCount>(status, &body).map(|c| c.unread_count)
    }

    async fn mark_read(&self, id: &str) -> Result<(), SyncError> {
        let req = self.http.patch(self.url(&format!("/{id}/read")));
        let (status, body) = self.send(req).await?;
        decode_ack(status, &body)
    }

    async fn mark_all_read(&self) -> Result<(), SyncError> {
        let (status, body) = self.send(self.http.patch(self.url("/read-all"))).await?;
        decode_ack(status, &body)
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let req = self.http.delete(self.url(&format!("/{id}")));
        let (status, body) = self.send(req).await?;
        decode_ack(status, &body)
    }

    async fn clear_all(&self) -> Result<(), SyncError> {
        let (status, body) = self.send(self.http.delete(self.url(""))).await?;
        decode_ack(status, &body)
    }

    async fn preferences(&self) -> Result<PreferenceSet, SyncError> {
        let (status, body) = self.send(self.http.get(self.url("/preferences"))).await?;
        decode_envelope(status, &body)
    }

    async fn update_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<PreferenceSet, SyncError> {
        let req = self.http.put(self.url("/preferences")).json(patch);
        let (status, body) = self.send(req).await?;
        decode_envelope(status, &body)
    }
}
