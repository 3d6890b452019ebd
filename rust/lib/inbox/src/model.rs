//! Wire and domain types shared by the store, the REST client and the
//! push channel.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// ── Notification ────────────────────────────────────────────────────

/// Fixed notification category. Immutable once the server creates the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[serde(alias = "order_update")]
    OrderUpdate,
    Payment,
    Support,
    Promotion,
    System,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::OrderUpdate,
        Category::Payment,
        Category::Support,
        Category::Promotion,
        Category::System,
    ];

    /// Wire name, e.g. `order-update`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::OrderUpdate => "order-update",
            Category::Payment => "payment",
            Category::Support => "support",
            Category::Promotion => "promotion",
            Category::System => "system",
        }
    }

    /// Parse a wire name. Accepts both `order-update` and `order_update`.
    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "order-update" => Some(Category::OrderUpdate),
            "payment" => Some(Category::Payment),
            "support" => Some(Category::Support),
            "promotion" => Some(Category::Promotion),
            "system" => Some(Category::System),
            _ => None,
        }
    }
}

/// Reference to the entity a notification is about (an order, a ticket...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub kind: String,
    pub id: String,
}

/// A server-issued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "user")]
    pub user_id: String,
    #[serde(alias = "type")]
    pub category: Category,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity: Option<RelatedEntity>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        !self.read
    }
}

// ── REST envelopes ──────────────────────────────────────────────────

/// Server response envelope: `{ "success": bool, "data": ..., "message": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Page selector for snapshot fetches. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { page: 1, limit }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(20)
    }
}

/// Pagination info reported alongside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub has_more: bool,
}

/// Authoritative server view of the current page plus the unread total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub unread_count: usize,
    #[serde(default)]
    pub pagination: PageInfo,
}

/// Body of `GET /notifications/unread-count`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: usize,
}

// ── Preferences ─────────────────────────────────────────────────────

/// Per-category toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryToggles {
    pub order_updates: bool,
    pub payments: bool,
    pub support: bool,
    pub promotions: bool,
    pub system: bool,
}

impl Default for CategoryToggles {
    fn default() -> Self {
        Self {
            order_updates: true,
            payments: true,
            support: true,
            promotions: true,
            system: true,
        }
    }
}

/// Per-delivery-method toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMethods {
    pub in_app: bool,
    pub email: bool,
    pub push: bool,
}

impl Default for DeliveryMethods {
    fn default() -> Self {
        Self {
            in_app: true,
            email: true,
            push: false,
        }
    }
}

/// Window during which nothing is surfaced. `start`/`end` are local
/// `HH:MM` times; `start > end` wraps midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "22:00".to_string(),
            end: "08:00".to_string(),
        }
    }
}

impl QuietHours {
    /// Whether `at` falls inside the window. A disabled window, or one
    /// with unparseable bounds, never contains anything.
    pub fn contains(&self, at: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        let (Some(start), Some(end)) = (parse_hhmm(&self.start), parse_hhmm(&self.end)) else {
            return false;
        };
        if start <= end {
            start <= at && at < end
        } else {
            at >= start || at < end
        }
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFrequency {
    #[default]
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

impl DeliveryFrequency {
    pub fn parse(s: &str) -> Option<DeliveryFrequency> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Some(DeliveryFrequency::Immediate),
            "hourly" => Some(DeliveryFrequency::Hourly),
            "daily" => Some(DeliveryFrequency::Daily),
            "weekly" => Some(DeliveryFrequency::Weekly),
            _ => None,
        }
    }
}

/// The user's notification preferences. `Default` is the fallback used
/// when the server copy cannot be loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSet {
    #[serde(default)]
    pub categories: CategoryToggles,
    #[serde(default)]
    pub delivery: DeliveryMethods,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    #[serde(default)]
    pub frequency: DeliveryFrequency,
}

impl PreferenceSet {
    pub fn category_enabled(&self, category: Category) -> bool {
        let c = &self.categories;
        match category {
            Category::OrderUpdate => c.order_updates,
            Category::Payment => c.payments,
            Category::Support => c.support,
            Category::Promotion => c.promotions,
            Category::System => c.system,
        }
    }
}

/// Partial preference update. Absent fields are left to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<CategoryTogglesPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryMethodsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<DeliveryFrequency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTogglesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_updates: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payments: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<bool>,
}

impl CategoryTogglesPatch {
    /// Set the toggle for one category.
    pub fn set(&mut self, category: Category, enabled: bool) {
        let slot = match category {
            Category::OrderUpdate => &mut self.order_updates,
            Category::Payment => &mut self.payments,
            Category::Support => &mut self.support,
            Category::Promotion => &mut self.promotions,
            Category::System => &mut self.system,
        };
        *slot = Some(enabled);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMethodsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<bool>,
}

impl PreferencesPatch {
    pub fn is_empty(&self) -> bool {
        self.categories.is_none()
            && self.delivery.is_none()
            && self.quiet_hours.is_none()
            && self.frequency.is_none()
    }
}
