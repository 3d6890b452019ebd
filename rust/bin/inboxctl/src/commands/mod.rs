pub mod notifications;
pub mod prefs;

use std::sync::Arc;

use storefront_inbox::{
    HttpNotificationApi, NoAuth, NotificationApi, StaticToken, SyncConfig, TokenSource,
};

/// Shared state for one command invocation.
pub struct Ctx {
    pub api: Arc<dyn NotificationApi>,
    pub page_size: u32,
    pub json: bool,
}

impl Ctx {
    pub fn new(config: &SyncConfig, token: Option<String>, json: bool) -> anyhow::Result<Self> {
        let token_source: Arc<dyn TokenSource> = match token.filter(|t| !t.is_empty()) {
            Some(t) => Arc::new(StaticToken::new(t)),
            None => Arc::new(NoAuth),
        };
        let api = HttpNotificationApi::from_config(&config.api, token_source)?;
        Ok(Self {
            api: Arc::new(api),
            page_size: config.api.page_size,
            json,
        })
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
