//! Locates and loads `~/.storefront/inbox.toml`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use storefront_inbox::SyncConfig;

/// Default config file path: ~/.storefront/inbox.toml.
pub fn default_path() -> PathBuf {
    dirs_path().join("inbox.toml")
}

/// Load the config (defaults if the file is missing) and apply the
/// `--server` override. The REST base URL must end up set.
pub fn load(path: &Path, server: Option<&str>) -> anyhow::Result<SyncConfig> {
    let mut config = SyncConfig::load(path)
        .with_context(|| format!("reading {}", path.display()))?;
    if let Some(server) = server {
        config.api.base_url = server.to_string();
    }
    if config.api.base_url.trim().is_empty() {
        anyhow::bail!(
            "No server URL. Set api.base_url in {} or pass --server <url>.",
            path.display()
        );
    }
    Ok(config)
}

/// Return the storefront config directory (~/.storefront).
fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".storefront")
}
