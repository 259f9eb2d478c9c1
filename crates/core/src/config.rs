//! Config file parsing for `~/.config/folio/config.toml`.
//!
//! Use `session_options_from_config` to build session options from the loaded
//! config so security and rendering settings apply.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::rewrite::RenderOptions;
use crate::security::SecurityLimits;
use crate::session::SessionOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_file_size_mb: Option<u64>,
    pub max_resource_size_mb: Option<u64>,
    pub max_compression_ratio: Option<u64>,
    pub max_file_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub inline_images: Option<bool>,
    pub keep_head_styles: Option<bool>,
}

/// Load config from the default path (`~/.config/folio/config.toml`).
/// A missing or unreadable file yields the defaults.
pub fn load_config() -> FolioConfig {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => FolioConfig::default(),
    }
}

/// Load config from an explicit path, falling back to defaults.
pub fn load_config_from(path: &Path) -> FolioConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return FolioConfig::default(),
    };

    match toml::from_str::<FolioConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
            FolioConfig::default()
        }
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("folio");
        p.push("config.toml");
        p
    })
}

/// Build security limits from config. Uses defaults for any unset values.
pub fn security_limits_from_config(c: &SecurityConfig) -> SecurityLimits {
    let mut limits = SecurityLimits::default();
    if let Some(mb) = c.max_file_size_mb {
        limits.max_total_size_bytes = mb.saturating_mul(1024).saturating_mul(1024);
    }
    if let Some(mb) = c.max_resource_size_mb {
        limits.max_resource_size_bytes = mb.saturating_mul(1024).saturating_mul(1024);
    }
    if let Some(r) = c.max_compression_ratio {
        limits.max_compression_ratio = r;
    }
    if let Some(n) = c.max_file_count {
        limits.max_file_count = n;
    }
    limits
}

pub fn render_options_from_config(c: &RenderConfig) -> RenderOptions {
    let defaults = RenderOptions::default();
    RenderOptions {
        inline_images: c.inline_images.unwrap_or(defaults.inline_images),
        keep_head_styles: c.keep_head_styles.unwrap_or(defaults.keep_head_styles),
    }
}

/// Build session options from the full config (security + render).
pub fn session_options_from_config(cfg: &FolioConfig) -> SessionOptions {
    SessionOptions {
        limits: security_limits_from_config(&cfg.security),
        render: render_options_from_config(&cfg.render),
    }
}
