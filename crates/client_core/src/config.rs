use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "kanban.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub session_file: Option<PathBuf>,
    pub default_column_color: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".into(),
            request_timeout_secs: 10,
            session_file: None,
            default_column_color: "#4B5EAA".into(),
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    request_timeout_secs: Option<u64>,
    session_file: Option<PathBuf>,
    default_column_color: Option<String>,
}

/// Defaults, then `path` (when it exists), then environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    if let Ok(raw) = fs::read_to_string(path) {
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        apply_file_settings(&mut settings, file_cfg);
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.api_url = normalize_api_url(&settings.api_url)?;
    Ok(settings)
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.session_file {
        settings.session_file = Some(v);
    }
    if let Some(v) = file_cfg.default_column_color {
        settings.default_column_color = v;
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("KANBAN_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = var("APP__API_URL") {
        settings.api_url = v;
    }

    for key in ["KANBAN_TIMEOUT_SECS", "APP__TIMEOUT_SECS"] {
        if let Some(parsed) = var(key).and_then(|v| v.parse::<u64>().ok()) {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = var("KANBAN_SESSION_FILE") {
        settings.session_file = Some(PathBuf::from(v));
    }
    if let Some(v) = var("APP__SESSION_FILE") {
        settings.session_file = Some(PathBuf::from(v));
    }
}

pub fn normalize_api_url(raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(ClientSettings::default().api_url);
    }
    let url = Url::parse(raw).with_context(|| format!("invalid api url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("api url '{raw}' must use http or https");
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
