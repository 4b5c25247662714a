//! TOML settings file loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::builder::SettingsBuilder;
use crate::error::{Error, Result};
use crate::kubeconfig::SelectorPrecedence;

/// Settings file locations checked in order
const SETTINGS_PATHS: &[&str] = &[
    "./kubelogin.toml",
    "~/.config/kubelogin/config.toml",
    "/etc/kubelogin/config.toml",
];

/// Find the first existing settings file
pub fn find_settings_file() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok();
    SETTINGS_PATHS
        .iter()
        .filter_map(|p| expand_home(p, home.as_deref()))
        .find(|p| p.exists())
}

fn expand_home(path: &str, home: Option<&str>) -> Option<PathBuf> {
    if path.starts_with('~') {
        home.map(|h| PathBuf::from(path.replacen('~', h, 1)))
    } else {
        Some(PathBuf::from(path))
    }
}

/// Load settings from a TOML file
pub fn load_from_file(path: &Path, builder: SettingsBuilder) -> Result<SettingsBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Settings(format!("failed to read settings file {}: {e}", path.display()))
    })?;

    let file: FileSettings = toml::from_str(&content).map_err(|e| {
        Error::Settings(format!("failed to parse settings file {}: {e}", path.display()))
    })?;

    Ok(apply_file_settings(builder, file))
}

fn apply_file_settings(mut builder: SettingsBuilder, file: FileSettings) -> SettingsBuilder {
    if let Some(dir) = file.cache.and_then(|c| c.directory) {
        builder = builder.cache_dir(dir);
    }

    if let Some(auth) = file.authentication {
        if let Some(secs) = auth.timeout_secs {
            builder = builder.authentication_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = auth.http_timeout_secs {
            builder = builder.http_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = auth.clock_skew_secs {
            builder = builder.clock_skew(Duration::from_secs(secs));
        }
    }

    if let Some(precedence) = file.kubeconfig.and_then(|k| k.selector_precedence) {
        builder = builder.selector_precedence(precedence);
    }

    if let Some(logging) = file.logging {
        if let Some(level) = logging.level {
            builder = builder.log_level(level);
        }
        if let Some(json) = logging.json {
            builder = builder.json_logs(json);
        }
    }

    builder
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    cache: Option<CacheSection>,
    authentication: Option<AuthenticationSection>,
    kubeconfig: Option<KubeconfigSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthenticationSection {
    timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    clock_skew_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KubeconfigSection {
    selector_precedence: Option<SelectorPrecedence>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    level: Option<String>,
    json: Option<bool>,
}
