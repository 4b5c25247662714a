//! Environment variable overrides

use std::time::Duration;

use super::builder::SettingsBuilder;
use crate::error::{Error, Result};

/// Environment variable names
pub mod vars {
    pub const CACHE_DIR: &str = "KUBELOGIN_CACHE_DIR";
    pub const AUTH_TIMEOUT_SECS: &str = "KUBELOGIN_AUTH_TIMEOUT_SECS";
    pub const HTTP_TIMEOUT_SECS: &str = "KUBELOGIN_HTTP_TIMEOUT_SECS";
    pub const SELECTOR_PRECEDENCE: &str = "KUBELOGIN_SELECTOR_PRECEDENCE";
    pub const JSON_LOGS: &str = "KUBELOGIN_JSON_LOGS";
}

/// Apply environment overrides to `builder`
pub fn load_from_env(builder: SettingsBuilder) -> Result<SettingsBuilder> {
    load_from_lookup(builder, |name| std::env::var(name).ok())
}

fn load_from_lookup<F>(mut builder: SettingsBuilder, lookup: F) -> Result<SettingsBuilder>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(vars::CACHE_DIR).filter(|d| !d.is_empty()) {
        builder = builder.cache_dir(dir);
    }

    if let Some(val) = lookup(vars::AUTH_TIMEOUT_SECS) {
        builder = builder.authentication_timeout(parse_secs(vars::AUTH_TIMEOUT_SECS, &val)?);
    }

    if let Some(val) = lookup(vars::HTTP_TIMEOUT_SECS) {
        builder = builder.http_timeout(parse_secs(vars::HTTP_TIMEOUT_SECS, &val)?);
    }

    if let Some(val) = lookup(vars::SELECTOR_PRECEDENCE) {
        let precedence = val
            .parse()
            .map_err(|e| Error::Settings(format!("{}: {e}", vars::SELECTOR_PRECEDENCE)))?;
        builder = builder.selector_precedence(precedence);
    }

    if let Some(val) = lookup(vars::JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::Settings(format!("{name}={value:?}: {e}")))
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
