//! Settings builder

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_AUTHENTICATION_TIMEOUT_SECS, DEFAULT_CACHE_DIR, DEFAULT_CLOCK_SKEW_SECS,
    DEFAULT_HTTP_TIMEOUT_SECS,
};
use crate::error::{Error, Result};
use crate::kubeconfig::SelectorPrecedence;

/// Resolved tool settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: PathBuf,
    /// Upper bound for browser and device interaction
    pub authentication_timeout: Duration,
    /// Per-request bound towards the provider
    pub http_timeout: Duration,
    pub clock_skew: Duration,
    pub selector_precedence: SelectorPrecedence,
    pub logging: LoggingSettings,
}

impl Settings {
    #[must_use]
    pub const fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Builder for [`Settings`]
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    cache_dir: Option<PathBuf>,
    authentication_timeout: Duration,
    http_timeout: Duration,
    clock_skew: Duration,
    selector_precedence: SelectorPrecedence,
    log_level: Option<String>,
    json_logs: bool,
}

impl SettingsBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cache_dir: None,
            authentication_timeout: Duration::from_secs(DEFAULT_AUTHENTICATION_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            clock_skew: Duration::from_secs(DEFAULT_CLOCK_SKEW_SECS),
            selector_precedence: SelectorPrecedence::Context,
            log_level: None,
            json_logs: false,
        }
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn authentication_timeout(mut self, timeout: Duration) -> Self {
        self.authentication_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    #[must_use]
    pub const fn selector_precedence(mut self, precedence: SelectorPrecedence) -> Self {
        self.selector_precedence = precedence;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    /// Build the settings, filling the cache directory from `HOME` when unset
    pub fn build(self) -> Result<Settings> {
        self.build_with_home(std::env::var_os("HOME").map(PathBuf::from))
    }

    fn build_with_home(self, home: Option<PathBuf>) -> Result<Settings> {
        if self.authentication_timeout.is_zero() {
            return Err(Error::Settings("authentication timeout must be positive".into()));
        }
        if self.http_timeout.is_zero() {
            return Err(Error::Settings("HTTP timeout must be positive".into()));
        }

        let cache_dir = match self.cache_dir {
            Some(dir) => dir,
            None => home
                .map(|h| h.join(DEFAULT_CACHE_DIR))
                .ok_or_else(|| Error::Settings("cannot locate cache directory: HOME is not set".into()))?,
        };

        let logging = LoggingSettings {
            level: self
                .log_level
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| LoggingSettings::default().level),
            json: self.json_logs,
        };

        Ok(Settings {
            cache_dir,
            authentication_timeout: self.authentication_timeout,
            http_timeout: self.http_timeout,
            clock_skew: self.clock_skew,
            selector_precedence: self.selector_precedence,
            logging,
        })
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
