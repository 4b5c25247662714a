//! Logging setup
//!
//! Events go to stderr so stdout stays free for credential output.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), &settings.level)?;

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Settings(format!("cannot install logger: {e}")))
}

fn build_filter(env: Option<&str>, level: &str) -> Result<EnvFilter> {
    if let Some(directives) = env.filter(|d| !d.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| Error::Settings(format!("invalid log level {level:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_env_directive_wins() {
        let filter = build_filter(Some("kubelogin=trace"), "warn").unwrap();
        assert_eq!(filter.to_string(), "kubelogin=trace");
    }

    #[test]
    fn test_configured_level_used_without_env() {
        assert_eq!(build_filter(None, "debug").unwrap().to_string(), "debug");
        assert_eq!(build_filter(Some(" "), "warn").unwrap().to_string(), "warn");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let err = build_filter(None, "kubelogin=verbose").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Settings);
    }

    #[test]
    fn test_second_init_fails() {
        let settings = LoggingSettings::default();
        let _ = init_logging(&settings);
        assert!(init_logging(&settings).is_err());
    }
}
