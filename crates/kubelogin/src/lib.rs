//! Kubernetes credential helper for OpenID Connect providers
//!
//! Obtains an ID token from the configured provider, caches it, and writes it
//! into the kubeconfig `oidc` auth-provider of the targeted user.

mod atomic;
pub mod cache;
pub mod config;
mod constants;
mod error;
pub mod grant;
pub mod kubeconfig;
pub mod observability;
pub mod oidc;
pub mod standalone;
#[cfg(test)]
mod test_support;
pub mod tls;

pub use cache::{CacheKey, FileTokenCache, TokenCache};
pub use config::{LoggingSettings, Settings, SettingsBuilder};
pub use error::{Error, ErrorKind, Result};
pub use grant::{
    AuthCodeBrowserOptions, AuthenticationOptions, ClientCredentialsOptions, DeviceCodeOptions,
    GrantStrategy, PasswordOptions, ProviderOptions, select_grant,
};
pub use kubeconfig::{ConfigEntryRef, ReconcileOutcome, SelectorPrecedence};
pub use oidc::{TerminalInteraction, TokenSet, UserInteraction};
pub use standalone::{LoginError, LoginInput, LoginOutcome, Standalone, Step, TokenSource};
pub use tls::{TlsOptions, TrustConfig};
