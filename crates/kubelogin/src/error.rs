//! Crate error type and its fieldless kind

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("invalid trust material in {source_name}: {reason}")]
    InvalidTrustMaterial { source_name: String, reason: String },

    #[error("ambiguous grant: options for {} are all set, choose one", .0.join(", "))]
    AmbiguousGrant(Vec<&'static str>),

    #[error("no grant selected: set options for one of authcode, device-code, password, client-credentials")]
    NoGrantSelected,

    #[error("authentication timed out: {0}")]
    AuthenticationTimeout(String),

    #[error("authentication denied: {0}")]
    AuthenticationDenied(String),

    #[error("provider error{}: {body}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ProviderError { status: Option<u16>, body: String },

    #[error("token validation failed: {0}")]
    TokenValidationFailed(String),

    #[error("kubeconfig entry not found: {0}")]
    ConfigEntryNotFound(String),

    #[error("token cache entry is corrupted: {0}")]
    CacheCorruption(String),

    #[error("token cache error: {0}")]
    CacheStorage(String),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("authentication cancelled")]
    Cancelled,
}

/// Fieldless discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidOption,
    InvalidTrustMaterial,
    AmbiguousGrant,
    NoGrantSelected,
    AuthenticationTimeout,
    AuthenticationDenied,
    ProviderError,
    TokenValidationFailed,
    ConfigEntryNotFound,
    CacheCorruption,
    CacheStorage,
    Kubeconfig,
    Settings,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    pub fn provider(status: Option<u16>, body: impl Into<String>) -> Self {
        Self::ProviderError {
            status,
            body: body.into(),
        }
    }

    pub fn trust_material(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidTrustMaterial {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOption(_) => ErrorKind::InvalidOption,
            Self::InvalidTrustMaterial { .. } => ErrorKind::InvalidTrustMaterial,
            Self::AmbiguousGrant(_) => ErrorKind::AmbiguousGrant,
            Self::NoGrantSelected => ErrorKind::NoGrantSelected,
            Self::AuthenticationTimeout(_) => ErrorKind::AuthenticationTimeout,
            Self::AuthenticationDenied(_) => ErrorKind::AuthenticationDenied,
            Self::ProviderError { .. } => ErrorKind::ProviderError,
            Self::TokenValidationFailed(_) => ErrorKind::TokenValidationFailed,
            Self::ConfigEntryNotFound(_) => ErrorKind::ConfigEntryNotFound,
            Self::CacheCorruption(_) => ErrorKind::CacheCorruption,
            Self::CacheStorage(_) => ErrorKind::CacheStorage,
            Self::Kubeconfig(_) => ErrorKind::Kubeconfig,
            Self::Settings(_) => ErrorKind::Settings,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::ProviderError {
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        let reason = match err.kind() {
            ErrorKind::ExpiredSignature => "token expired".to_string(),
            ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
            ErrorKind::InvalidIssuer => "invalid issuer".to_string(),
            ErrorKind::InvalidAudience => "invalid audience".to_string(),
            ErrorKind::InvalidSignature => "invalid signature".to_string(),
            ErrorKind::MissingRequiredClaim(claim) => format!("missing claim {claim}"),
            _ => format!("invalid token: {err}"),
        };
        Self::TokenValidationFailed(reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
