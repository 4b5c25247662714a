//! Token material returned by the provider

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use openidconnect::core::CoreTokenResponse;
use openidconnect::{OAuth2TokenResponse, TokenResponse as _};
use serde::{Deserialize, Serialize};

use super::claims::IdTokenClaims;
use crate::error::{Error, Result};

/// Verified token material.
///
/// Only produced by ID token verification or read back from the token cache, so
/// an instance always holds an ID token that passed verification when obtained.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    id_token: String,
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    expiry: DateTime<Utc>,
    issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("expiry", &self.expiry)
            .field("issued_at", &self.issued_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenSet {
    /// Assemble a token set from a token response whose ID token was verified
    /// into `claims`. `previous_refresh_token` is kept when a refresh response
    /// does not rotate it.
    pub(crate) fn from_verified(
        response: TokenResponse,
        id_token: String,
        claims: &IdTokenClaims,
        previous_refresh_token: Option<&str>,
    ) -> Result<Self> {
        let now = Utc::now();
        let mut expiry = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| Error::TokenValidationFailed(format!("invalid exp {}", claims.exp)))?;

        // An expires_in past chrono's range leaves the ID token exp in charge
        if let Some(secs) = response.expires_in
            && let Ok(delta) = chrono::Duration::from_std(Duration::from_secs(secs))
            && let Some(access_expiry) = now.checked_add_signed(delta)
        {
            expiry = expiry.min(access_expiry);
        }

        let issued_at = claims
            .iat
            .and_then(|iat| Utc.timestamp_opt(iat, 0).single())
            .unwrap_or(now);

        Ok(Self {
            id_token,
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh_token.map(str::to_string)),
            expiry,
            issued_at,
        })
    }

    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub const fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub const fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expired once `now + clock_skew` reaches the expiry
    pub fn is_expired(&self, clock_skew: Duration) -> bool {
        self.is_expired_at(Utc::now(), clock_skew)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, clock_skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(clock_skew).unwrap_or(chrono::Duration::zero());
        now + skew >= self.expiry
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        id_token: &str,
        refresh_token: Option<&str>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            id_token: id_token.to_string(),
            access_token: format!("access-{id_token}"),
            refresh_token: refresh_token.map(str::to_string),
            expiry,
            issued_at: expiry - chrono::Duration::hours(1),
        }
    }
}

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl From<CoreTokenResponse> for TokenResponse {
    fn from(response: CoreTokenResponse) -> Self {
        Self {
            access_token: response.access_token().secret().clone(),
            id_token: response.id_token().map(ToString::to_string),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in().map(|d| d.as_secs()),
        }
    }
}

/// OAuth2 error response body
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl std::fmt::Display for OAuthErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {desc}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Outcome of one token endpoint call
#[derive(Debug)]
pub enum TokenReply {
    Issued(TokenResponse),
    Rejected {
        status: u16,
        error: Option<OAuthErrorBody>,
        body: String,
    },
}
