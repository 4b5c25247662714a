//! Provider signing keys

use jsonwebtoken::{Algorithm, DecodingKey};
use openidconnect::core::CoreJsonWebKeySet;
use parking_lot::RwLock;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// JSON Web Key
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    // RSA components
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // EC components
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Clone)]
struct KeyEntry {
    kid: Option<String>,
    key: DecodingKey,
    algorithm: Algorithm,
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Signing keys published at the provider's `jwks_uri`.
///
/// Keys come from discovery or are fetched on first use, and are fetched again
/// once when a token names a key ID that is not known yet.
pub struct ProviderKeys {
    jwks_uri: Url,
    http: reqwest::Client,
    entries: RwLock<Option<Vec<KeyEntry>>>,
}

impl std::fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKeys")
            .field("jwks_uri", &self.jwks_uri.as_str())
            .field("loaded", &self.entries.read().as_ref().map(Vec::len))
            .finish()
    }
}

impl ProviderKeys {
    pub const fn new(jwks_uri: Url, http: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http,
            entries: RwLock::new(None),
        }
    }

    /// Use the key set fetched during discovery until a token names an
    /// unknown key ID
    pub fn preload(&self, discovered: &CoreJsonWebKeySet) {
        let jwks = serde_json::to_value(discovered).and_then(serde_json::from_value::<JwkSet>);
        match jwks {
            Ok(jwks) => {
                let entries = parse_key_set(&jwks);
                tracing::debug!(keys = entries.len(), "Provider keys taken from discovery");
                *self.entries.write() = Some(entries);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Discovered key set not usable, fetching on demand");
            }
        }
    }

    /// Find the key for a token header
    pub async fn key_for(&self, kid: Option<&str>, alg: Algorithm) -> Result<DecodingKey> {
        let loaded = self.entries.read().is_some();
        if !loaded {
            self.refresh().await?;
        }

        if let Some(key) = self.lookup(kid, alg) {
            return Ok(key);
        }

        if kid.is_some() && loaded {
            tracing::debug!(kid, "Unknown key ID, fetching provider keys again");
            self.refresh().await?;
            if let Some(key) = self.lookup(kid, alg) {
                return Ok(key);
            }
        }

        Err(Error::TokenValidationFailed(match kid {
            Some(kid) => format!("no provider key with ID {kid} for {alg:?}"),
            None => format!("no provider key for {alg:?}"),
        }))
    }

    fn lookup(&self, kid: Option<&str>, alg: Algorithm) -> Option<DecodingKey> {
        let guard = self.entries.read();
        let entries = guard.as_ref()?;
        entries
            .iter()
            .filter(|entry| entry.algorithm == alg)
            .find(|entry| kid.is_none() || entry.kid.as_deref() == kid)
            .map(|entry| entry.key.clone())
    }

    async fn refresh(&self) -> Result<()> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "Fetching provider keys");

        let response = self.http.get(self.jwks_uri.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider(Some(status.as_u16()), body));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::provider(Some(status.as_u16()), format!("invalid JWKS: {e}")))?;

        let entries = parse_key_set(&jwks);
        tracing::debug!(keys = entries.len(), "Provider keys loaded");
        *self.entries.write() = Some(entries);
        Ok(())
    }
}

fn parse_key_set(jwks: &JwkSet) -> Vec<KeyEntry> {
    jwks.keys
        .iter()
        .filter(|jwk| jwk.key_use.as_deref().is_none_or(|u| u == "sig"))
        .filter_map(|jwk| match decode_jwk(jwk) {
            Ok(Some((key, algorithm))) => Some(KeyEntry {
                kid: jwk.kid.clone(),
                key,
                algorithm,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(kid = ?jwk.kid, error = %e, "Skipping unusable provider key");
                None
            }
        })
        .collect()
}

fn decode_jwk(jwk: &Jwk) -> Result<Option<(DecodingKey, Algorithm)>> {
    let alg = match jwk.alg.as_deref() {
        Some("RS256") => Algorithm::RS256,
        Some("RS384") => Algorithm::RS384,
        Some("RS512") => Algorithm::RS512,
        Some("PS256") => Algorithm::PS256,
        Some("PS384") => Algorithm::PS384,
        Some("PS512") => Algorithm::PS512,
        Some("ES256") => Algorithm::ES256,
        Some("ES384") => Algorithm::ES384,
        None => match jwk.kty.as_str() {
            "RSA" => Algorithm::RS256,
            "EC" => match jwk.crv.as_deref() {
                Some("P-256") => Algorithm::ES256,
                Some("P-384") => Algorithm::ES384,
                _ => return Ok(None),
            },
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    let invalid = |reason: String| Error::TokenValidationFailed(format!("invalid JWK: {reason}"));

    let key = match jwk.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                return Err(invalid("RSA key without modulus or exponent".into()));
            };
            DecodingKey::from_rsa_components(n, e).map_err(|e| invalid(e.to_string()))?
        }
        "EC" => {
            let (Some(x), Some(y)) = (&jwk.x, &jwk.y) else {
                return Err(invalid("EC key without coordinates".into()));
            };
            DecodingKey::from_ec_components(x, y).map_err(|e| invalid(e.to_string()))?
        }
        _ => return Ok(None),
    };

    Ok(Some((key, alg)))
}
