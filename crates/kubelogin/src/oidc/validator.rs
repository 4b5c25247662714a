//! ID token verification

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode_header};

use super::claims::IdTokenClaims;
use super::jwks::ProviderKeys;
use crate::error::{Error, Result};

/// Verifies ID tokens issued to one client by one provider
pub struct IdTokenValidator {
    issuer: String,
    client_id: String,
    hs_key: Option<DecodingKey>,
    keys: ProviderKeys,
    clock_skew: Duration,
}

impl std::fmt::Debug for IdTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenValidator")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("has_hs_key", &self.hs_key.is_some())
            .field("keys", &self.keys)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl IdTokenValidator {
    /// HS* tokens are verified with the client secret, every other algorithm
    /// with the provider's published keys.
    pub fn new(
        issuer: &str,
        client_id: &str,
        client_secret: Option<&str>,
        keys: ProviderKeys,
        clock_skew: Duration,
    ) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            hs_key: client_secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            keys,
            clock_skew,
        }
    }

    /// Verify signature, issuer, audience, expiry and issued-at. When
    /// `expected_nonce` is set the token must carry the same nonce.
    pub async fn verify(&self, token: &str, expected_nonce: Option<&str>) -> Result<IdTokenClaims> {
        let header = decode_header(token)
            .map_err(|e| Error::TokenValidationFailed(format!("malformed ID token: {e}")))?;

        let key = self.decoding_key(header.kid.as_deref(), header.alg).await?;

        let mut validation = Validation::new(header.alg);
        let with_slash = format!("{}/", self.issuer);
        validation.set_issuer(&[self.issuer.as_str(), with_slash.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.clock_skew.as_secs();

        let claims = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)?.claims;

        let now = chrono::Utc::now().timestamp();
        if let Some(iat) = claims.iat
            && iat > now + self.clock_skew.as_secs() as i64
        {
            return Err(Error::TokenValidationFailed(
                "token issued in the future".into(),
            ));
        }

        if let Some(expected) = expected_nonce
            && claims.nonce.as_deref() != Some(expected)
        {
            return Err(Error::TokenValidationFailed("nonce mismatch".into()));
        }

        tracing::debug!(
            sub = ?claims.sub,
            alg = ?header.alg,
            exp = claims.exp,
            "ID token verified"
        );
        Ok(claims)
    }

    async fn decoding_key(&self, kid: Option<&str>, alg: Algorithm) -> Result<DecodingKey> {
        if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return self.hs_key.clone().ok_or_else(|| {
                Error::TokenValidationFailed(format!(
                    "{alg:?} signed ID token requires a client secret"
                ))
            });
        }
        self.keys.key_for(kid, alg).await
    }
}
