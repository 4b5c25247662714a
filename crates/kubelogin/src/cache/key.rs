//! Cache key fingerprinting

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::grant::{GrantStrategy, ProviderSettings};

#[derive(Serialize)]
struct Canonical<'a> {
    issuer: &'a str,
    client_id: &'a str,
    scopes: Vec<&'a str>,
    extra: BTreeMap<&'a str, &'a str>,
}

/// Fingerprint of issuer, client, scopes and extra authentication parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    fingerprint: String,
}

impl CacheKey {
    /// Scope order and a trailing slash on the issuer do not change the key
    #[must_use]
    pub fn new(issuer: &str, client_id: &str, scopes: &[String], extra: &[(String, String)]) -> Self {
        let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let canonical = Canonical {
            issuer: issuer.trim_end_matches('/'),
            client_id,
            scopes: sorted,
            extra: extra
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        };

        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        Self {
            fingerprint: hex::encode(Sha256::digest(&encoded)),
        }
    }

    #[must_use]
    pub fn for_login(provider: &ProviderSettings, strategy: &GrantStrategy) -> Self {
        Self::new(
            provider.issuer_url.as_str(),
            provider.client_id.as_str(),
            &provider.scopes,
            &strategy.cache_discriminators(),
        )
    }

    /// Lowercase SHA-256 hex digest
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let key = CacheKey::new("https://idp.example", "c1", &scopes(&["openid"]), &[]);
        assert_eq!(key.fingerprint().len(), 64);
        assert!(key.fingerprint().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.to_string(), key.fingerprint());
    }

    #[test]
    fn test_scope_order_does_not_matter() {
        let a = CacheKey::new("https://idp.example", "c1", &scopes(&["openid", "email"]), &[]);
        let b = CacheKey::new("https://idp.example/", "c1", &scopes(&["email", "openid"]), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_changes_key() {
        let base = CacheKey::new("https://idp.example", "c1", &scopes(&["openid"]), &[]);
        let other_client = CacheKey::new("https://idp.example", "c2", &scopes(&["openid"]), &[]);
        let other_issuer = CacheKey::new("https://other.example", "c1", &scopes(&["openid"]), &[]);
        let other_scope = CacheKey::new("https://idp.example", "c1", &scopes(&["openid", "groups"]), &[]);
        assert_ne!(base, other_client);
        assert_ne!(base, other_issuer);
        assert_ne!(base, other_scope);
    }

    #[test]
    fn test_extra_parameters_change_key() {
        let alice = GrantStrategy::Password {
            username: "alice".into(),
            password: "x".into(),
        };
        let bob = GrantStrategy::Password {
            username: "bob".into(),
            password: "x".into(),
        };
        let a = CacheKey::new("https://idp.example", "c1", &[], &alice.cache_discriminators());
        let b = CacheKey::new("https://idp.example", "c1", &[], &bob.cache_discriminators());
        let c = CacheKey::new(
            "https://idp.example",
            "c1",
            &[],
            &GrantStrategy::ClientCredentials.cache_discriminators(),
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_password_does_not_affect_key() {
        let one = GrantStrategy::Password {
            username: "alice".into(),
            password: "old".into(),
        };
        let two = GrantStrategy::Password {
            username: "alice".into(),
            password: "new".into(),
        };
        assert_eq!(
            CacheKey::new("https://idp.example", "c1", &[], &one.cache_discriminators()),
            CacheKey::new("https://idp.example", "c1", &[], &two.cache_discriminators()),
        );
    }
}
