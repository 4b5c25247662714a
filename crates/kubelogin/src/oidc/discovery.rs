//! OpenID provider metadata discovery

use openidconnect::core::{
    CoreAuthDisplay, CoreClaimName, CoreClaimType, CoreClientAuthMethod, CoreGrantType,
    CoreJsonWebKey, CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm,
    CoreResponseMode, CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::{AdditionalProviderMetadata, DiscoveryError, HttpClientError, IssuerUrl};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Metadata fields outside OpenID Connect Discovery that the grants read
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrantEndpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_challenge_methods_supported: Vec<String>,
}

impl AdditionalProviderMetadata for GrantEndpoints {}

impl GrantEndpoints {
    /// Whether the provider advertises S256 PKCE support.
    ///
    /// Providers that omit the field are assumed to accept it.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self.code_challenge_methods_supported.iter().any(|m| m == "S256")
    }
}

/// Discovered provider metadata, signing keys included
pub type ProviderMetadata = openidconnect::ProviderMetadata<
    GrantEndpoints,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

/// Fetch `<issuer>/.well-known/openid-configuration` and the key set it
/// names. The advertised issuer must equal the configured one and a token
/// endpoint must be present.
pub async fn discover(http: &reqwest::Client, issuer: &IssuerUrl) -> Result<ProviderMetadata> {
    tracing::debug!(issuer = issuer.as_str(), "Discovering OpenID provider");

    let metadata = ProviderMetadata::discover_async(issuer.clone(), http)
        .await
        .map_err(discovery_error)?;

    if metadata.token_endpoint().is_none() {
        return Err(Error::provider(
            None,
            "provider does not advertise a token_endpoint",
        ));
    }

    tracing::debug!(
        token_endpoint = metadata.token_endpoint().map(|u| u.as_str()),
        device = metadata
            .additional_metadata()
            .device_authorization_endpoint
            .is_some(),
        "Provider discovered"
    );
    Ok(metadata)
}

fn discovery_error(err: DiscoveryError<HttpClientError<reqwest::Error>>) -> Error {
    match err {
        DiscoveryError::Response(status, body, reason) => {
            let body = String::from_utf8_lossy(&body);
            let detail = if body.trim().is_empty() {
                reason
            } else {
                body.into_owned()
            };
            Error::provider(Some(status.as_u16()), detail)
        }
        other => Error::provider(None, super::error_chain(&other)),
    }
}
