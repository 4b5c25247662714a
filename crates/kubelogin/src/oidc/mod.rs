//! OpenID Connect client
//!
//! Discovers the provider, runs the selected grant over the resolved TLS
//! transport and verifies the returned ID token before handing out a
//! [`TokenSet`].

mod authcode;
pub mod callback;
pub mod claims;
mod device;
pub mod discovery;
pub mod interaction;
pub mod jwks;
pub mod token;
pub mod validator;

use std::time::Duration;

use openidconnect::core::{CoreClient, CoreErrorResponseType};
use openidconnect::{
    AuthType, EndpointMaybeSet, EndpointNotSet, EndpointSet, HttpClientError, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, Scope, StandardErrorResponse,
};
use tokio_util::sync::CancellationToken;
use url::Url;

pub use discovery::ProviderMetadata;
pub use interaction::{DeviceAuthorization, TerminalInteraction, UserInteraction};
pub use token::TokenSet;

use self::jwks::ProviderKeys;
use self::token::TokenResponse;
use self::validator::IdTokenValidator;
use crate::error::{Error, Result};
use crate::grant::{GrantStrategy, ProviderSettings};

/// OAuth2 client built from discovery: authorization URL set, token URL
/// present when discovered
type ProviderClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

type TokenRequestError = RequestTokenError<
    HttpClientError<reqwest::Error>,
    StandardErrorResponse<CoreErrorResponseType>,
>;

/// Caller-controlled bounds for the interactive grants
#[derive(Clone, Copy)]
pub struct GrantContext<'a> {
    pub interaction: &'a dyn UserInteraction,
    /// Upper bound for waiting on the user
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

impl std::fmt::Debug for GrantContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantContext")
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Client bound to one discovered provider and one OAuth2 client
pub struct OidcClient {
    provider: ProviderSettings,
    http: reqwest::Client,
    metadata: ProviderMetadata,
    oauth: ProviderClient,
    token_endpoint: Url,
    validator: IdTokenValidator,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.provider.issuer_url.as_str())
            .field("client_id", &self.provider.client_id.as_str())
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl OidcClient {
    /// Run discovery against the issuer and prepare ID token verification
    pub async fn discover(
        provider: ProviderSettings,
        http: reqwest::Client,
        clock_skew: Duration,
    ) -> Result<Self> {
        tracing::info!(
            issuer = %provider.issuer_url.as_str(),
            client_id = %provider.client_id.as_str(),
            "Discovering OIDC provider"
        );

        let metadata = discovery::discover(&http, &provider.issuer_url).await?;
        let token_endpoint = metadata
            .token_endpoint()
            .map(|u| u.url().clone())
            .ok_or_else(|| Error::provider(None, "provider does not advertise a token_endpoint"))?;

        let keys = ProviderKeys::new(metadata.jwks_uri().url().clone(), http.clone());
        keys.preload(metadata.jwks());
        let validator = IdTokenValidator::new(
            provider.issuer_url.as_str(),
            provider.client_id.as_str(),
            provider.client_secret.as_ref().map(|s| s.secret().as_str()),
            keys,
            clock_skew,
        );

        let oauth = ProviderClient::from_provider_metadata(
            metadata.clone(),
            provider.client_id.clone(),
            provider.client_secret.clone(),
        )
        .set_auth_type(AuthType::RequestBody);

        Ok(Self {
            provider,
            http,
            metadata,
            oauth,
            token_endpoint,
            validator,
        })
    }

    /// Run the grant and return verified token material
    pub async fn authenticate(
        &self,
        strategy: &GrantStrategy,
        ctx: GrantContext<'_>,
    ) -> Result<TokenSet> {
        tracing::debug!(grant = strategy.name(), "Running grant");
        match strategy {
            GrantStrategy::AuthCodeBrowser(options) => {
                self.authorization_code(options, ctx).await
            }
            GrantStrategy::DeviceCode(options) => self.device_code(options, ctx).await,
            GrantStrategy::Password { username, password } => {
                let username = ResourceOwnerUsername::new(username.clone());
                let password = ResourceOwnerPassword::new(password.clone());
                let response = self
                    .oauth
                    .exchange_password(&username, &password)
                    .map_err(configuration_error)?
                    .add_scopes(self.scopes())
                    .request_async(&self.http)
                    .await
                    .map_err(token_error)?;
                self.verify_response(response, None, None).await
            }
            GrantStrategy::ClientCredentials => {
                let response = self
                    .oauth
                    .exchange_client_credentials()
                    .map_err(configuration_error)?
                    .add_scopes(self.scopes())
                    .request_async(&self.http)
                    .await
                    .map_err(token_error)?;
                self.verify_response(response, None, None).await
            }
        }
    }

    /// Exchange a refresh token for new token material
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        tracing::debug!("Refreshing token");
        let token = openidconnect::RefreshToken::new(refresh_token.to_string());
        let response = self
            .oauth
            .exchange_refresh_token(&token)
            .map_err(configuration_error)?
            .request_async(&self.http)
            .await
            .map_err(token_error)?;
        self.verify_response(response, None, Some(refresh_token))
            .await
    }

    fn scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        self.provider.scopes.iter().cloned().map(Scope::new)
    }

    async fn verify_response(
        &self,
        response: impl Into<TokenResponse>,
        nonce: Option<&str>,
        previous_refresh_token: Option<&str>,
    ) -> Result<TokenSet> {
        let mut response: TokenResponse = response.into();
        let id_token = response.id_token.take().ok_or_else(|| {
            Error::TokenValidationFailed("token response does not contain an id_token".into())
        })?;
        let claims = self.validator.verify(&id_token, nonce).await?;
        let tokens = TokenSet::from_verified(response, id_token, &claims, previous_refresh_token)?;
        tracing::info!(expiry = %tokens.expiry(), "Token obtained");
        Ok(tokens)
    }
}

/// Render an error with its source chain
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

fn configuration_error(err: openidconnect::ConfigurationError) -> Error {
    Error::provider(None, err.to_string())
}

fn token_error(err: TokenRequestError) -> Error {
    match err {
        RequestTokenError::ServerResponse(response) => Error::provider(None, response.to_string()),
        RequestTokenError::Parse(err, _) if err.path().to_string().starts_with("id_token") => {
            Error::TokenValidationFailed(format!("malformed ID token: {}", err.inner()))
        }
        RequestTokenError::Parse(err, _) => {
            Error::provider(None, format!("invalid token response: {err}"))
        }
        other => Error::provider(None, error_chain(&other)),
    }
}
