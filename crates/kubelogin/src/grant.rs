//! Authentication options and grant strategy selection
//!
//! Callers describe the grant they want as a set of mutually exclusive option
//! groups. [`select_grant`] turns that set into exactly one [`GrantStrategy`] or
//! fails before any network traffic happens.

use std::net::SocketAddr;

use crate::constants::{DEFAULT_LISTEN_ADDRESSES, DEFAULT_REDIRECT_HOSTNAME, OPENID_SCOPE};
use crate::error::{Error, Result};

/// Provider parameters supplied by the caller.
///
/// Each field overrides the value found in the kubeconfig auth-provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    pub issuer_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub extra_scopes: Vec<String>,
}

impl std::fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret_set", &self.client_secret.is_some())
            .field("extra_scopes", &self.extra_scopes)
            .finish()
    }
}

/// Authorization code flow through the user's browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCodeBrowserOptions {
    /// Local addresses tried in order for the callback listener
    pub listen_addresses: Vec<SocketAddr>,
    /// Hostname used in the redirect URI
    pub redirect_hostname: String,
    /// Open the authorization URL automatically
    pub open_browser: bool,
    /// Send a PKCE challenge
    pub use_pkce: bool,
}

impl Default for AuthCodeBrowserOptions {
    fn default() -> Self {
        Self {
            listen_addresses: DEFAULT_LISTEN_ADDRESSES
                .iter()
                .filter_map(|a| a.parse().ok())
                .collect(),
            redirect_hostname: DEFAULT_REDIRECT_HOSTNAME.to_string(),
            open_browser: true,
            use_pkce: true,
        }
    }
}

/// Device authorization flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCodeOptions {
    /// Open the verification URL automatically
    pub open_browser: bool,
}

/// Resource owner password credentials
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PasswordOptions {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for PasswordOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordOptions")
            .field("username", &self.username)
            .field("password_set", &self.password.is_some())
            .finish()
    }
}

/// Client credentials grant. The client secret is taken from the provider parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentialsOptions {}

/// Mutually exclusive grant option groups plus shared provider parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationOptions {
    pub provider: ProviderOptions,
    pub auth_code_browser: Option<AuthCodeBrowserOptions>,
    pub device_code: Option<DeviceCodeOptions>,
    pub password: Option<PasswordOptions>,
    pub client_credentials: Option<ClientCredentialsOptions>,
}

/// Resolved grant with its validated parameters
#[derive(Clone, PartialEq, Eq)]
pub enum GrantStrategy {
    AuthCodeBrowser(AuthCodeBrowserOptions),
    DeviceCode(DeviceCodeOptions),
    Password { username: String, password: String },
    ClientCredentials,
}

impl std::fmt::Debug for GrantStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthCodeBrowser(o) => f.debug_tuple("AuthCodeBrowser").field(o).finish(),
            Self::DeviceCode(o) => f.debug_tuple("DeviceCode").field(o).finish(),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::ClientCredentials => f.write_str("ClientCredentials"),
        }
    }
}

impl GrantStrategy {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AuthCodeBrowser(_) => "authcode",
            Self::DeviceCode(_) => "device-code",
            Self::Password { .. } => "password",
            Self::ClientCredentials => "client-credentials",
        }
    }

    /// Extra parameters that separate cache entries of the same client
    #[must_use]
    pub fn cache_discriminators(&self) -> Vec<(String, String)> {
        let mut params = vec![("grant".to_string(), self.name().to_string())];
        if let Self::Password { username, .. } = self {
            params.push(("username".to_string(), username.clone()));
        }
        params
    }

    /// Whether the grant needs a client secret to run
    #[must_use]
    pub const fn requires_client_secret(&self) -> bool {
        matches!(self, Self::ClientCredentials)
    }
}

/// Select exactly one grant strategy from the option groups.
pub fn select_grant(options: &AuthenticationOptions) -> Result<GrantStrategy> {
    let populated: Vec<&'static str> = [
        options.auth_code_browser.as_ref().map(|_| "authcode"),
        options.device_code.as_ref().map(|_| "device-code"),
        options.password.as_ref().map(|_| "password"),
        options.client_credentials.as_ref().map(|_| "client-credentials"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if populated.len() > 1 {
        return Err(Error::AmbiguousGrant(populated));
    }

    let strategy = if let Some(ref browser) = options.auth_code_browser {
        validate_browser(browser)?;
        GrantStrategy::AuthCodeBrowser(browser.clone())
    } else if let Some(ref device) = options.device_code {
        GrantStrategy::DeviceCode(device.clone())
    } else if let Some(ref password) = options.password {
        validate_password(password)?
    } else if options.client_credentials.is_some() {
        GrantStrategy::ClientCredentials
    } else {
        return Err(Error::NoGrantSelected);
    };

    tracing::info!(grant = strategy.name(), "Grant strategy selected");
    Ok(strategy)
}

fn validate_browser(options: &AuthCodeBrowserOptions) -> Result<()> {
    if options.listen_addresses.is_empty() {
        return Err(Error::InvalidOption(
            "authcode requires at least one listen address".into(),
        ));
    }
    if options.redirect_hostname.trim().is_empty() {
        return Err(Error::InvalidOption(
            "authcode requires a redirect URL hostname".into(),
        ));
    }
    Ok(())
}

fn validate_password(options: &PasswordOptions) -> Result<GrantStrategy> {
    let username = options
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::InvalidOption("password grant requires a username".into()))?;
    let password = options
        .password
        .as_deref()
        .ok_or_else(|| Error::InvalidOption("password grant requires a password".into()))?;
    Ok(GrantStrategy::Password {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Provider parameters after merging caller options with the kubeconfig
#[derive(Clone)]
pub struct ProviderSettings {
    pub issuer_url: openidconnect::IssuerUrl,
    pub client_id: openidconnect::ClientId,
    pub client_secret: Option<openidconnect::ClientSecret>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("issuer_url", &self.issuer_url.as_str())
            .field("client_id", &self.client_id.as_str())
            .field("client_secret_set", &self.client_secret.is_some())
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl ProviderSettings {
    /// Merge caller overrides over the kubeconfig values and validate the result
    /// against the selected grant.
    pub fn resolve(
        overrides: &ProviderOptions,
        kubeconfig: &ProviderOptions,
        strategy: &GrantStrategy,
    ) -> Result<Self> {
        let issuer = overrides
            .issuer_url
            .clone()
            .or_else(|| kubeconfig.issuer_url.clone())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidOption("missing issuer URL".into()))?;
        let issuer_url = openidconnect::IssuerUrl::new(issuer.clone())
            .map_err(|e| Error::InvalidOption(format!("invalid issuer URL {issuer}: {e}")))?;

        let client_id = overrides
            .client_id
            .clone()
            .or_else(|| kubeconfig.client_id.clone())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidOption("missing client ID".into()))?;

        let client_secret = overrides
            .client_secret
            .clone()
            .or_else(|| kubeconfig.client_secret.clone())
            .filter(|s| !s.is_empty());

        if strategy.requires_client_secret() && client_secret.is_none() {
            return Err(Error::InvalidOption(format!(
                "{} grant requires a client secret",
                strategy.name()
            )));
        }

        let extra = if overrides.extra_scopes.is_empty() {
            &kubeconfig.extra_scopes
        } else {
            &overrides.extra_scopes
        };

        Ok(Self {
            issuer_url,
            client_id: openidconnect::ClientId::new(client_id),
            client_secret: client_secret.map(openidconnect::ClientSecret::new),
            scopes: build_scopes(extra),
        })
    }

    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

fn build_scopes(extra: &[String]) -> Vec<String> {
    let mut scopes = vec![OPENID_SCOPE.to_string()];
    for scope in extra.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}
