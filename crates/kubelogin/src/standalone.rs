//! Login orchestration
//!
//! One invocation walks `ResolveTarget -> SelectGrant -> ResolveTrust -> cache
//! lookup -> [Discover -> RunGrant -> ValidateToken -> store] -> Reconcile`.
//! Every failure carries the step it happened at and the unmodified error kind.
//! A still-valid cached token that already sits in the kubeconfig ends the run
//! without any network request.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, TokenCache};
use crate::error::{Error, ErrorKind};
use crate::grant::{AuthenticationOptions, ProviderSettings, select_grant};
use crate::kubeconfig::{
    self, AuthProviderConfig, ConfigEntryRef, CredentialUpdate, Kubeconfig, ReconcileOutcome,
    ResolvedTarget,
};
use crate::oidc::{GrantContext, OidcClient, TokenSet, UserInteraction};
use crate::tls::{TlsOptions, TrustConfig};

/// Orchestrator state a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ResolveTarget,
    SelectGrant,
    ResolveTrust,
    Discover,
    RunGrant,
    ValidateToken,
    Reconcile,
}

impl Step {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResolveTarget => "resolve-target",
            Self::SelectGrant => "select-grant",
            Self::ResolveTrust => "resolve-trust",
            Self::Discover => "discover",
            Self::RunGrant => "run-grant",
            Self::ValidateToken => "validate-token",
            Self::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a login run
#[derive(Debug, thiserror::Error)]
#[error("{step}: {source}")]
pub struct LoginError {
    pub step: Step,
    pub source: Error,
}

impl LoginError {
    /// Kind of the underlying error, never rewritten by the orchestrator
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

trait AtStep<T> {
    fn at(self, step: Step) -> Result<T, LoginError>;
}

impl<T> AtStep<T> for crate::error::Result<T> {
    fn at(self, step: Step) -> Result<T, LoginError> {
        self.map_err(|source| LoginError { step, source })
    }
}

/// Where the written token material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Cache,
    Refresh,
    Grant,
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::Refresh => "refresh",
            Self::Grant => "grant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub target: ResolvedTarget,
    pub kubeconfig: PathBuf,
    pub source: TokenSource,
    pub reconcile: ReconcileOutcome,
    pub expiry: DateTime<Utc>,
    /// The provider's certificate was not verified
    pub tls_verification_disabled: bool,
}

/// Everything one login run needs from the caller
#[derive(Debug, Clone)]
pub struct LoginInput {
    /// Explicit kubeconfig path, otherwise `KUBECONFIG` or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,
    pub target: ConfigEntryRef,
    pub tls: TlsOptions,
    pub authentication: AuthenticationOptions,
    /// Ignore a still-valid cached token
    pub force_refresh: bool,
    pub authentication_timeout: Duration,
    pub http_timeout: Duration,
    pub clock_skew: Duration,
}

/// Login orchestrator bound to a token cache and a way to reach the user
pub struct Standalone<'a> {
    cache: &'a dyn TokenCache,
    interaction: &'a dyn UserInteraction,
}

impl fmt::Debug for Standalone<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Standalone").finish_non_exhaustive()
    }
}

impl<'a> Standalone<'a> {
    pub fn new(cache: &'a dyn TokenCache, interaction: &'a dyn UserInteraction) -> Self {
        Self { cache, interaction }
    }

    /// Run one login. Tripping `cancel` abandons any pending network or user
    /// interaction and ends the run with [`Error::Cancelled`].
    pub async fn login(
        &self,
        input: &LoginInput,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, LoginError> {
        let path = kubeconfig::resolve_path(input.kubeconfig.as_deref()).at(Step::ResolveTarget)?;
        let config = Kubeconfig::load(&path).at(Step::ResolveTarget)?;
        let target = config.resolve_target(&input.target).at(Step::ResolveTarget)?;
        let existing = config.auth_provider(&target.user).at(Step::ResolveTarget)?;

        let strategy = select_grant(&input.authentication).at(Step::SelectGrant)?;
        let kubeconfig_provider = existing
            .as_ref()
            .map(AuthProviderConfig::provider_options)
            .unwrap_or_default();
        let provider = ProviderSettings::resolve(
            &input.authentication.provider,
            &kubeconfig_provider,
            &strategy,
        )
        .at(Step::SelectGrant)?;

        let trust = TrustConfig::resolve(&tls_options(&input.tls, existing.as_ref()))
            .at(Step::ResolveTrust)?;
        let http = trust.http_client(input.http_timeout).at(Step::ResolveTrust)?;

        let key = CacheKey::for_login(&provider, &strategy);
        let cached = self.cache.lookup(&key).await;
        let written_id_token = existing.as_ref().and_then(|p| p.id_token.as_deref());

        if let Some(tokens) = &cached
            && !input.force_refresh
            && !tokens.is_expired(input.clock_skew)
        {
            tracing::info!(expiry = %tokens.expiry(), "Using cached token");
            let reconcile = if written_id_token == Some(tokens.id_token()) {
                tracing::info!(target = %target, "Kubeconfig already holds the cached token");
                ReconcileOutcome::Unchanged
            } else {
                write_back(&path, &target, &provider, tokens)?
            };
            return Ok(LoginOutcome {
                target,
                kubeconfig: path,
                source: TokenSource::Cache,
                reconcile,
                expiry: tokens.expiry(),
                tls_verification_disabled: trust.verification_disabled(),
            });
        }

        if input.force_refresh && cached.is_some() {
            tracing::info!("Ignoring cached token because a refresh was forced");
        }

        let client = until_cancelled(
            cancel,
            OidcClient::discover(provider.clone(), http, input.clock_skew),
        )
        .await
        .at(Step::Discover)?;

        let refreshed = match cached.as_ref().and_then(TokenSet::refresh_token) {
            Some(refresh_token) => {
                match until_cancelled(cancel, client.refresh(refresh_token)).await {
                    Ok(tokens) => Some(tokens),
                    Err(Error::Cancelled) => {
                        return Err(LoginError {
                            step: Step::RunGrant,
                            source: Error::Cancelled,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Token refresh failed, running the full grant");
                        if let Err(e) = self.cache.invalidate(&key).await {
                            tracing::warn!(error = %e, "Could not remove stale cache entry");
                        }
                        None
                    }
                }
            }
            None => None,
        };

        let (tokens, source) = match refreshed {
            Some(tokens) => (tokens, TokenSource::Refresh),
            None => {
                let ctx = GrantContext {
                    interaction: self.interaction,
                    timeout: input.authentication_timeout,
                    cancel,
                };
                let tokens = until_cancelled(cancel, client.authenticate(&strategy, ctx))
                    .await
                    .map_err(|source| LoginError {
                        step: grant_failure_step(&source),
                        source,
                    })?;
                (tokens, TokenSource::Grant)
            }
        };
        tracing::info!(grant = strategy.name(), source = %source, expiry = %tokens.expiry(), "Obtained token");

        if let Err(e) = self.cache.store(&key, &tokens).await {
            tracing::warn!(error = %e, "Could not write token cache");
        }

        let reconcile = write_back(&path, &target, &provider, &tokens)?;
        Ok(LoginOutcome {
            target,
            kubeconfig: path,
            source,
            reconcile,
            expiry: tokens.expiry(),
            tls_verification_disabled: trust.verification_disabled(),
        })
    }
}

/// Caller CA material wins, otherwise the auth-provider's CA is used
fn tls_options(caller: &TlsOptions, existing: Option<&AuthProviderConfig>) -> TlsOptions {
    if caller.has_ca() {
        return caller.clone();
    }
    let mut options = existing.map(AuthProviderConfig::tls_options).unwrap_or_default();
    options.skip_verify = caller.skip_verify;
    options
}

fn grant_failure_step(err: &Error) -> Step {
    if err.kind() == ErrorKind::TokenValidationFailed {
        Step::ValidateToken
    } else {
        Step::RunGrant
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = crate::error::Result<T>>,
) -> crate::error::Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

fn write_back(
    path: &std::path::Path,
    target: &ResolvedTarget,
    provider: &ProviderSettings,
    tokens: &TokenSet,
) -> Result<ReconcileOutcome, LoginError> {
    let update = CredentialUpdate {
        id_token: tokens.id_token().to_string(),
        refresh_token: tokens.refresh_token().map(str::to_string),
        issuer_url: provider.issuer_url.as_str().to_string(),
        client_id: provider.client_id.as_str().to_string(),
    };
    kubeconfig::reconcile(path, &target.user, &update).at(Step::Reconcile)
}
