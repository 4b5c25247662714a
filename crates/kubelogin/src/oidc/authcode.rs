//! Authorization code grant through the user's browser

use std::borrow::Cow;

use openidconnect::{AuthorizationCode, CsrfToken, Nonce, PkceCodeChallenge, RedirectUrl};
use url::Url;

use super::callback::{CallbackListener, CallbackParams};
use super::{GrantContext, OidcClient, TokenSet};
use crate::error::{Error, Result};
use crate::grant::AuthCodeBrowserOptions;

impl OidcClient {
    pub(super) async fn authorization_code(
        &self,
        options: &AuthCodeBrowserOptions,
        ctx: GrantContext<'_>,
    ) -> Result<TokenSet> {
        let mut listener = CallbackListener::bind(&options.listen_addresses).await?;
        let redirect_uri = format!(
            "http://{}:{}",
            options.redirect_hostname,
            listener.local_addr().port()
        );

        let state = CsrfToken::new_random();
        let nonce = Nonce::new_random();
        let pkce = if options.use_pkce && self.metadata.additional_metadata().supports_s256() {
            Some(PkceCodeChallenge::new_random_sha256())
        } else {
            None
        };

        let url = self.authorization_url(
            &redirect_uri,
            state.secret(),
            nonce.secret(),
            pkce.as_ref().map(|(challenge, _)| challenge),
        );
        tracing::info!(redirect_uri = %redirect_uri, pkce = pkce.is_some(), "Waiting for browser authentication");
        ctx.interaction
            .show_authorization_url(&url, options.open_browser)
            .await;

        let outcome = tokio::select! {
            result = listener.wait() => result,
            () = tokio::time::sleep(ctx.timeout) => Err(Error::AuthenticationTimeout(format!(
                "no browser callback within {}s",
                ctx.timeout.as_secs()
            ))),
            () = ctx.cancel.cancelled() => Err(Error::Cancelled),
        };
        listener.shutdown().await;

        let code = check_callback(outcome?, state.secret())?;

        let redirect_url = RedirectUrl::new(redirect_uri)
            .map_err(|e| Error::InvalidOption(format!("redirect URI: {e}")))?;
        let mut request = self
            .oauth
            .exchange_code(AuthorizationCode::new(code))
            .map_err(super::configuration_error)?
            .set_redirect_uri(Cow::Owned(redirect_url));
        if let Some((_, verifier)) = pkce {
            request = request.set_pkce_verifier(verifier);
        }

        let response = request
            .request_async(&self.http)
            .await
            .map_err(super::token_error)?;
        self.verify_response(response, Some(nonce.secret()), None)
            .await
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        challenge: Option<&PkceCodeChallenge>,
    ) -> Url {
        let mut url = self.metadata.authorization_endpoint().url().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", self.provider.client_id.as_str())
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", &self.provider.scope_string())
                .append_pair("state", state)
                .append_pair("nonce", nonce);
            if let Some(challenge) = challenge {
                query
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", challenge.method().as_str());
            }
        }
        url
    }
}

fn check_callback(params: CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.error {
        let detail = params
            .error_description
            .map_or_else(|| error.clone(), |d| format!("{error}: {d}"));
        return Err(if error == "access_denied" {
            Error::AuthenticationDenied(detail)
        } else {
            Error::provider(None, format!("authorization failed: {detail}"))
        });
    }

    if params.state.as_deref() != Some(expected_state) {
        return Err(Error::provider(
            None,
            "authorization response state does not match the request",
        ));
    }

    params
        .code
        .ok_or_else(|| Error::provider(None, "authorization response has no code"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ErrorKind;
    use crate::grant::{GrantStrategy, ProviderOptions, ProviderSettings};
    use crate::oidc::{DeviceAuthorization, UserInteraction};
    use crate::test_support::{BrowserSimulator, FakeProvider};

    /// Records the URL and never answers
    #[derive(Default)]
    struct AbsentUser {
        seen: Mutex<Option<Url>>,
    }

    #[async_trait]
    impl UserInteraction for AbsentUser {
        async fn show_authorization_url(&self, url: &Url, _open_browser: bool) {
            *self.seen.lock() = Some(url.clone());
        }

        async fn show_device_code(&self, _device: &DeviceAuthorization, _open_browser: bool) {}
    }

    async fn client(idp: &FakeProvider) -> OidcClient {
        let options = AuthCodeBrowserOptions::default();
        let settings = ProviderSettings::resolve(
            &ProviderOptions {
                issuer_url: Some(idp.issuer()),
                client_id: Some("c1".into()),
                client_secret: Some(FakeProvider::SECRET.into()),
                extra_scopes: vec![],
            },
            &ProviderOptions::default(),
            &GrantStrategy::AuthCodeBrowser(options),
        )
        .unwrap();
        OidcClient::discover(settings, reqwest::Client::new(), Duration::from_secs(10))
            .await
            .unwrap()
    }

    fn ephemeral_options() -> AuthCodeBrowserOptions {
        AuthCodeBrowserOptions {
            listen_addresses: vec!["127.0.0.1:0".parse().unwrap()],
            open_browser: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_check_callback_state_mismatch() {
        let params = CallbackParams {
            code: Some("c".into()),
            state: Some("forged".into()),
            ..Default::default()
        };
        let err = check_callback(params, "expected").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderError);
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn test_check_callback_access_denied() {
        let params = CallbackParams {
            error: Some("access_denied".into()),
            error_description: Some("user cancelled".into()),
            ..Default::default()
        };
        let err = check_callback(params, "s").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationDenied);
        assert!(err.to_string().contains("user cancelled"));
    }

    #[test]
    fn test_check_callback_returns_code() {
        let params = CallbackParams {
            code: Some("the-code".into()),
            state: Some("s".into()),
            ..Default::default()
        };
        assert_eq!(check_callback(params, "s").unwrap(), "the-code");
    }

    #[tokio::test]
    async fn test_browser_flow_with_pkce_and_nonce() {
        let idp = FakeProvider::start().await;
        let client = client(&idp).await;
        let cancel = CancellationToken::new();
        let browser = BrowserSimulator::default();

        let tokens = client
            .authorization_code(
                &ephemeral_options(),
                GrantContext {
                    interaction: &browser,
                    timeout: Duration::from_secs(5),
                    cancel: &cancel,
                },
            )
            .await
            .unwrap();

        assert_eq!(tokens.refresh_token(), Some("refresh-1"));
        assert_eq!(idp.last_grant().as_deref(), Some("authorization_code"));
        assert!(idp.pkce_verified());

        let url = browser.visited().unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
        assert!(query.get("redirect_uri").unwrap().starts_with("http://localhost:"));
        assert!(query.contains_key("nonce"));
    }

    #[tokio::test]
    async fn test_browser_flow_without_pkce() {
        let idp = FakeProvider::start().await;
        let client = client(&idp).await;
        let cancel = CancellationToken::new();
        let browser = BrowserSimulator::default();
        let options = AuthCodeBrowserOptions {
            use_pkce: false,
            ..ephemeral_options()
        };

        client
            .authorization_code(
                &options,
                GrantContext {
                    interaction: &browser,
                    timeout: Duration::from_secs(5),
                    cancel: &cancel,
                },
            )
            .await
            .unwrap();

        let url = browser.visited().unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "code_challenge"));
    }

    #[tokio::test]
    async fn test_browser_flow_times_out_and_releases_listener() {
        let idp = FakeProvider::start().await;
        let client = client(&idp).await;
        let cancel = CancellationToken::new();
        let user = Arc::new(AbsentUser::default());

        let err = client
            .authorization_code(
                &ephemeral_options(),
                GrantContext {
                    interaction: user.as_ref(),
                    timeout: Duration::from_millis(200),
                    cancel: &cancel,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationTimeout);

        let url = user.seen.lock().clone().unwrap();
        let redirect = url
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.replace("localhost", "127.0.0.1"))
            .unwrap();
        assert!(reqwest::get(format!("{redirect}/?code=late")).await.is_err());
    }

    #[tokio::test]
    async fn test_browser_flow_cancelled() {
        let idp = FakeProvider::start().await;
        let client = client(&idp).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .authorization_code(
                &ephemeral_options(),
                GrantContext {
                    interaction: &AbsentUser::default(),
                    timeout: Duration::from_secs(5),
                    cancel: &cancel,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
