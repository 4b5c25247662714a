//! Device authorization grant

use std::time::Duration;

use reqwest::header::ACCEPT;
use tokio::time::Instant;

use super::token::TokenReply;
use super::{DeviceAuthorization, GrantContext, OidcClient, TokenSet};
use crate::constants::{
    DEFAULT_DEVICE_POLL_INTERVAL_SECS, DEVICE_CODE_GRANT_TYPE, DEVICE_SLOW_DOWN_SECS,
};
use crate::error::{Error, Result};
use crate::grant::DeviceCodeOptions;

impl OidcClient {
    pub(super) async fn device_code(
        &self,
        options: &DeviceCodeOptions,
        ctx: GrantContext<'_>,
    ) -> Result<TokenSet> {
        let device = self.request_device_code().await?;
        ctx.interaction
            .show_device_code(&device, options.open_browser)
            .await;

        let lifetime = Duration::from_secs(device.expires_in).min(ctx.timeout);
        let deadline = Instant::now() + lifetime;
        let mut interval = Duration::from_secs(
            device
                .interval
                .unwrap_or(DEFAULT_DEVICE_POLL_INTERVAL_SECS)
                .max(1),
        );
        tracing::info!(
            user_code = %device.user_code,
            expires_in = device.expires_in,
            interval_secs = interval.as_secs(),
            "Waiting for device authorization"
        );

        let mut params = self.client_params();
        params.push(("grant_type", DEVICE_CODE_GRANT_TYPE.into()));
        params.push(("device_code", device.device_code.clone()));

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::AuthenticationTimeout(format!(
                    "device code was not confirmed within {}s",
                    lifetime.as_secs()
                )));
            }

            let next_poll = (now + interval).min(deadline);
            tokio::select! {
                () = tokio::time::sleep_until(next_poll) => {}
                () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            }

            let reply = tokio::select! {
                reply = self.token_request(&params) => reply?,
                () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            };

            let (status, oauth, body) = match reply {
                TokenReply::Issued(response) => {
                    return self.verify_response(response, None, None).await;
                }
                TokenReply::Rejected {
                    status,
                    error,
                    body,
                } => (status, error, body),
            };

            let code = oauth.as_ref().map(|e| e.error.clone()).unwrap_or_default();
            let detail = oauth.map_or(body, |e| e.to_string());
            match code.as_str() {
                "authorization_pending" => {
                    tracing::trace!("Device authorization pending");
                }
                "slow_down" => {
                    interval += Duration::from_secs(DEVICE_SLOW_DOWN_SECS);
                    tracing::debug!(
                        interval_secs = interval.as_secs(),
                        "Provider asked to slow down"
                    );
                }
                "access_denied" => return Err(Error::AuthenticationDenied(detail)),
                "expired_token" => {
                    return Err(Error::AuthenticationTimeout(format!(
                        "device code expired: {detail}"
                    )));
                }
                _ => return Err(Error::provider(Some(status), detail)),
            }
        }
    }

    async fn request_device_code(&self) -> Result<DeviceAuthorization> {
        let endpoint = self
            .metadata
            .additional_metadata()
            .device_authorization_endpoint
            .clone()
            .ok_or_else(|| {
                Error::provider(
                    None,
                    "provider does not advertise a device_authorization_endpoint",
                )
            })?;

        let mut params = self.client_params();
        params.push(("scope", self.provider.scope_string()));

        let response = self
            .http
            .post(endpoint)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::provider(Some(status.as_u16()), body));
        }
        serde_json::from_str(&body).map_err(|e| {
            Error::provider(
                Some(status.as_u16()),
                format!("invalid device authorization response: {e}"),
            )
        })
    }

    /// Client authentication as form parameters (`client_secret_post`)
    fn client_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("client_id", self.provider.client_id.as_str().to_string())];
        if let Some(secret) = &self.provider.client_secret {
            params.push(("client_secret", secret.secret().clone()));
        }
        params
    }

    /// One device token poll; OAuth2 rejections come back as values
    async fn token_request(&self, params: &[(&'static str, String)]) -> Result<TokenReply> {
        let response = self
            .http
            .post(self.token_endpoint.clone())
            .header(ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            let parsed = serde_json::from_str(&body).map_err(|e| {
                Error::provider(Some(status.as_u16()), format!("invalid token response: {e}"))
            })?;
            Ok(TokenReply::Issued(parsed))
        } else {
            Ok(TokenReply::Rejected {
                status: status.as_u16(),
                error: serde_json::from_str(&body).ok(),
                body,
            })
        }
    }
}
