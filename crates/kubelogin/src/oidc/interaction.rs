//! User-facing side of the interactive grants

use async_trait::async_trait;
use url::Url;

/// Device authorization response shown to the user
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: Url,
    #[serde(default)]
    pub verification_uri_complete: Option<Url>,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// How the interactive grants reach the user
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Present the authorization URL of the browser flow
    async fn show_authorization_url(&self, url: &Url, open_browser: bool);

    /// Present the verification URL and user code of the device flow
    async fn show_device_code(&self, device: &DeviceAuthorization, open_browser: bool);
}

/// Writes prompts to stderr and launches the system browser
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalInteraction;

#[async_trait]
impl UserInteraction for TerminalInteraction {
    async fn show_authorization_url(&self, url: &Url, open_browser: bool) {
        if open_browser && launch_browser(url) {
            eprintln!("Opening the browser for authentication. If it does not open, visit:\n\n  {url}\n");
        } else {
            eprintln!("Please visit the following URL in your browser:\n\n  {url}\n");
        }
    }

    async fn show_device_code(&self, device: &DeviceAuthorization, open_browser: bool) {
        eprintln!(
            "Please visit {} and enter the code: {}",
            device.verification_uri, device.user_code
        );
        if open_browser {
            let target = device
                .verification_uri_complete
                .as_ref()
                .unwrap_or(&device.verification_uri);
            launch_browser(target);
        }
    }
}

fn launch_browser(url: &Url) -> bool {
    match open::that_detached(url.as_str()) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Could not open the browser");
            false
        }
    }
}
