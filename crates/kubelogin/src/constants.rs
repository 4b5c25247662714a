//! Constants for the credential helper

/// Name of the kubeconfig auth-provider this tool owns
pub const AUTH_PROVIDER_NAME: &str = "oidc";

/// Scope always requested from the provider
pub const OPENID_SCOPE: &str = "openid";

/// Default local addresses tried in order for the browser callback listener
pub const DEFAULT_LISTEN_ADDRESSES: &[&str] = &["127.0.0.1:8000", "127.0.0.1:18000"];

/// Default hostname placed in the redirect URI
pub const DEFAULT_REDIRECT_HOSTNAME: &str = "localhost";

/// Default upper bound for user interaction, in seconds
pub const DEFAULT_AUTHENTICATION_TIMEOUT_SECS: u64 = 180;

/// Default per-request timeout towards the provider, in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default tolerance applied to every expiry comparison, in seconds
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 10;

/// Token cache directory relative to `$HOME`
pub const DEFAULT_CACHE_DIR: &str = ".kube/cache/oidc-login";

/// Kubeconfig location relative to `$HOME`
pub const DEFAULT_KUBECONFIG: &str = ".kube/config";

/// Device flow poll interval when the provider does not send one
pub const DEFAULT_DEVICE_POLL_INTERVAL_SECS: u64 = 5;

/// Extra delay added on every `slow_down` response
pub const DEVICE_SLOW_DOWN_SECS: u64 = 5;

/// Grant type URN for device code token requests
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Page returned to the browser after a successful callback
pub const CALLBACK_SUCCESS_HTML: &str = "<!DOCTYPE html><html><head><title>kubelogin</title></head>\
<body><h1>Authenticated</h1><p>You can close this window and return to the terminal.</p></body></html>";

/// Page returned to the browser when the provider reported an error
pub const CALLBACK_ERROR_HTML: &str = "<!DOCTYPE html><html><head><title>kubelogin</title></head>\
<body><h1>Authentication failed</h1><p>See the terminal for details.</p></body></html>";
