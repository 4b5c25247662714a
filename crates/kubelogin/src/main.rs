use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, ValueEnum};
use kubelogin::config;
use kubelogin::observability::init_logging;
use kubelogin::{
    AuthCodeBrowserOptions, AuthenticationOptions, ClientCredentialsOptions, ConfigEntryRef,
    DeviceCodeOptions, FileTokenCache, LoginInput, PasswordOptions, ProviderOptions,
    ReconcileOutcome, SelectorPrecedence, Standalone, TerminalInteraction, TlsOptions,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GrantType {
    /// Password grant when --username is set, otherwise the browser flow
    Auto,
    Authcode,
    DeviceCode,
    Password,
    ClientCredentials,
}

#[derive(Parser, Debug)]
#[command(name = "kubelogin")]
#[command(about = "Log in to an OpenID Connect provider and update the kubeconfig", long_about = None)]
#[command(version)]
#[allow(clippy::struct_excessive_bools)]
struct Args {
    /// Path to the kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to update
    #[arg(long)]
    context: Option<String>,

    /// Kubeconfig user to update
    #[arg(long)]
    user: Option<String>,

    /// Which of --context and --user wins when both are given
    #[arg(long, value_enum)]
    selector_precedence: Option<SelectorPrecedence>,

    /// CA certificate file of the identity provider
    #[arg(long)]
    certificate_authority: Option<PathBuf>,

    /// Base64-encoded CA certificate of the identity provider
    #[arg(long)]
    certificate_authority_data: Option<String>,

    /// Do not verify the identity provider's certificate
    #[arg(long)]
    insecure_skip_tls_verify: bool,

    #[arg(long, value_enum, default_value_t = GrantType::Auto)]
    grant_type: GrantType,

    /// Local address for the browser callback, tried in order
    #[arg(long = "listen-address")]
    listen_addresses: Vec<SocketAddr>,

    /// Hostname of the redirect URL
    #[arg(long, default_value = "localhost")]
    redirect_url_hostname: String,

    /// Print the URL instead of opening a browser
    #[arg(long)]
    skip_open_browser: bool,

    /// Do not send a PKCE challenge
    #[arg(long)]
    no_pkce: bool,

    /// Username for the password grant
    #[arg(long)]
    username: Option<String>,

    /// Password for the password grant
    #[arg(long, env = "KUBELOGIN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Issuer URL of the provider
    #[arg(long)]
    oidc_issuer_url: Option<String>,

    /// Client ID
    #[arg(long)]
    oidc_client_id: Option<String>,

    /// Client secret
    #[arg(long)]
    oidc_client_secret: Option<String>,

    /// Additional scope to request
    #[arg(long = "oidc-extra-scope")]
    oidc_extra_scopes: Vec<String>,

    /// Upper bound for browser and device interaction
    #[arg(long)]
    authentication_timeout_sec: Option<u64>,

    /// Directory of the token cache
    #[arg(long)]
    token_cache_dir: Option<PathBuf>,

    /// Obtain a new token even when the cached one is still valid
    #[arg(long)]
    force_refresh: bool,

    /// Settings file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn grant_type(&self) -> GrantType {
        match self.grant_type {
            GrantType::Auto if self.username.is_some() => GrantType::Password,
            GrantType::Auto => GrantType::Authcode,
            explicit => explicit,
        }
    }

    fn authentication_options(&self) -> AuthenticationOptions {
        let mut options = AuthenticationOptions {
            provider: ProviderOptions {
                issuer_url: self.oidc_issuer_url.clone(),
                client_id: self.oidc_client_id.clone(),
                client_secret: self.oidc_client_secret.clone(),
                extra_scopes: self.oidc_extra_scopes.clone(),
            },
            ..AuthenticationOptions::default()
        };

        match self.grant_type() {
            GrantType::Auto | GrantType::Authcode => {
                let mut browser = AuthCodeBrowserOptions {
                    redirect_hostname: self.redirect_url_hostname.clone(),
                    open_browser: !self.skip_open_browser,
                    use_pkce: !self.no_pkce,
                    ..AuthCodeBrowserOptions::default()
                };
                if !self.listen_addresses.is_empty() {
                    browser.listen_addresses.clone_from(&self.listen_addresses);
                }
                options.auth_code_browser = Some(browser);
            }
            GrantType::DeviceCode => {
                options.device_code = Some(DeviceCodeOptions {
                    open_browser: !self.skip_open_browser,
                });
            }
            GrantType::Password => {
                options.password = Some(PasswordOptions {
                    username: self.username.clone(),
                    password: self.password.clone(),
                });
            }
            GrantType::ClientCredentials => {
                options.client_credentials = Some(ClientCredentialsOptions::default());
            }
        }
        options
    }

    fn tls_options(&self) -> anyhow::Result<TlsOptions> {
        let ca_cert_data = self
            .certificate_authority_data
            .as_deref()
            .map(|data| STANDARD.decode(data.trim()))
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid --certificate-authority-data: {e}"))?;
        Ok(TlsOptions {
            ca_cert_file: self.certificate_authority.clone(),
            ca_cert_data,
            skip_verify: self.insecure_skip_tls_verify,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Settings precedence: CLI > env > file > defaults
    let mut builder = if let Some(ref path) = args.config {
        config::load_settings_from_path(path)?
    } else {
        config::load_settings()?
    };

    if let Some(ref dir) = args.token_cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(secs) = args.authentication_timeout_sec {
        builder = builder.authentication_timeout(Duration::from_secs(secs));
    }
    if let Some(precedence) = args.selector_precedence {
        builder = builder.selector_precedence(precedence);
    }
    if args.verbose {
        builder = builder.log_level("debug");
    }
    if args.json_logs {
        builder = builder.json_logs(true);
    }

    let settings = builder.build()?;
    init_logging(&settings.logging)?;

    let input = LoginInput {
        kubeconfig: args.kubeconfig.clone(),
        target: ConfigEntryRef {
            context: args.context.clone(),
            user: args.user.clone(),
            precedence: settings.selector_precedence,
        },
        tls: args.tls_options()?,
        authentication: args.authentication_options(),
        force_refresh: args.force_refresh,
        authentication_timeout: settings.authentication_timeout,
        http_timeout: settings.http_timeout,
        clock_skew: settings.clock_skew,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            interrupt.cancel();
        }
    });

    let cache = FileTokenCache::new(&settings.cache_dir, settings.clock_skew);
    let outcome = Standalone::new(&cache, &TerminalInteraction)
        .login(&input, &cancel)
        .await?;

    if outcome.tls_verification_disabled {
        eprintln!("Warning: the identity provider's TLS certificate was not verified");
    }
    match outcome.reconcile {
        ReconcileOutcome::Written => eprintln!(
            "Updated {} for {} (token from {}, valid until {})",
            outcome.kubeconfig.display(),
            outcome.target,
            outcome.source,
            outcome.expiry
        ),
        ReconcileOutcome::Unchanged => eprintln!(
            "{} is up to date for {} (valid until {})",
            outcome.kubeconfig.display(),
            outcome.target,
            outcome.expiry
        ),
    }

    Ok(())
}
