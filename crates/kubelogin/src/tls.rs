//! TLS trust resolution for connections to the identity provider

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Caller-supplied TLS settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM file holding one or more CA certificates
    pub ca_cert_file: Option<PathBuf>,
    /// PEM-encoded CA certificates supplied inline
    pub ca_cert_data: Option<Vec<u8>>,
    /// Accept any server certificate
    pub skip_verify: bool,
}

impl TlsOptions {
    #[must_use]
    pub const fn has_ca(&self) -> bool {
        self.ca_cert_file.is_some() || self.ca_cert_data.is_some()
    }
}

/// Where trust for the provider's certificate comes from
#[derive(Clone)]
pub enum TrustMode {
    /// Platform default trust store
    Platform,
    /// Certificates parsed from a CA file or inline data
    Custom {
        source_name: String,
        certificates: Vec<reqwest::Certificate>,
    },
    /// Certificate verification disabled
    InsecureSkipVerify,
}

impl std::fmt::Debug for TrustMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Platform => f.write_str("Platform"),
            Self::Custom {
                source_name,
                certificates,
            } => f
                .debug_struct("Custom")
                .field("source_name", source_name)
                .field("certificates", &certificates.len())
                .finish(),
            Self::InsecureSkipVerify => f.write_str("InsecureSkipVerify"),
        }
    }
}

/// Resolved trust configuration used to build the HTTP transport
#[derive(Debug, Clone)]
pub struct TrustConfig {
    mode: TrustMode,
    ignored_ca: Option<String>,
}

impl TrustConfig {
    /// Resolve trust from the caller's options.
    ///
    /// Skip-verify takes precedence over a supplied CA. The CA is not read in that
    /// case and its source is reported through [`TrustConfig::ignored_ca_source`].
    pub fn resolve(options: &TlsOptions) -> Result<Self> {
        if options.ca_cert_file.is_some() && options.ca_cert_data.is_some() {
            return Err(Error::InvalidOption(
                "certificate authority file and certificate authority data are mutually exclusive"
                    .into(),
            ));
        }

        if options.skip_verify {
            let ignored_ca = ca_source_name(options);
            tracing::warn!("TLS certificate verification of the identity provider is disabled");
            if let Some(ref source) = ignored_ca {
                tracing::warn!(
                    ca = %source,
                    "Ignoring certificate authority because TLS verification is disabled"
                );
            }
            return Ok(Self {
                mode: TrustMode::InsecureSkipVerify,
                ignored_ca,
            });
        }

        let (source_name, pem) = match (&options.ca_cert_file, &options.ca_cert_data) {
            (Some(path), None) => {
                let name = path.display().to_string();
                let pem = std::fs::read(path).map_err(|e| Error::trust_material(&name, e))?;
                (name, pem)
            }
            (None, Some(data)) => (INLINE_CA_SOURCE.to_string(), data.clone()),
            _ => {
                tracing::debug!("Using platform trust store");
                return Ok(Self {
                    mode: TrustMode::Platform,
                    ignored_ca: None,
                });
            }
        };

        let certificates = parse_pem_bundle(&source_name, &pem)?;
        tracing::debug!(
            ca = %source_name,
            certificates = certificates.len(),
            "Loaded certificate authority"
        );

        Ok(Self {
            mode: TrustMode::Custom {
                source_name,
                certificates,
            },
            ignored_ca: None,
        })
    }

    #[must_use]
    pub const fn mode(&self) -> &TrustMode {
        &self.mode
    }

    /// Whether the transport accepts any server certificate
    #[must_use]
    pub const fn verification_disabled(&self) -> bool {
        matches!(self.mode, TrustMode::InsecureSkipVerify)
    }

    /// CA source that was supplied but ignored because of skip-verify
    #[must_use]
    pub fn ignored_ca_source(&self) -> Option<&str> {
        self.ignored_ca.as_deref()
    }

    /// Build the HTTP client used for every request to the provider
    pub fn http_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("kubelogin/", env!("CARGO_PKG_VERSION")));

        match &self.mode {
            TrustMode::Platform => {}
            TrustMode::Custom { certificates, .. } => {
                for cert in certificates {
                    builder = builder.add_root_certificate(cert.clone());
                }
            }
            TrustMode::InsecureSkipVerify => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder.build().map_err(|e| match &self.mode {
            TrustMode::Custom { source_name, .. } => Error::trust_material(source_name, e),
            _ => Error::provider(None, format!("failed to create HTTP client: {e}")),
        })
    }
}

const INLINE_CA_SOURCE: &str = "inline certificate authority data";

fn ca_source_name(options: &TlsOptions) -> Option<String> {
    options
        .ca_cert_file
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| options.ca_cert_data.as_ref().map(|_| INLINE_CA_SOURCE.to_string()))
}

fn parse_pem_bundle(source_name: &str, pem: &[u8]) -> Result<Vec<reqwest::Certificate>> {
    let certificates = reqwest::Certificate::from_pem_bundle(pem)
        .map_err(|e| Error::trust_material(source_name, e))?;
    if certificates.is_empty() {
        return Err(Error::trust_material(
            source_name,
            "no PEM certificates found",
        ));
    }
    Ok(certificates)
}
