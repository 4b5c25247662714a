//! Kubeconfig access
//!
//! The document is kept as a generic YAML tree so that every field this tool
//! does not own survives a rewrite untouched.

mod reconcile;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_yaml::Value;

pub use reconcile::{CredentialUpdate, ReconcileOutcome, reconcile};

use crate::constants::{AUTH_PROVIDER_NAME, DEFAULT_KUBECONFIG};
use crate::error::{Error, Result};
use crate::grant::ProviderOptions;
use crate::tls::TlsOptions;

pub(crate) const KEY_ISSUER: &str = "idp-issuer-url";
pub(crate) const KEY_CLIENT_ID: &str = "client-id";
const KEY_CLIENT_SECRET: &str = "client-secret";
const KEY_EXTRA_SCOPES: &str = "extra-scopes";
const KEY_CA_FILE: &str = "idp-certificate-authority";
const KEY_CA_DATA: &str = "idp-certificate-authority-data";
pub(crate) const KEY_ID_TOKEN: &str = "id-token";
pub(crate) const KEY_REFRESH_TOKEN: &str = "refresh-token";

/// Which selector wins when both a context and a user name are given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectorPrecedence {
    #[default]
    Context,
    User,
}

impl FromStr for SelectorPrecedence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "context" => Ok(Self::Context),
            "user" => Ok(Self::User),
            other => Err(Error::InvalidOption(format!(
                "selector precedence must be context or user, got {other}"
            ))),
        }
    }
}

impl fmt::Display for SelectorPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Context => "context",
            Self::User => "user",
        })
    }
}

/// Caller's selection of the kubeconfig entry to update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntryRef {
    pub context: Option<String>,
    pub user: Option<String>,
    pub precedence: SelectorPrecedence,
}

/// User entry the run updates, with the context it was reached through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub context: Option<String>,
    pub user: String,
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "context={context} user={}", self.user),
            None => write!(f, "user={}", self.user),
        }
    }
}

/// Settings read from the user's `oidc` auth-provider
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthProviderConfig {
    pub issuer_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub extra_scopes: Vec<String>,
    pub ca_file: Option<PathBuf>,
    pub ca_data: Option<Vec<u8>>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for AuthProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProviderConfig")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret_set", &self.client_secret.is_some())
            .field("extra_scopes", &self.extra_scopes)
            .field("ca_file", &self.ca_file)
            .field("ca_data_set", &self.ca_data.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

impl AuthProviderConfig {
    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            issuer_url: self.issuer_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            extra_scopes: self.extra_scopes.clone(),
        }
    }

    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            ca_cert_file: self.ca_file.clone(),
            ca_cert_data: self.ca_data.clone(),
            skip_verify: false,
        }
    }
}

/// Parsed kubeconfig file
#[derive(Debug, Clone)]
pub struct Kubeconfig {
    path: PathBuf,
    document: Value,
}

impl Kubeconfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Kubeconfig(format!("cannot read {}: {e}", path.display())))?;
        let document = parse_document(path, &bytes)?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Find the user entry targeted by `target`
    pub fn resolve_target(&self, target: &ConfigEntryRef) -> Result<ResolvedTarget> {
        let by_user = match (target.precedence, &target.context, &target.user) {
            (SelectorPrecedence::User, _, Some(_)) | (_, None, Some(_)) => true,
            (_, Some(_), _) | (_, None, None) => false,
        };

        if target.context.is_some() && target.user.is_some() {
            tracing::debug!(precedence = %target.precedence, "Both context and user given");
        }

        let resolved = if by_user {
            let user = target.user.clone().unwrap_or_default();
            find_named(&self.document, "users", &user, "user")?;
            ResolvedTarget {
                context: None,
                user,
            }
        } else {
            let context_name = match &target.context {
                Some(name) => name.clone(),
                None => self
                    .document
                    .get("current-context")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::ConfigEntryNotFound("no context given and no current-context set".into())
                    })?,
            };
            let context = find_named(&self.document, "contexts", &context_name, "context")?;
            let user = context
                .get("context")
                .and_then(|c| c.get("user"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::ConfigEntryNotFound(format!("context {context_name} has no user"))
                })?
                .to_string();
            find_named(&self.document, "users", &user, "user")?;
            ResolvedTarget {
                context: Some(context_name),
                user,
            }
        };

        tracing::debug!(target = %resolved, "Resolved kubeconfig target");
        Ok(resolved)
    }

    /// Read the `oidc` auth-provider of `user`, if it has one
    pub fn auth_provider(&self, user: &str) -> Result<Option<AuthProviderConfig>> {
        let entry = find_named(&self.document, "users", user, "user")?;
        let Some(provider) = entry.get("user").and_then(|u| u.get("auth-provider")) else {
            return Ok(None);
        };

        let name = provider.get("name").and_then(Value::as_str).unwrap_or("");
        if name != AUTH_PROVIDER_NAME {
            return Err(Error::InvalidOption(format!(
                "user {user} uses auth-provider {name:?}, expected {AUTH_PROVIDER_NAME}"
            )));
        }

        let config = provider.get("config");
        let field = |key: &str| {
            config
                .and_then(|c| c.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let ca_data = field(KEY_CA_DATA)
            .map(|data| {
                STANDARD
                    .decode(data.trim())
                    .map_err(|e| Error::trust_material(KEY_CA_DATA, format!("invalid base64: {e}")))
            })
            .transpose()?;

        let base_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let ca_file = field(KEY_CA_FILE).map(|p| {
            let path = PathBuf::from(p);
            if path.is_relative() {
                base_dir.join(path)
            } else {
                path
            }
        });

        Ok(Some(AuthProviderConfig {
            issuer_url: field(KEY_ISSUER),
            client_id: field(KEY_CLIENT_ID),
            client_secret: field(KEY_CLIENT_SECRET),
            extra_scopes: field(KEY_EXTRA_SCOPES)
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ca_file,
            ca_data,
            id_token: field(KEY_ID_TOKEN),
            refresh_token: field(KEY_REFRESH_TOKEN),
        }))
    }
}

fn parse_document(path: &Path, bytes: &[u8]) -> Result<Value> {
    let document: Value = serde_yaml::from_slice(bytes)
        .map_err(|e| Error::Kubeconfig(format!("cannot parse {}: {e}", path.display())))?;
    if !document.is_mapping() {
        return Err(Error::Kubeconfig(format!(
            "{} is not a kubeconfig document",
            path.display()
        )));
    }
    Ok(document)
}

/// Index of the single entry called `name` in the `list` sequence
fn find_index(document: &Value, list: &str, name: &str, what: &str) -> Result<usize> {
    let matches: Vec<usize> = document
        .get(list)
        .and_then(Value::as_sequence)
        .map(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.get("name").and_then(Value::as_str) == Some(name))
                .map(|(i, _)| i)
                .collect()
        })
        .unwrap_or_default();

    match matches.as_slice() {
        [index] => Ok(*index),
        [] => Err(Error::ConfigEntryNotFound(format!("{what} {name}"))),
        many => Err(Error::ConfigEntryNotFound(format!(
            "{what} {name} is ambiguous ({} entries)",
            many.len()
        ))),
    }
}

fn find_named<'a>(document: &'a Value, list: &str, name: &str, what: &str) -> Result<&'a Value> {
    let index = find_index(document, list, name, what)?;
    document
        .get(list)
        .and_then(|l| l.get(index))
        .ok_or_else(|| Error::ConfigEntryNotFound(format!("{what} {name}")))
}

/// Kubeconfig path: explicit path, then the first `KUBECONFIG` entry, then
/// `~/.kube/config`.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    resolve_path_from(
        explicit,
        std::env::var_os("KUBECONFIG").as_deref(),
        std::env::var_os("HOME").as_deref(),
    )
}

fn resolve_path_from(
    explicit: Option<&Path>,
    kubeconfig_env: Option<&std::ffi::OsStr>,
    home: Option<&std::ffi::OsStr>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(list) = kubeconfig_env
        && let Some(first) = std::env::split_paths(list).find(|p| !p.as_os_str().is_empty())
    {
        return Ok(first);
    }
    home.map(|h| Path::new(h).join(DEFAULT_KUBECONFIG))
        .ok_or_else(|| Error::Kubeconfig("cannot locate kubeconfig: HOME is not set".into()))
}
