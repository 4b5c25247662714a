//! Credential Reconciler: writes token material back into the kubeconfig

use std::io;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use super::{
    KEY_CLIENT_ID, KEY_ID_TOKEN, KEY_ISSUER, KEY_REFRESH_TOKEN, find_index, parse_document,
};
use crate::atomic::write_atomic_with;
use crate::constants::AUTH_PROVIDER_NAME;
use crate::error::{Error, Result};

/// Credential fields written into the target user's auth-provider
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub id_token: String,
    pub refresh_token: Option<String>,
    /// Written only when the auth-provider has to be created
    pub issuer_url: String,
    /// Written only when the auth-provider has to be created
    pub client_id: String,
}

impl std::fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialUpdate")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Written,
    Unchanged,
}

/// Merge `update` into user `user` of the kubeconfig at `path`.
///
/// The file is re-read so concurrent edits to other entries are kept, and it
/// is replaced atomically only when a credential field changed.
pub fn reconcile(path: &Path, user: &str, update: &CredentialUpdate) -> Result<ReconcileOutcome> {
    reconcile_with(path, user, update, |_| Ok(()))
}

pub(crate) fn reconcile_with<F>(
    path: &Path,
    user: &str,
    update: &CredentialUpdate,
    before_rename: F,
) -> Result<ReconcileOutcome>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Kubeconfig(format!("cannot read {}: {e}", path.display())))?;
    let original = parse_document(path, &bytes)?;

    let mut document = original.clone();
    apply(&mut document, user, update)?;

    if document == original {
        tracing::info!(user, path = %path.display(), "Kubeconfig already up to date");
        return Ok(ReconcileOutcome::Unchanged);
    }

    let serialized = serde_yaml::to_string(&document)
        .map_err(|e| Error::Kubeconfig(format!("cannot encode kubeconfig: {e}")))?;
    write_atomic_with(path, serialized.as_bytes(), before_rename)
        .map_err(|e| Error::Kubeconfig(format!("cannot write {}: {e}", path.display())))?;

    tracing::info!(user, path = %path.display(), "Kubeconfig credentials updated");
    Ok(ReconcileOutcome::Written)
}

fn apply(document: &mut Value, user: &str, update: &CredentialUpdate) -> Result<()> {
    let index = find_index(document, "users", user, "user")?;
    let entry = document
        .get_mut("users")
        .and_then(|users| users.get_mut(index))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| Error::ConfigEntryNotFound(format!("user {user}")))?;

    let user_section = child_mapping(entry, "user", user)?;

    if !user_section.contains_key("auth-provider") {
        let mut config = Mapping::new();
        config.insert(KEY_ISSUER.into(), update.issuer_url.clone().into());
        config.insert(KEY_CLIENT_ID.into(), update.client_id.clone().into());
        let mut provider = Mapping::new();
        provider.insert("name".into(), AUTH_PROVIDER_NAME.into());
        provider.insert("config".into(), Value::Mapping(config));
        user_section.insert("auth-provider".into(), Value::Mapping(provider));
        tracing::debug!(user, "Created oidc auth-provider");
    }

    let provider = child_mapping(user_section, "auth-provider", user)?;
    let name = provider.get("name").and_then(Value::as_str).unwrap_or("");
    if name != AUTH_PROVIDER_NAME {
        return Err(Error::InvalidOption(format!(
            "user {user} uses auth-provider {name:?}, expected {AUTH_PROVIDER_NAME}"
        )));
    }

    let config = child_mapping(provider, "config", user)?;
    config.insert(KEY_ID_TOKEN.into(), update.id_token.clone().into());
    match &update.refresh_token {
        Some(token) => {
            config.insert(KEY_REFRESH_TOKEN.into(), token.clone().into());
        }
        None => {
            config.remove(KEY_REFRESH_TOKEN);
        }
    }
    Ok(())
}

/// Mapping stored under `key`, created when absent or null
fn child_mapping<'a>(parent: &'a mut Mapping, key: &str, user: &str) -> Result<&'a mut Mapping> {
    let slot = parent
        .entry(key.into())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if slot.is_null() {
        *slot = Value::Mapping(Mapping::new());
    }
    slot.as_mapping_mut().ok_or_else(|| {
        Error::Kubeconfig(format!("user {user}: {key} is not a mapping"))
    })
}
