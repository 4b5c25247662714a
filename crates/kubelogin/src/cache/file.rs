//! File-backed token cache

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{CacheKey, TokenCache};
use crate::atomic::write_atomic;
use crate::error::{Error, Result};
use crate::oidc::TokenSet;

/// One JSON file per fingerprint under a cache directory
#[derive(Debug, Clone)]
pub struct FileTokenCache {
    directory: PathBuf,
    clock_skew: Duration,
}

impl FileTokenCache {
    pub fn new(directory: impl Into<PathBuf>, clock_skew: Duration) -> Self {
        Self {
            directory: directory.into(),
            clock_skew,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{}.json", key.fingerprint()))
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<TokenSet> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::CacheCorruption(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl TokenCache for FileTokenCache {
    async fn lookup(&self, key: &CacheKey) -> Option<TokenSet> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(fingerprint = %key, cache.result = "miss", "No cached token");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read token cache");
                return None;
            }
        };

        let tokens = match Self::decode(&path, &bytes) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(fingerprint = %key, error = %e, "Ignoring token cache entry");
                return None;
            }
        };

        if tokens.is_expired(self.clock_skew) && tokens.refresh_token().is_none() {
            tracing::debug!(
                fingerprint = %key,
                cache.result = "miss",
                expiry = %tokens.expiry(),
                "Cached token expired without refresh token"
            );
            return None;
        }

        tracing::debug!(fingerprint = %key, cache.result = "hit", expiry = %tokens.expiry(), "Cached token found");
        Some(tokens)
    }

    async fn store(&self, key: &CacheKey, tokens: &TokenSet) -> Result<()> {
        let contents = serde_json::to_vec_pretty(tokens)
            .map_err(|e| Error::CacheStorage(format!("encode entry: {e}")))?;
        let directory = self.directory.clone();
        let path = self.entry_path(key);

        tokio::task::spawn_blocking(move || {
            create_private_dir(&directory)?;
            write_atomic(&path, &contents)
        })
        .await
        .map_err(|e| Error::CacheStorage(e.to_string()))?
        .map_err(|e| Error::CacheStorage(format!("{}: {e}", self.entry_path(key).display())))?;

        tracing::debug!(fingerprint = %key, "Token cache entry written");
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(fingerprint = %key, "Token cache entry removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CacheStorage(format!("{}: {e}", path.display()))),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn key(client: &str) -> CacheKey {
        CacheKey::new("https://idp.example/issuer", client, &["openid".into()], &[])
    }

    fn cache(dir: &Path) -> FileTokenCache {
        FileTokenCache::new(dir.join("oidc-login"), Duration::from_secs(10))
    }

    fn valid(id: &str, refresh: Option<&str>) -> TokenSet {
        TokenSet::for_tests(id, refresh, Utc::now() + chrono::Duration::hours(1))
    }

    fn expired(id: &str, refresh: Option<&str>) -> TokenSet {
        TokenSet::for_tests(id, refresh, Utc::now() - chrono::Duration::minutes(5))
    }

    #[tokio::test]
    async fn test_store_then_lookup_returns_same_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let tokens = valid("id-1", Some("refresh-1"));

        cache.store(&key("c1"), &tokens).await.unwrap();

        assert_eq!(cache.lookup(&key("c1")).await, Some(tokens));
        assert!(cache.lookup(&key("c2")).await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_missing_directory_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cache(dir.path()).lookup(&key("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        std::fs::create_dir_all(cache.directory()).unwrap();
        std::fs::write(cache.entry_path(&key("c1")), b"{\"id_token\": tru").unwrap();

        assert!(cache.lookup(&key("c1")).await.is_none());

        cache.store(&key("c1"), &valid("id-2", None)).await.unwrap();
        assert!(cache.lookup(&key("c1")).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.store(&key("c1"), &expired("id-1", None)).await.unwrap();

        assert!(cache.lookup(&key("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_with_refresh_token_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let tokens = expired("id-1", Some("refresh-1"));
        cache.store(&key("c1"), &tokens).await.unwrap();

        let found = cache.lookup(&key("c1")).await.unwrap();
        assert!(found.is_expired(Duration::from_secs(10)));
        assert_eq!(found.refresh_token(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_store_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.store(&key("c1"), &valid("first", None)).await.unwrap();
        cache.store(&key("c1"), &valid("second", None)).await.unwrap();

        let found = cache.lookup(&key("c1")).await.unwrap();
        assert_eq!(found.id_token(), "second");
        assert_eq!(std::fs::read_dir(cache.directory()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.store(&key("c1"), &valid("id-1", None)).await.unwrap();

        cache.invalidate(&key("c1")).await.unwrap();
        assert!(cache.lookup(&key("c1")).await.is_none());

        // Nothing left to remove
        cache.invalidate(&key("c1")).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_entry_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.store(&key("c1"), &valid("id-1", None)).await.unwrap();

        let file_mode = std::fs::metadata(cache.entry_path(&key("c1")))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(cache.directory()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
