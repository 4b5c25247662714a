//! Token cache
//!
//! Token material survives between invocations so a still-valid or refreshable
//! token skips interactive authentication. Stores are last-write-wins and a
//! write always replaces an entry wholesale.

mod file;
mod key;

use async_trait::async_trait;

pub use file::FileTokenCache;
pub use key::CacheKey;

use crate::error::Result;
use crate::oidc::TokenSet;

#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Usable entry for `key`.
    ///
    /// Missing, unreadable and corrupted entries are misses, and so is an
    /// expired entry without a refresh token.
    async fn lookup(&self, key: &CacheKey) -> Option<TokenSet>;

    /// Replace the entry for `key`
    async fn store(&self, key: &CacheKey, tokens: &TokenSet) -> Result<()>;

    /// Remove the entry for `key`, succeeding if there is none
    async fn invalidate(&self, key: &CacheKey) -> Result<()>;
}
