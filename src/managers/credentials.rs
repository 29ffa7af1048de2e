//! Credential lookup with a bounded LRU cache.
//!
//! Credentials are resolved per pull-request host through a
//! [`CredentialStore`] and cached so repeated API calls don't hit the store.
//! The cache is cleared whenever configuration changes, since the configured
//! hosts or tokens may have changed with it.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Configuration;

/// Default number of hosts kept in the cache.
pub const DEFAULT_CREDENTIAL_CAPACITY: usize = 32;

/// Errors raised by credential stores.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The store could not be reached.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Credentials for one pull-request host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Host the credentials belong to.
    pub host: String,
    /// Account name, when configured.
    pub username: Option<String>,
    /// Access token.
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Backing store for host credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials for `host`, if any are configured.
    async fn lookup(&self, host: &str) -> Result<Option<Credentials>, CredentialError>;

    /// Drop anything the store itself has cached.
    async fn invalidate(&self) -> Result<(), CredentialError>;
}

/// Credentials taken from the `hosts` section of the live configuration.
pub struct ConfigCredentialStore {
    configuration: Configuration,
}

impl ConfigCredentialStore {
    /// Store reading from `configuration`.
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }
}

#[async_trait]
impl CredentialStore for ConfigCredentialStore {
    async fn lookup(&self, host: &str) -> Result<Option<Credentials>, CredentialError> {
        Ok(self.configuration.host(host).and_then(|settings| {
            settings.token.map(|token| Credentials {
                host: settings.host,
                username: settings.username,
                token,
            })
        }))
    }

    async fn invalidate(&self) -> Result<(), CredentialError> {
        Ok(())
    }
}

/// Hit/miss counters for debugging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the store.
    pub misses: u64,
    /// Times the cache was cleared.
    pub clears: u64,
}

/// LRU-bounded credential cache in front of a store.
pub struct CredentialCache {
    store: Arc<dyn CredentialStore>,
    entries: Mutex<LruCache<String, Credentials>>,
    stats: Mutex<CacheStats>,
}

impl CredentialCache {
    /// Cache holding at most `capacity` hosts (at least one).
    pub fn new(store: Arc<dyn CredentialStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Credentials for `host`, from the cache when possible.
    pub async fn get(&self, host: &str) -> Result<Option<Credentials>, CredentialError> {
        let key = host.to_ascii_lowercase();
        if let Some(found) = self.entries.lock().get(&key).cloned() {
            self.stats.lock().hits += 1;
            return Ok(Some(found));
        }
        self.stats.lock().misses += 1;

        let found = self.store.lookup(host).await?;
        if let Some(credentials) = &found {
            self.entries.lock().put(key, credentials.clone());
        }
        Ok(found)
    }

    /// Empty the cache, then invalidate the store.
    ///
    /// The local cache is always emptied; a store failure is still returned.
    pub async fn clear(&self) -> Result<(), CredentialError> {
        let dropped = {
            let mut entries = self.entries.lock();
            let len = entries.len();
            entries.clear();
            len
        };
        self.stats.lock().clears += 1;
        tracing::debug!(dropped, "credential cache cleared");

        self.store.invalidate().await
    }

    /// Number of cached hosts.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Hit, miss and clear counters.
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}
