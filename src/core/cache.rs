use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CACHE_PREFIX, MAX_INDEX_CACHE_SECONDS};
use crate::core::db::KvStore;

#[derive(Serialize, Deserialize)]
struct CachedPage {
    body: String,
    expires_at: DateTime<Utc>,
}

/// Rendered page cache living in the shared store under `cache:page:`.
///
/// Entries are never invalidated by writes; they expire or get cleared.
pub struct PageCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl_seconds: i64) -> Self {
        Self {
            kv,
            ttl: Duration::seconds(ttl_seconds.clamp(0, MAX_INDEX_CACHE_SECONDS)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.ttl > Duration::zero()
    }

    fn page_key(key: &str) -> String {
        format!("{}page:{}", CACHE_PREFIX, key)
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        if !self.enabled() {
            return Ok(None);
        }
        let storage_key = Self::page_key(key);
        let Some(raw) = self.kv.get(&storage_key)? else {
            debug!(key, "page cache MISS");
            return Ok(None);
        };
        match serde_json::from_slice::<CachedPage>(&raw) {
            Ok(page) if page.expires_at > Utc::now() => {
                debug!(key, "page cache HIT");
                Ok(Some(page.body))
            }
            Ok(_) => {
                debug!(key, "page cache entry expired");
                self.kv.delete(&storage_key)?;
                Ok(None)
            }
            Err(e) => {
                warn!(key, error = %e, "dropping unreadable page cache entry");
                self.kv.delete(&storage_key)?;
                Ok(None)
            }
        }
    }

    pub fn put(&self, key: &str, body: &str) -> anyhow::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let page = CachedPage {
            body: body.to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        self.kv.set(&Self::page_key(key), &serde_json::to_vec(&page)?)
    }

    /// Drops every cached page. Returns how many entries were removed.
    pub fn clear(&self) -> anyhow::Result<usize> {
        let mut removed = 0;
        for key in self.kv.keys()? {
            if key.starts_with(CACHE_PREFIX) {
                self.kv.delete(&key)?;
                removed += 1;
            }
        }
        info!(removed, "page cache cleared");
        Ok(removed)
    }
}
