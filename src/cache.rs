//! # Extraction Cache
//!
//! Memoizes citation-lookup outcomes per normalized link so the slow fallback
//! is not repeated. Two backends: an in-process LRU and a RocksDB store that
//! survives across runs. Entries expire after a fixed number of days.

use crate::extract::ExtractedIds;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

const CF_LOOKUPS: &str = "lookups";

/// Outcome of a previous fallback lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedLookup {
    /// Zero or several results; do not ask again until expiry.
    Inconclusive,
    /// Exactly one result.
    Found(ExtractedIds),
}

/// Key-value store for lookup outcomes, keyed by normalized link.
pub trait ExtractionCache: Send + Sync {
    /// Fetch an unexpired entry.
    fn get(&self, link: &str) -> Result<Option<CachedLookup>>;

    /// Store an entry with the cache's expiry.
    fn put(&self, link: &str, value: CachedLookup) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: CachedLookup,
    expires_at: i64,
}

impl CacheEntry {
    fn new(value: CachedLookup, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: (now + ttl).timestamp(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp()
    }
}

/// In-process LRU cache. Lost when the process exits.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn with_ttl_days(capacity: usize, days: i64) -> Self {
        Self::new(capacity, Duration::days(days))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ExtractionCache for MemoryCache {
    fn get(&self, link: &str) -> Result<Option<CachedLookup>> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(link) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(None),
        };
        if expired {
            entries.pop(link);
            return Ok(None);
        }
        Ok(entries.peek(link).map(|entry| entry.value.clone()))
    }

    fn put(&self, link: &str, value: CachedLookup) -> Result<()> {
        let entry = CacheEntry::new(value, Utc::now(), self.ttl);
        self.entries.lock().put(link.to_string(), entry);
        Ok(())
    }
}

/// RocksDB-backed cache that persists across runs.
pub struct RocksCache {
    db: DB,
    ttl: Duration,
}

impl RocksCache {
    /// Open (or create) the cache and drop entries that already expired.
    pub fn open(path: impl AsRef<Path>, ttl: Duration) -> Result<Self> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let cfs = vec![ColumnFamilyDescriptor::new(CF_LOOKUPS, Options::default())];
        let db = DB::open_cf_descriptors(&options, path, cfs)?;
        let cache = Self { db, ttl };
        let purged = cache.purge_expired()?;
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired lookup cache entries");
        }
        Ok(cache)
    }

    pub fn open_with_ttl_days(path: impl AsRef<Path>, days: i64) -> Result<Self> {
        Self::open(path, Duration::days(days))
    }

    /// Delete every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let cf = self.cf()?;
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let mut purged = 0;
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = entry?;
            let expired = match bincode::deserialize::<CacheEntry>(&value) {
                Ok(entry) => entry.is_expired(now),
                Err(_) => true,
            };
            if expired {
                batch.delete_cf(cf, key);
                purged += 1;
            }
        }
        if purged > 0 {
            self.db.write(batch)?;
        }
        Ok(purged)
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_LOOKUPS)
            .ok_or_else(|| anyhow!("missing lookup column family"))
    }
}

impl ExtractionCache for RocksCache {
    fn get(&self, link: &str) -> Result<Option<CachedLookup>> {
        let cf = self.cf()?;
        let Some(bytes) = self.db.get_cf(cf, link.as_bytes())? else {
            return Ok(None);
        };
        let entry: CacheEntry = bincode::deserialize(&bytes)?;
        if entry.is_expired(Utc::now()) {
            self.db.delete_cf(cf, link.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn put(&self, link: &str, value: CachedLookup) -> Result<()> {
        let cf = self.cf()?;
        let entry = CacheEntry::new(value, Utc::now(), self.ttl);
        self.db.put_cf(cf, link.as_bytes(), bincode::serialize(&entry)?)?;
        Ok(())
    }
}
