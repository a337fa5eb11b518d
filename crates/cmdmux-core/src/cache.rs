//! Generic key/value cache with per-entry expiry and explicit invalidation.
//!
//! Reads take a shared lock and writes an exclusive one, so a reader sees
//! either the old or the new entry. Expired entries are never returned by
//! `get`; invalidated entries are removed outright.
//!
//! Fetch races are handled with a ticket: take `fetch_ticket()` before the
//! live fetch and store the result with `insert_fresh()`. If an invalidation
//! happened in between, the write is dropped so the next read fetches again.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Invalidation epoch observed before a live fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Key/value cache with TTL
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    invalidations: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache whose entries live for `ttl` unless invalidated
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live (non-expired) value
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Get a value even if it has expired
    ///
    /// Returns the value and whether it is stale. Invalidated entries are gone
    /// and are never returned.
    pub fn get_allow_stale<Q>(&self, key: &Q) -> Option<(V, bool)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .map(|entry| (entry.value.clone(), entry.is_expired(now)))
    }

    /// Insert with the cache's default TTL
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Observe the invalidation epoch before starting a live fetch
    pub fn fetch_ticket(&self) -> FetchTicket {
        FetchTicket(self.invalidations.load(Ordering::Acquire))
    }

    /// Insert the result of a fetch started at `ticket`
    ///
    /// Returns false (and stores nothing) if any invalidation happened since
    /// the ticket was taken.
    pub fn insert_fresh(&self, key: K, value: V, ticket: FetchTicket) -> bool {
        let mut entries = self.entries.write();
        // Checked under the write lock; invalidations bump the epoch under it too.
        if self.invalidations.load(Ordering::Acquire) != ticket.0 {
            return false;
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        true
    }

    /// Remove an entry. Returns true if one was present.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entries = self.entries.write();
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        entries.remove(key).is_some()
    }

    /// Remove every entry. Returns the number removed.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write();
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Drop expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }
}
