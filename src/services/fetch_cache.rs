//! Deduplicating cache for shared upstream fetches.
//!
//! Entries hold the *pending* fetch, so a sibling key that arrives while the
//! fetch is still running awaits the same future instead of issuing its own.
//! Failures are cached exactly like successes for as long as the entry lives.
//! Only settled entries are evicted; while every entry is still in flight the
//! cache grows past its capacity instead.

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::{
    future::Future,
    hash::Hash,
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

pub struct SharedFetchCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    capacity: NonZeroUsize,
    entries: Mutex<LruCache<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> SharedFetchCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// A cache holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            capacity,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the cached or in-flight result for `key`, starting `fetch`
    /// only when no entry exists.
    ///
    /// Hits never refresh an entry's position, so eviction drops the
    /// least-recently-inserted id.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let pending = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.peek(&key) {
                Some(existing) => existing.clone(),
                None => {
                    self.make_room(&mut entries);
                    let pending = fetch().boxed().shared();
                    entries.push(key, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Drop the oldest settled entries until one more fits.
    fn make_room(&self, entries: &mut LruCache<K, Shared<BoxFuture<'static, V>>>) {
        while entries.len() >= self.capacity.get() {
            let settled = entries
                .iter()
                .rev()
                .find(|(_, pending)| pending.peek().is_some())
                .map(|(key, _)| key.clone());
            match settled {
                Some(key) => {
                    entries.pop(&key);
                }
                None => break,
            }
        }
        if entries.len() >= entries.cap().get() {
            let grown = entries.cap().saturating_add(1);
            entries.resize(grown);
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}
