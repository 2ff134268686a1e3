//! In-memory TTL + LRU cache store with single-flight loading.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lock::mutex_lock;
use crate::error::{ApiError, ApiResult};

const SOURCE: &str = "cache::store";

/// Type-erased cached value. Readers downcast back to the concrete type.
type CachedValue = Arc<dyn Any + Send + Sync>;

/// A load in progress. Followers clone and await the same future.
type PendingLoad = Shared<BoxFuture<'static, ApiResult<CachedValue>>>;

/// A single cached value with its absolute expiry.
///
/// Recency is tracked by the owning `LruCache`, the key by its slot.
struct CacheEntry {
  value: CachedValue,
  expires_at: Instant,
}

impl CacheEntry {
  fn new(value: CachedValue, ttl: Duration) -> Self {
    Self {
      value,
      expires_at: Instant::now() + ttl,
    }
  }

  fn is_expired(&self, now: Instant) -> bool {
    now >= self.expires_at
  }
}

struct StoreState {
  entries: LruCache<String, CacheEntry>,
  /// Loads currently in flight, tagged with the id of the load that owns the slot.
  pending: HashMap<String, (u64, PendingLoad)>,
  /// Keys with a fetch under way that intends to write, tagged like `pending`.
  reservations: HashMap<String, u64>,
  next_load_id: u64,
  hits: u64,
  misses: u64,
  evictions: u64,
  last_cleanup: Option<DateTime<Utc>>,
}

impl StoreState {
  fn insert(&mut self, key: String, entry: CacheEntry) {
    if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
      if evicted != key {
        self.evictions += 1;
        debug!(key = %evicted, "evicted least recently used cache entry");
      }
    }
  }

  /// Look up a live entry, dropping it if it has expired. Promotes on hit.
  fn live(&mut self, key: &str) -> Option<CachedValue> {
    let expired = self.entries.peek(key)?.is_expired(Instant::now());
    if expired {
      self.entries.pop(key);
      debug!(key, "cache entry expired");
      return None;
    }
    self.entries.get(key).map(|entry| Arc::clone(&entry.value))
  }

  fn remove(&mut self, key: &str) -> bool {
    self.reservations.remove(key);
    let pending = self.pending.remove(key).is_some();
    self.entries.pop(key).is_some() || pending
  }

  fn keys_matching(&self, predicate: impl Fn(&str) -> bool) -> Vec<String> {
    let mut keys: Vec<String> = self
      .entries
      .iter()
      .map(|(key, _)| key.clone())
      .filter(|key| predicate(key.as_str()))
      .collect();
    keys.extend(
      self
        .pending
        .keys()
        .filter(|key| predicate(key.as_str()))
        .cloned(),
    );
    keys.sort();
    keys.dedup();
    keys
  }

  fn revoke_reservations(&mut self, predicate: impl Fn(&str) -> bool) {
    self.reservations.retain(|key, _| !predicate(key.as_str()));
  }

  fn next_id(&mut self) -> u64 {
    let id = self.next_load_id;
    self.next_load_id += 1;
    id
  }
}

/// Claim to write a key once a fetch completes.
///
/// Any deletion covering the key, or a newer reservation of it, revokes the
/// claim; [`commit`](Self::commit) then stores nothing.
pub struct WriteTicket {
  store: CacheStore,
  key: String,
  id: u64,
}

impl WriteTicket {
  pub fn key(&self) -> &str {
    &self.key
  }

  /// Store `value` if the claim still holds. Returns whether it was stored.
  pub fn commit<T: Send + Sync + 'static>(self, value: Arc<T>, ttl: Duration) -> bool {
    let mut state = mutex_lock(&self.store.state, SOURCE, "ticket.commit");
    if state.reservations.get(&self.key) != Some(&self.id) {
      debug!(key = %self.key, "write claim revoked, result not stored");
      return false;
    }
    state.reservations.remove(&self.key);
    state.insert(self.key.clone(), CacheEntry::new(value, ttl));
    true
  }
}

impl Drop for WriteTicket {
  fn drop(&mut self) {
    let mut state = mutex_lock(&self.store.state, SOURCE, "ticket.drop");
    if state.reservations.get(&self.key) == Some(&self.id) {
      state.reservations.remove(&self.key);
    }
  }
}

/// Snapshot of cache counters for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
  pub size: usize,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub max_entries: usize,
  pub hit_rate: f64,
  pub last_cleanup: Option<DateTime<Utc>>,
}

/// Process-local key/value cache.
///
/// Entries expire after their TTL and the least recently accessed entry is
/// evicted once `max_entries` is reached. Cloning shares the same storage.
#[derive(Clone)]
pub struct CacheStore {
  state: Arc<Mutex<StoreState>>,
  max_entries: usize,
  default_ttl: Duration,
}

impl CacheStore {
  /// Create a store holding at most `max_entries` values (minimum 1).
  pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
    let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
    Self {
      state: Arc::new(Mutex::new(StoreState {
        entries: LruCache::new(capacity),
        pending: HashMap::new(),
        reservations: HashMap::new(),
        next_load_id: 0,
        hits: 0,
        misses: 0,
        evictions: 0,
        last_cleanup: None,
      })),
      max_entries: capacity.get(),
      default_ttl,
    }
  }

  /// TTL used when a caller does not pick one.
  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Insert or overwrite `key`, resetting its expiry and marking it most recently used.
  pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
    self.set_shared(key, Arc::new(value), ttl);
  }

  /// Like [`set`](Self::set) for a value that is already shared.
  pub fn set_shared<T: Send + Sync + 'static>(&self, key: &str, value: Arc<T>, ttl: Duration) {
    let mut state = mutex_lock(&self.state, SOURCE, "set");
    state.insert(key.to_string(), CacheEntry::new(value, ttl));
  }

  /// Get a live value. Counts a hit or a miss.
  ///
  /// A value stored under a different type is reported as a miss.
  pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
    let mut state = mutex_lock(&self.state, SOURCE, "get");
    match state.live(key).map(|value| value.downcast::<T>()) {
      Some(Ok(value)) => {
        state.hits += 1;
        Some(value)
      }
      Some(Err(_)) => {
        warn!(key, "cached value has an unexpected type");
        state.misses += 1;
        None
      }
      None => {
        state.misses += 1;
        None
      }
    }
  }

  /// Whether a live value exists, without touching counters or recency.
  pub fn has(&self, key: &str) -> bool {
    let state = mutex_lock(&self.state, SOURCE, "has");
    state
      .entries
      .peek(key)
      .is_some_and(|entry| !entry.is_expired(Instant::now()))
  }

  /// Read a live value without touching counters or recency.
  pub fn peek<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
    let state = mutex_lock(&self.state, SOURCE, "peek");
    let entry = state
      .entries
      .peek(key)
      .filter(|entry| !entry.is_expired(Instant::now()))?;
    Arc::clone(&entry.value).downcast::<T>().ok()
  }

  /// Claim `key` for a write that will follow a fetch.
  pub fn reserve(&self, key: &str) -> WriteTicket {
    let mut state = mutex_lock(&self.state, SOURCE, "reserve");
    let id = state.next_id();
    state.reservations.insert(key.to_string(), id);
    WriteTicket {
      store: self.clone(),
      key: key.to_string(),
      id,
    }
  }

  /// Return the live value for `key`, or run `loader` once and cache its result.
  ///
  /// Concurrent callers for a key whose load is still running wait on that
  /// same load instead of starting another. A failed load stores nothing and
  /// every waiter receives the error.
  pub async fn wrap<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> ApiResult<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let load = {
      let mut state = mutex_lock(&self.state, SOURCE, "wrap");
      if let Some(value) = state.live(key) {
        if let Ok(value) = value.downcast::<T>() {
          state.hits += 1;
          return Ok(value);
        }
        warn!(key, "cached value has an unexpected type, reloading");
      }
      state.misses += 1;

      if let Some((_, load)) = state.pending.get(key) {
        debug!(key, "joining in-flight load");
        load.clone()
      } else {
        let load_id = state.next_id();
        let load = self.start_load(key.to_string(), load_id, ttl, loader);
        state.pending.insert(key.to_string(), (load_id, load.clone()));
        load
      }
    };

    let value = load.await?;
    value
      .downcast::<T>()
      .map_err(|_| ApiError::Decode(format!("cached value for {key} has an unexpected type")))
  }

  fn start_load<T, F, Fut>(&self, key: String, load_id: u64, ttl: Duration, loader: F) -> PendingLoad
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let state = Arc::clone(&self.state);
    async move {
      debug!(key = %key, "loading cache entry");
      let result = loader().await.map(|value| Arc::new(value) as CachedValue);
      {
        let mut state = mutex_lock(&state, SOURCE, "wrap.complete");
        // Only the load that still owns the slot may publish; an invalidation
        // while loading discards the result.
        let owns_slot = state
          .pending
          .get(&key)
          .is_some_and(|(owner, _)| *owner == load_id);
        if owns_slot {
          state.pending.remove(&key);
          if let Ok(value) = &result {
            state.insert(key.clone(), CacheEntry::new(Arc::clone(value), ttl));
          }
        }
      }
      result
    }
    .boxed()
    .shared()
  }

  /// Remove one key. Returns whether anything was removed.
  pub fn delete(&self, key: &str) -> bool {
    mutex_lock(&self.state, SOURCE, "delete").remove(key)
  }

  /// Remove several keys, returning how many were present.
  pub fn delete_many<I, K>(&self, keys: I) -> usize
  where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
  {
    let mut state = mutex_lock(&self.state, SOURCE, "delete_many");
    keys
      .into_iter()
      .filter(|key| state.remove(key.as_ref()))
      .count()
  }

  /// Remove every key starting with `prefix`.
  pub fn delete_by_prefix(&self, prefix: &str) -> usize {
    let mut state = mutex_lock(&self.state, SOURCE, "delete_by_prefix");
    state.revoke_reservations(|key| key.starts_with(prefix));
    let keys = state.keys_matching(|key| key.starts_with(prefix));
    for key in &keys {
      state.remove(key);
    }
    debug!(prefix, removed = keys.len(), "deleted cache family");
    keys.len()
  }

  /// Remove every key scoped to `budget_id`.
  pub fn delete_by_budget_id(&self, budget_id: &str) -> usize {
    let mut state = mutex_lock(&self.state, SOURCE, "delete_by_budget_id");
    let in_budget = |key: &str| key.split(':').any(|segment| segment == budget_id);
    state.revoke_reservations(in_budget);
    let keys = state.keys_matching(in_budget);
    for key in &keys {
      state.remove(key);
    }
    keys.len()
  }

  /// Empty the store and reset every counter.
  pub fn clear(&self) {
    let mut state = mutex_lock(&self.state, SOURCE, "clear");
    state.entries.clear();
    state.pending.clear();
    state.reservations.clear();
    state.hits = 0;
    state.misses = 0;
    state.evictions = 0;
    state.last_cleanup = None;
  }

  /// Sweep expired entries. Returns how many were dropped.
  pub fn cleanup(&self) -> usize {
    let mut state = mutex_lock(&self.state, SOURCE, "cleanup");
    let now = Instant::now();
    let expired: Vec<String> = state
      .entries
      .iter()
      .filter(|(_, entry)| entry.is_expired(now))
      .map(|(key, _)| key.clone())
      .collect();
    for key in &expired {
      state.entries.pop(key);
    }
    state.last_cleanup = Some(Utc::now());
    expired.len()
  }

  /// Sweep expired entries every `interval` until the returned handle is aborted.
  pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
    let store = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let removed = store.cleanup();
        if removed > 0 {
          debug!(removed, "swept expired cache entries");
        }
      }
    })
  }

  pub fn get_stats(&self) -> CacheStats {
    let state = mutex_lock(&self.state, SOURCE, "get_stats");
    let lookups = state.hits + state.misses;
    CacheStats {
      size: state.entries.len(),
      hits: state.hits,
      misses: state.misses,
      evictions: state.evictions,
      max_entries: self.max_entries,
      hit_rate: if lookups == 0 {
        0.0
      } else {
        state.hits as f64 / lookups as f64
      },
      last_cleanup: state.last_cleanup,
    }
  }

  /// All stored keys, most recently used first. For debugging and tests.
  pub fn get_all_keys(&self) -> Vec<String> {
    let state = mutex_lock(&self.state, SOURCE, "get_all_keys");
    state.entries.iter().map(|(key, _)| key.clone()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const TTL: Duration = Duration::from_secs(60);

  fn store(max_entries: usize) -> CacheStore {
    CacheStore::new(max_entries, TTL)
  }

  #[tokio::test]
  async fn test_get_missing_key_counts_miss() {
    let store = store(10);
    assert!(store.get::<String>("nope").is_none());

    let stats = store.get_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
  }

  #[tokio::test]
  async fn test_set_then_get_counts_hit() {
    let store = store(10);
    store.set("k", "v".to_string(), TTL);

    assert_eq!(store.get::<String>("k").as_deref(), Some(&"v".to_string()));
    let stats = store.get_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.hit_rate, 1.0);
  }

  #[tokio::test]
  async fn test_wrong_type_is_a_miss() {
    let store = store(10);
    store.set("k", 7u32, TTL);
    assert!(store.get::<String>("k").is_none());
    assert_eq!(store.get_stats().misses, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entry_is_absent() {
    let store = store(10);
    store.set("k", 1u32, Duration::from_secs(5));
    assert!(store.has("k"));

    tokio::time::advance(Duration::from_secs(6)).await;

    assert!(!store.has("k"));
    assert!(store.get::<u32>("k").is_none());
    assert_eq!(store.get_stats().size, 0);
  }

  #[tokio::test]
  async fn test_has_does_not_touch_stats_or_recency() {
    let store = store(2);
    store.set("a", 1u32, TTL);
    store.set("b", 2u32, TTL);

    assert!(store.has("a"));
    assert!(!store.has("missing"));
    assert_eq!(store.peek::<u32>("a").as_deref(), Some(&1));
    let stats = store.get_stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);

    // "a" is still least recently used, so it goes first
    store.set("c", 3u32, TTL);
    assert!(!store.has("a"));
    assert!(store.has("b"));
  }

  #[tokio::test]
  async fn test_lru_evicts_least_recently_accessed() {
    let store = store(3);
    store.set("x", 1u32, TTL);
    store.set("y", 2u32, TTL);
    store.set("z", 3u32, TTL);

    assert!(store.get::<u32>("x").is_some());
    store.set("w", 4u32, TTL);

    assert!(store.has("x"));
    assert!(!store.has("y"));
    assert!(store.has("z"));
    assert!(store.has("w"));
    assert_eq!(store.get_stats().evictions, 1);
  }

  #[tokio::test]
  async fn test_overwrite_is_not_an_eviction() {
    let store = store(1);
    store.set("k", 1u32, TTL);
    store.set("k", 2u32, TTL);
    assert_eq!(store.get_stats().evictions, 0);
    assert_eq!(store.get::<u32>("k").as_deref(), Some(&2));
  }

  #[tokio::test]
  async fn test_wrap_sequential_invokes_loader_once() {
    let store = store(10);
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
      let calls = Arc::clone(&calls);
      let value = store
        .wrap("k", TTL, move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, ApiError>(42u32)
        })
        .await
        .unwrap();
      assert_eq!(*value, 42);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_wrap_concurrent_callers_share_one_load() {
    let store = store(10);
    let calls = Arc::new(AtomicUsize::new(0));

    let waiters = (0..8).map(|_| {
      let calls = Arc::clone(&calls);
      let store = store.clone();
      async move {
        store
          .wrap("k", TTL, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, ApiError>(format!("value-{n}"))
          })
          .await
      }
    });
    let results = futures::future::join_all(waiters).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap().as_str(), "value-0");
    }
    assert!(store.has("k"));
  }

  #[tokio::test]
  async fn test_wrap_error_stores_nothing_and_reaches_every_waiter() {
    let store = store(10);
    let calls = Arc::new(AtomicUsize::new(0));

    let waiters = (0..3).map(|_| {
      let calls = Arc::clone(&calls);
      let store = store.clone();
      async move {
        store
          .wrap("k", TTL, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<u32, _>(ApiError::RateLimited("slow down".into()))
          })
          .await
      }
    });
    let results = futures::future::join_all(waiters).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap_err(), ApiError::RateLimited("slow down".into()));
    }
    assert!(!store.has("k"));
    assert_eq!(store.get_stats().size, 0);

    // The failed load does not linger; the next call loads again.
    let value = store
      .wrap("k", TTL, || async { Ok::<_, ApiError>(5u32) })
      .await
      .unwrap();
    assert_eq!(*value, 5);
  }

  #[tokio::test]
  async fn test_delete_during_load_discards_result() {
    let store = store(10);
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let loading = {
      let store = store.clone();
      tokio::spawn(async move {
        store
          .wrap("k", TTL, move || async move {
            let _ = wait.await;
            Ok::<_, ApiError>(1u32)
          })
          .await
      })
    };
    tokio::task::yield_now().await;

    store.delete("k");
    let _ = release.send(());
    assert_eq!(*loading.await.unwrap().unwrap(), 1);
    assert!(!store.has("k"));
  }

  #[tokio::test]
  async fn test_reserved_write_commits_when_untouched() {
    let store = store(10);
    let ticket = store.reserve("accounts:list:b1");

    assert!(ticket.commit(Arc::new(1u32), TTL));
    assert_eq!(store.get::<u32>("accounts:list:b1").as_deref(), Some(&1));
  }

  #[tokio::test]
  async fn test_deletion_revokes_reserved_write() {
    let store = store(10);
    let by_key = store.reserve("accounts:list:b1");
    let by_prefix = store.reserve("transactions:account:b1:A:-:-");
    let by_budget = store.reserve("payees:list:b1");

    store.delete("accounts:list:b1");
    store.delete_by_prefix("transactions:account:b1:");
    store.delete_by_budget_id("b1");

    assert!(!by_key.commit(Arc::new(1u32), TTL));
    assert!(!by_prefix.commit(Arc::new(2u32), TTL));
    assert!(!by_budget.commit(Arc::new(3u32), TTL));
    assert!(store.get_all_keys().is_empty());
  }

  #[tokio::test]
  async fn test_newer_reservation_supersedes_older() {
    let store = store(10);
    let older = store.reserve("k");
    let newer = store.reserve("k");
    drop(older);

    assert!(newer.commit(Arc::new(2u32), TTL));
    assert_eq!(store.get::<u32>("k").as_deref(), Some(&2));
  }

  #[tokio::test]
  async fn test_delete_by_prefix_and_budget() {
    let store = store(10);
    store.set("transactions:account:b1:acct:-:-", 1u32, TTL);
    store.set("transactions:account:b1:acct:2024-01-01:-", 2u32, TTL);
    store.set("transactions:account:b1:acct2:-:-", 3u32, TTL);
    store.set("accounts:list:b2", 4u32, TTL);

    assert_eq!(store.delete_by_prefix("transactions:account:b1:acct:"), 2);
    assert!(store.has("transactions:account:b1:acct2:-:-"));

    assert_eq!(store.delete_by_budget_id("b2"), 1);
    assert!(!store.has("accounts:list:b2"));

    assert_eq!(store.delete_many(["transactions:account:b1:acct2:-:-", "missing"]), 1);
    assert!(store.get_all_keys().is_empty());
  }

  #[tokio::test]
  async fn test_clear_resets_everything() {
    let store = store(1);
    store.set("a", 1u32, TTL);
    store.set("b", 2u32, TTL);
    let _ = store.get::<u32>("b");
    let _ = store.get::<u32>("a");
    store.cleanup();

    store.clear();

    let stats = store.get_stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.evictions, 0);
    assert!(stats.last_cleanup.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cleanup_sweeps_expired_entries() {
    let store = store(10);
    store.set("short", 1u32, Duration::from_secs(1));
    store.set("long", 2u32, Duration::from_secs(100));

    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(store.cleanup(), 1);
    assert_eq!(store.get_all_keys(), vec!["long".to_string()]);
    assert!(store.get_stats().last_cleanup.is_some());
  }
}
