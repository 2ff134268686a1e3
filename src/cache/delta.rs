//! Delta orchestrator: decides between full and incremental fetches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::ledger::KnowledgeLedger;
use super::store::{CacheStore, WriteTicket};
use super::traits::{DeltaFetchResult, DeltaResponse, Syncable};
use crate::error::ApiResult;

/// Per-call fetch options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
  /// TTL for the stored result; the store default when `None`
  pub ttl: Option<Duration>,
  /// Ignore any recorded token and refetch the whole collection
  pub force_full_refresh: bool,
}

impl FetchOptions {
  pub fn with_ttl(ttl: Duration) -> Self {
    Self {
      ttl: Some(ttl),
      ..Self::default()
    }
  }

  pub fn full_refresh() -> Self {
    Self {
      force_full_refresh: true,
      ..Self::default()
    }
  }
}

/// Orchestrates delta-aware fetches over a shared store and ledger.
///
/// The ledger alone decides whether an incremental request is attempted; the
/// store supplies the base a delta is merged into.
#[derive(Clone)]
pub struct DeltaOrchestrator {
  store: CacheStore,
  ledger: KnowledgeLedger,
}

impl DeltaOrchestrator {
  pub fn new(store: CacheStore, ledger: KnowledgeLedger) -> Self {
    Self { store, ledger }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn ledger(&self) -> &KnowledgeLedger {
    &self.ledger
  }

  /// Fetch a collection, merging with the entity's own strategy.
  pub async fn fetch<T, F, Fut>(
    &self,
    cache_key: &str,
    budget_id: &str,
    fetcher: F,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<T>>
  where
    T: Syncable,
    F: FnOnce(Option<i64>) -> Fut,
    Fut: Future<Output = ApiResult<DeltaResponse<T>>>,
  {
    self
      .fetch_with_delta(cache_key, budget_id, fetcher, T::merge, options)
      .await
  }

  /// Fetch a collection with incremental update support.
  ///
  /// 1. No recorded token (or a forced refresh): full fetch
  /// 2. Token and a live cached base: fetch changes since the token and merge
  /// 3. Token but the base expired: full fetch, there is nothing to merge into
  ///
  /// The fetcher receives the last known token, or `None` for a full fetch.
  /// A fetcher error leaves the store and ledger untouched.
  pub async fn fetch_with_delta<T, F, Fut, M>(
    &self,
    cache_key: &str,
    budget_id: &str,
    fetcher: F,
    merge: M,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<T>>
  where
    T: Syncable,
    F: FnOnce(Option<i64>) -> Fut,
    Fut: Future<Output = ApiResult<DeltaResponse<T>>>,
    M: FnOnce(&[T], &[T]) -> Vec<T>,
  {
    let ttl = options.ttl.unwrap_or_else(|| self.store.default_ttl());
    // Claim the key before reading the ledger; an invalidation from here on
    // revokes the claim and the result is returned but not stored.
    let ticket = self.store.reserve(cache_key);

    let last_known = if options.force_full_refresh {
      None
    } else {
      self.ledger.get(cache_key)
    };
    let Some(last_known) = last_known else {
      return self.full_fetch(ticket, budget_id, fetcher, ttl).await;
    };

    let Some(base) = self.store.get::<Vec<T>>(cache_key) else {
      debug!(
        key = cache_key,
        budget_id, "token recorded but no live base, falling back to full fetch"
      );
      return self.full_fetch(ticket, budget_id, fetcher, ttl).await;
    };

    let delta = fetcher(Some(last_known)).await?;

    if delta.server_knowledge <= last_known {
      debug!(
        key = cache_key,
        reported = delta.server_knowledge,
        recorded = last_known,
        "server knowledge did not advance"
      );
      return Ok(DeltaFetchResult::cached(base.to_vec(), last_known));
    }

    if delta.data.is_empty() {
      // Nothing changed; keep the base and its fresher token.
      let token = self
        .commit(ticket, Arc::clone(&base), delta.server_knowledge, ttl)
        .unwrap_or(delta.server_knowledge);
      debug!(key = cache_key, server_knowledge = token, "delta fetch returned no changes");
      return Ok(DeltaFetchResult::cached(base.to_vec(), token));
    }

    let merged = merge(base.as_slice(), delta.data.as_slice());
    debug!(
      key = cache_key,
      entity = T::entity_type(),
      base = base.len(),
      delta = delta.data.len(),
      merged = merged.len(),
      "merged delta into cached base"
    );
    let token = self
      .commit(ticket, Arc::new(merged.clone()), delta.server_knowledge, ttl)
      .unwrap_or(delta.server_knowledge);
    Ok(DeltaFetchResult::merged(merged, token))
  }

  async fn full_fetch<T, F, Fut>(
    &self,
    ticket: WriteTicket,
    budget_id: &str,
    fetcher: F,
    ttl: Duration,
  ) -> ApiResult<DeltaFetchResult<T>>
  where
    T: Syncable,
    F: FnOnce(Option<i64>) -> Fut,
    Fut: Future<Output = ApiResult<DeltaResponse<T>>>,
  {
    let response = fetcher(None).await?;
    debug!(
      key = ticket.key(),
      budget_id,
      entity = T::entity_type(),
      count = response.data.len(),
      server_knowledge = response.server_knowledge,
      "full fetch"
    );
    let token = self
      .commit(
        ticket,
        Arc::new(response.data.clone()),
        response.server_knowledge,
        ttl,
      )
      .unwrap_or(response.server_knowledge);
    Ok(DeltaFetchResult::full(response.data, token))
  }

  /// Store `data` and advance the ledger. Returns the recorded token, or
  /// `None` when the result was not stored: the ledger already holds a newer
  /// token, or the key was invalidated while fetching.
  fn commit<T: Syncable>(
    &self,
    ticket: WriteTicket,
    data: Arc<Vec<T>>,
    token: i64,
    ttl: Duration,
  ) -> Option<i64> {
    let cache_key = ticket.key().to_string();
    if let Some(recorded) = self.ledger.get(&cache_key) {
      if recorded > token {
        debug!(key = %cache_key, token, recorded, "newer server knowledge recorded, not storing");
        return None;
      }
    }
    if !ticket.commit(data, ttl) {
      return None;
    }
    Some(self.ledger.update(&cache_key, token))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::merge::merge_flat;
  use crate::cache::{BudgetQueryKey, InvalidationCoordinator, MutationImpact};
  use crate::error::ApiError;
  use std::sync::Mutex;

  #[derive(Debug, Clone, PartialEq)]
  struct Row {
    id: u32,
    name: &'static str,
    deleted: bool,
  }

  impl Syncable for Row {
    fn sync_key(&self) -> String {
      self.id.to_string()
    }

    fn is_deleted(&self) -> bool {
      self.deleted
    }

    fn entity_type() -> &'static str {
      "row"
    }
  }

  fn row(id: u32, name: &'static str) -> Row {
    Row {
      id,
      name,
      deleted: false,
    }
  }

  const KEY: &str = "rows:list:b1";

  fn orchestrator() -> DeltaOrchestrator {
    DeltaOrchestrator::new(
      CacheStore::new(100, Duration::from_secs(60)),
      KnowledgeLedger::new(),
    )
  }

  /// Fetcher answering with `response` and recording the token it was given.
  fn respond(
    seen: &Arc<Mutex<Vec<Option<i64>>>>,
    response: ApiResult<DeltaResponse<Row>>,
  ) -> impl FnOnce(Option<i64>) -> std::future::Ready<ApiResult<DeltaResponse<Row>>> {
    let seen = Arc::clone(seen);
    move |token| {
      seen.lock().unwrap().push(token);
      std::future::ready(response)
    }
  }

  #[tokio::test]
  async fn test_first_fetch_is_full() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let result = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    assert_eq!(result, DeltaFetchResult::full(vec![row(1, "A")], 10));
    assert_eq!(*seen.lock().unwrap(), vec![None]);
    assert_eq!(orch.ledger().get(KEY), Some(10));
  }

  #[tokio::test]
  async fn test_second_fetch_merges_delta() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let base = DeltaResponse::new(vec![row(1, "A"), row(2, "B")], 10);
    orch
      .fetch(KEY, "b1", respond(&seen, Ok(base)), FetchOptions::default())
      .await
      .unwrap();

    let delta = DeltaResponse::new(vec![row(1, "A2"), row(3, "C")], 11);
    let result = orch
      .fetch(KEY, "b1", respond(&seen, Ok(delta)), FetchOptions::default())
      .await
      .unwrap();

    assert!(result.was_cached);
    assert!(result.used_delta);
    assert_eq!(result.server_knowledge, 11);
    assert_eq!(result.data, vec![row(1, "A2"), row(2, "B"), row(3, "C")]);
    assert_eq!(*seen.lock().unwrap(), vec![None, Some(10)]);
    assert_eq!(
      orch.store().get::<Vec<Row>>(KEY).as_deref(),
      Some(&result.data)
    );
  }

  #[tokio::test]
  async fn test_empty_delta_returns_cached_base_and_advances_token() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    let result = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![], 12))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    assert_eq!(result, DeltaFetchResult::cached(vec![row(1, "A")], 12));
    assert_eq!(orch.ledger().get(KEY), Some(12));
  }

  #[tokio::test]
  async fn test_stale_token_skips_merge() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    let result = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(9, "Z")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    assert_eq!(result, DeltaFetchResult::cached(vec![row(1, "A")], 10));
  }

  #[tokio::test]
  async fn test_force_full_refresh_ignores_ledger() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    let result = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(2, "B")], 15))),
        FetchOptions::full_refresh(),
      )
      .await
      .unwrap();

    assert!(!result.used_delta);
    assert!(!result.was_cached);
    assert_eq!(result.data, vec![row(2, "B")]);
    assert_eq!(*seen.lock().unwrap(), vec![None, None]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_base_falls_back_to_full_fetch() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::with_ttl(Duration::from_secs(5)),
      )
      .await
      .unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;

    let result = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 11))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    assert!(!result.was_cached);
    assert_eq!(*seen.lock().unwrap(), vec![None, None]);
    assert_eq!(orch.ledger().get(KEY), Some(11));
  }

  #[tokio::test]
  async fn test_fetcher_error_leaves_state_untouched() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    let err = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Err(ApiError::Server {
          status: 500,
          message: "boom".into(),
        })),
        FetchOptions::default(),
      )
      .await
      .unwrap_err();

    assert!(matches!(err, ApiError::Server { status: 500, .. }));
    assert_eq!(orch.ledger().get(KEY), Some(10));
    assert_eq!(
      orch.store().get::<Vec<Row>>(KEY).as_deref(),
      Some(&vec![row(1, "A")])
    );
  }

  #[tokio::test]
  async fn test_first_fetch_error_records_nothing() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let result = orch
      .fetch_with_delta(
        KEY,
        "b1",
        respond(&seen, Err(ApiError::Unauthorized("bad token".into()))),
        merge_flat,
        FetchOptions::default(),
      )
      .await;

    assert!(result.is_err());
    assert_eq!(orch.ledger().get(KEY), None);
    assert!(!orch.store().has(KEY));
  }

  #[tokio::test]
  async fn test_mutation_during_delta_fetch_is_not_masked() {
    let orch = orchestrator();
    let coordinator = InvalidationCoordinator::new(orch.store().clone(), orch.ledger().clone());
    let key = BudgetQueryKey::all_transactions("b1").cache_key();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        &key,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let in_flight = orch.fetch(
      &key,
      "b1",
      move |_| async move {
        let _ = gate.await;
        Ok::<_, ApiError>(DeltaResponse::new(vec![row(1, "A2")], 11))
      },
      FetchOptions::default(),
    );
    let mutation = async {
      tokio::task::yield_now().await;
      coordinator.invalidate("b1", &MutationImpact::default(), Some(12), false);
      let _ = release.send(());
    };
    let (result, ()) = tokio::join!(in_flight, mutation);

    let result = result.unwrap();
    assert_eq!(result.server_knowledge, 11);
    assert!(!orch.store().has(&key));
    assert_eq!(orch.ledger().get(&key), Some(12));

    // The next read cannot build on the pre-mutation rows.
    let next = orch
      .fetch(
        &key,
        "b1",
        respond(
          &seen,
          Ok(DeltaResponse::new(vec![row(1, "A2"), row(2, "B")], 12)),
        ),
        FetchOptions::default(),
      )
      .await
      .unwrap();
    assert!(!next.was_cached);
    assert_eq!(next.data, vec![row(1, "A2"), row(2, "B")]);
    assert_eq!(seen.lock().unwrap().last(), Some(&None));
  }

  #[tokio::test]
  async fn test_invalidation_without_token_during_full_fetch() {
    let orch = orchestrator();
    let (release, gate) = tokio::sync::oneshot::channel::<()>();

    let in_flight = orch.fetch(
      KEY,
      "b1",
      move |_| async move {
        let _ = gate.await;
        Ok::<_, ApiError>(DeltaResponse::new(vec![row(1, "A")], 10))
      },
      FetchOptions::default(),
    );
    let mutation = async {
      tokio::task::yield_now().await;
      orch.store().delete_by_prefix("rows:");
      let _ = release.send(());
    };
    let (result, ()) = tokio::join!(in_flight, mutation);

    assert_eq!(result.unwrap(), DeltaFetchResult::full(vec![row(1, "A")], 10));
    assert!(!orch.store().has(KEY));
    assert_eq!(orch.ledger().get(KEY), None);
  }

  #[tokio::test]
  async fn test_older_full_fetch_keeps_newer_result() {
    let orch = orchestrator();
    let seen = Arc::new(Mutex::new(Vec::new()));
    orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "A")], 10))),
        FetchOptions::default(),
      )
      .await
      .unwrap();

    let result = orch
      .fetch(
        KEY,
        "b1",
        respond(&seen, Ok(DeltaResponse::new(vec![row(1, "old")], 9))),
        FetchOptions::full_refresh(),
      )
      .await
      .unwrap();

    assert_eq!(result, DeltaFetchResult::full(vec![row(1, "old")], 9));
    assert_eq!(orch.ledger().get(KEY), Some(10));
    assert_eq!(
      orch.store().get::<Vec<Row>>(KEY).as_deref(),
      Some(&vec![row(1, "A")])
    );
  }
}
