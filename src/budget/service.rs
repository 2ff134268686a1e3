//! Budget client with transparent caching.
//!
//! Collection reads go through the delta orchestrator, single-entity reads
//! through the store's single-flight `wrap`, and every write feeds the
//! invalidation coordinator.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::lock::mutex_lock;
use crate::cache::merge::normalize_month;
use crate::cache::{
  BudgetQueryKey, CacheStats, CacheStore, CachedRead, DeltaFetchResult, DeltaOrchestrator,
  DeltaResponse, FetchOptions, InvalidationCoordinator, InvalidationPlan, KnowledgeLedger,
  MutationImpact, TransactionChange, TransactionFacts,
};
use crate::config::{CacheConfig, TtlConfig};
use crate::error::ApiResult;

use super::client::BudgetApi;
use super::types::{
  Account, BudgetSummary, Category, CategoryGroup, MonthDetail, MonthSummary, NewAccount,
  NewTransaction, Payee, Transaction, TransactionFilter, TransactionUpdate,
};

const SOURCE: &str = "budget::service";

/// TTL per entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
  pub budgets: Duration,
  pub accounts: Duration,
  pub categories: Duration,
  pub transactions: Duration,
  pub months: Duration,
  pub payees: Duration,
}

impl CacheTtls {
  pub fn uniform(ttl: Duration) -> Self {
    Self {
      budgets: ttl,
      accounts: ttl,
      categories: ttl,
      transactions: ttl,
      months: ttl,
      payees: ttl,
    }
  }

  pub fn from_config(cache: &CacheConfig, ttl: &TtlConfig) -> Self {
    let pick = |secs: Option<u64>| Duration::from_secs(secs.unwrap_or(cache.default_ttl_secs));
    Self {
      budgets: pick(ttl.budgets),
      accounts: pick(ttl.accounts),
      categories: pick(ttl.categories),
      transactions: pick(ttl.transactions),
      months: pick(ttl.months),
      payees: pick(ttl.payees),
    }
  }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome<T> {
  /// What the server returned; `None` for a dry run
  pub data: Option<T>,
  pub dry_run: bool,
  /// Entries dropped, or for a dry run the entries that would have been
  pub plan: InvalidationPlan,
  pub server_knowledge: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStats {
  pub cache: CacheStats,
  pub ledger_entries: usize,
  pub default_budget: Option<String>,
}

/// Budgeting API client with caching, delta sync and write invalidation.
///
/// Cloning shares the cache, ledger and default budget.
#[derive(Clone)]
pub struct BudgetService {
  api: Arc<dyn BudgetApi>,
  orchestrator: DeltaOrchestrator,
  invalidation: InvalidationCoordinator,
  ttls: CacheTtls,
  warm_on_default_budget: bool,
  default_budget: Arc<Mutex<Option<String>>>,
}

impl BudgetService {
  pub fn new(
    api: Arc<dyn BudgetApi>,
    store: CacheStore,
    ledger: KnowledgeLedger,
    ttls: CacheTtls,
  ) -> Self {
    Self {
      api,
      orchestrator: DeltaOrchestrator::new(store.clone(), ledger.clone()),
      invalidation: InvalidationCoordinator::new(store, ledger),
      ttls,
      warm_on_default_budget: true,
      default_budget: Arc::default(),
    }
  }

  /// Whether selecting a default budget warms its collections.
  pub fn with_warming(mut self, enabled: bool) -> Self {
    self.warm_on_default_budget = enabled;
    self
  }

  pub fn store(&self) -> &CacheStore {
    self.orchestrator.store()
  }

  pub fn ledger(&self) -> &KnowledgeLedger {
    self.orchestrator.ledger()
  }

  fn options(options: FetchOptions, family_ttl: Duration) -> FetchOptions {
    FetchOptions {
      ttl: options.ttl.or(Some(family_ttl)),
      ..options
    }
  }

  // ==========================================================================
  // Collections
  // ==========================================================================

  /// All budgets. The list carries no change token, so it is cached for its
  /// TTL and refetched in full afterwards.
  pub async fn fetch_budgets(
    &self,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<BudgetSummary>> {
    let key = BudgetQueryKey::budgets().cache_key();
    let api = &self.api;
    self
      .orchestrator
      .fetch(
        &key,
        "",
        |last_known| async move {
          match last_known {
            Some(known) => Ok(DeltaResponse::new(Vec::new(), known)),
            None => api
              .list_budgets()
              .await
              .map(|budgets| DeltaResponse::new(budgets, 0)),
          }
        },
        Self::options(options, self.ttls.budgets),
      )
      .await
  }

  pub async fn fetch_accounts(
    &self,
    budget_id: &str,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<Account>> {
    let key = BudgetQueryKey::accounts(budget_id).cache_key();
    self
      .orchestrator
      .fetch(
        &key,
        budget_id,
        |last_known| self.api.list_accounts(budget_id, last_known),
        Self::options(options, self.ttls.accounts),
      )
      .await
  }

  /// Category groups with their categories.
  pub async fn fetch_categories(
    &self,
    budget_id: &str,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<CategoryGroup>> {
    let key = BudgetQueryKey::categories(budget_id).cache_key();
    self
      .orchestrator
      .fetch(
        &key,
        budget_id,
        |last_known| self.api.list_categories(budget_id, last_known),
        Self::options(options, self.ttls.categories),
      )
      .await
  }

  pub async fn fetch_transactions(
    &self,
    budget_id: &str,
    filter: &TransactionFilter,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<Transaction>> {
    let key = BudgetQueryKey::transactions(
      budget_id,
      filter.since_date.as_deref(),
      filter.kind.as_deref(),
    )
    .cache_key();
    self
      .orchestrator
      .fetch(
        &key,
        budget_id,
        |last_known| self.api.list_transactions(budget_id, filter, last_known),
        Self::options(options, self.ttls.transactions),
      )
      .await
  }

  pub async fn fetch_transactions_by_account(
    &self,
    budget_id: &str,
    account_id: &str,
    filter: &TransactionFilter,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<Transaction>> {
    let key = BudgetQueryKey::account_transactions(
      budget_id,
      account_id,
      filter.since_date.as_deref(),
      filter.kind.as_deref(),
    )
    .cache_key();
    self
      .orchestrator
      .fetch(
        &key,
        budget_id,
        |last_known| {
          self
            .api
            .list_account_transactions(budget_id, account_id, filter, last_known)
        },
        Self::options(options, self.ttls.transactions),
      )
      .await
  }

  pub async fn fetch_months(
    &self,
    budget_id: &str,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<MonthSummary>> {
    let key = BudgetQueryKey::months(budget_id).cache_key();
    self
      .orchestrator
      .fetch(
        &key,
        budget_id,
        |last_known| self.api.list_months(budget_id, last_known),
        Self::options(options, self.ttls.months),
      )
      .await
  }

  pub async fn fetch_payees(
    &self,
    budget_id: &str,
    options: FetchOptions,
  ) -> ApiResult<DeltaFetchResult<Payee>> {
    let key = BudgetQueryKey::payees(budget_id).cache_key();
    self
      .orchestrator
      .fetch(
        &key,
        budget_id,
        |last_known| self.api.list_payees(budget_id, last_known),
        Self::options(options, self.ttls.payees),
      )
      .await
  }

  // ==========================================================================
  // Single entities
  // ==========================================================================

  pub async fn get_budget(&self, budget_id: &str) -> ApiResult<CachedRead<BudgetSummary>> {
    let key = BudgetQueryKey::budget(budget_id).cache_key();
    let api = Arc::clone(&self.api);
    let budget_id = budget_id.to_string();
    self
      .read_through(&key, self.ttls.budgets, move || async move {
        api.get_budget(&budget_id).await
      })
      .await
  }

  pub async fn get_account(
    &self,
    budget_id: &str,
    account_id: &str,
  ) -> ApiResult<CachedRead<Account>> {
    let key = BudgetQueryKey::account(budget_id, account_id).cache_key();
    let api = Arc::clone(&self.api);
    let (budget_id, account_id) = (budget_id.to_string(), account_id.to_string());
    self
      .read_through(&key, self.ttls.accounts, move || async move {
        api.get_account(&budget_id, &account_id).await
      })
      .await
  }

  pub async fn get_category(
    &self,
    budget_id: &str,
    category_id: &str,
  ) -> ApiResult<CachedRead<Category>> {
    let key = BudgetQueryKey::category(budget_id, category_id).cache_key();
    let api = Arc::clone(&self.api);
    let (budget_id, category_id) = (budget_id.to_string(), category_id.to_string());
    self
      .read_through(&key, self.ttls.categories, move || async move {
        api.get_category(&budget_id, &category_id).await
      })
      .await
  }

  /// One month's detail. `month` may be `YYYY-MM` or any day of the month.
  pub async fn get_month(&self, budget_id: &str, month: &str) -> ApiResult<CachedRead<MonthDetail>> {
    let month = normalize_month(month).unwrap_or_else(|| month.to_string());
    let key = BudgetQueryKey::month(budget_id, &month).cache_key();
    let api = Arc::clone(&self.api);
    let budget_id = budget_id.to_string();
    self
      .read_through(&key, self.ttls.months, move || async move {
        api.get_month(&budget_id, &month).await
      })
      .await
  }

  async fn read_through<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    loader: F,
  ) -> ApiResult<CachedRead<T>>
  where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let was_cached = self.store().has(key);
    let value = self.store().wrap(key, ttl, loader).await?;
    debug!(key, was_cached, "read through cache");
    Ok(CachedRead {
      data: (*value).clone(),
      was_cached,
    })
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  pub async fn create_transactions(
    &self,
    budget_id: &str,
    transactions: &[NewTransaction],
    dry_run: bool,
  ) -> ApiResult<MutationOutcome<Vec<Transaction>>> {
    if dry_run {
      let changes: Vec<_> = transactions
        .iter()
        .map(|txn| TransactionChange::created(TransactionFacts::from(txn)))
        .collect();
      let impact = MutationImpact::from_changes(&changes);
      return Ok(self.settle(budget_id, &impact, None, None, true));
    }

    let saved = self.api.create_transactions(budget_id, transactions).await?;
    let changes: Vec<_> = saved
      .transactions
      .iter()
      .map(|txn| TransactionChange::created(TransactionFacts::from(txn)))
      .collect();
    let impact = MutationImpact::from_changes(&changes);
    Ok(self.settle(
      budget_id,
      &impact,
      Some(saved.transactions),
      saved.server_knowledge,
      false,
    ))
  }

  /// Update transactions in bulk.
  ///
  /// The previous state of each transaction is looked up in the cached
  /// budget-wide list; an update whose previous state is not cached is
  /// treated as having changed everything.
  pub async fn update_transactions(
    &self,
    budget_id: &str,
    updates: &[TransactionUpdate],
    dry_run: bool,
  ) -> ApiResult<MutationOutcome<Vec<Transaction>>> {
    let known = self.cached_facts(budget_id, updates.iter().map(|u| u.id.as_str()));

    if dry_run {
      let changes: Vec<_> = updates
        .iter()
        .filter_map(|update| {
          let before = known.get(&update.id)?;
          Some(TransactionChange::updated(
            Some(before.clone()),
            update.apply_to(before),
          ))
        })
        .collect();
      let mut impact = MutationImpact::from_changes(&changes);
      if changes.len() < updates.len() {
        impact.mark_unknown();
      }
      return Ok(self.settle(budget_id, &impact, None, None, true));
    }

    let saved = self.api.update_transactions(budget_id, updates).await?;
    let changes: Vec<_> = saved
      .transactions
      .iter()
      .map(|txn| TransactionChange::updated(known.get(&txn.id).cloned(), TransactionFacts::from(txn)))
      .collect();
    let impact = MutationImpact::from_changes(&changes);
    Ok(self.settle(
      budget_id,
      &impact,
      Some(saved.transactions),
      saved.server_knowledge,
      false,
    ))
  }

  pub async fn delete_transaction(
    &self,
    budget_id: &str,
    transaction_id: &str,
    dry_run: bool,
  ) -> ApiResult<MutationOutcome<Transaction>> {
    if dry_run {
      let impact = match self.cached_facts(budget_id, [transaction_id]).remove(transaction_id) {
        Some(before) => MutationImpact::from_changes([&TransactionChange::deleted(before)]),
        None => MutationImpact::unknown(),
      };
      return Ok(self.settle(budget_id, &impact, None, None, true));
    }

    let saved = self.api.delete_transaction(budget_id, transaction_id).await?;
    let deleted = saved.transactions.into_iter().next();
    // The server echoes the transaction as it was before deletion.
    let impact = match &deleted {
      Some(txn) => {
        MutationImpact::from_changes([&TransactionChange::deleted(TransactionFacts::from(txn))])
      }
      None => MutationImpact::unknown(),
    };
    Ok(self.settle(budget_id, &impact, deleted, saved.server_knowledge, false))
  }

  /// Set the budgeted amount of a category for one month.
  pub async fn update_category_budget(
    &self,
    budget_id: &str,
    month: &str,
    category_id: &str,
    budgeted: i64,
    dry_run: bool,
  ) -> ApiResult<MutationOutcome<Category>> {
    let month = normalize_month(month).unwrap_or_else(|| month.to_string());
    let impact = MutationImpact::category_budget(category_id, &month);
    if dry_run {
      return Ok(self.settle(budget_id, &impact, None, None, true));
    }

    let saved = self
      .api
      .update_category_budget(budget_id, &month, category_id, budgeted)
      .await?;
    Ok(self.settle(
      budget_id,
      &impact,
      Some(saved.category),
      saved.server_knowledge,
      false,
    ))
  }

  pub async fn create_account(
    &self,
    budget_id: &str,
    account: &NewAccount,
    dry_run: bool,
  ) -> ApiResult<MutationOutcome<Account>> {
    if dry_run {
      let impact = MutationImpact {
        invalidate_accounts: true,
        ..MutationImpact::default()
      };
      return Ok(self.settle(budget_id, &impact, None, None, true));
    }

    let created = self.api.create_account(budget_id, account).await?;
    let impact = MutationImpact::account_created(&created.id);
    Ok(self.settle(budget_id, &impact, Some(created), None, false))
  }

  fn settle<T>(
    &self,
    budget_id: &str,
    impact: &MutationImpact,
    data: Option<T>,
    server_knowledge: Option<i64>,
    dry_run: bool,
  ) -> MutationOutcome<T> {
    let plan = self
      .invalidation
      .invalidate(budget_id, impact, server_knowledge, dry_run);
    MutationOutcome {
      data,
      dry_run,
      plan,
      server_knowledge,
    }
  }

  /// Facts of the given transactions from the cached budget-wide list.
  fn cached_facts<'a>(
    &self,
    budget_id: &str,
    ids: impl IntoIterator<Item = &'a str>,
  ) -> HashMap<String, TransactionFacts> {
    let wanted: HashSet<&str> = ids.into_iter().collect();
    let key = BudgetQueryKey::all_transactions(budget_id).cache_key();
    let Some(transactions) = self.store().peek::<Vec<Transaction>>(&key) else {
      return HashMap::new();
    };
    transactions
      .iter()
      .filter(|txn| wanted.contains(txn.id.as_str()))
      .map(|txn| (txn.id.clone(), TransactionFacts::from(txn)))
      .collect()
  }

  // ==========================================================================
  // Default budget, warming and housekeeping
  // ==========================================================================

  pub fn default_budget(&self) -> Option<String> {
    mutex_lock(&self.default_budget, SOURCE, "default_budget").clone()
  }

  /// Select the budget used when none is given and warm its collections on a
  /// background task. Warming failures are logged, never returned.
  pub fn set_default_budget(&self, budget_id: &str) -> Option<JoinHandle<()>> {
    *mutex_lock(&self.default_budget, SOURCE, "set_default_budget") = Some(budget_id.to_string());
    if !self.warm_on_default_budget {
      return None;
    }

    let service = self.clone();
    let budget_id = budget_id.to_string();
    Some(tokio::spawn(async move {
      if let Err(e) = service.warm_cache(&budget_id).await {
        warn!(budget_id = %budget_id, error = %e, "cache warming failed");
      }
    }))
  }

  /// Load the collections most reads start from.
  pub async fn warm_cache(&self, budget_id: &str) -> ApiResult<()> {
    info!(budget_id, "warming cache");
    let options = FetchOptions::default();
    let (accounts, categories, payees, months) = tokio::try_join!(
      self.fetch_accounts(budget_id, options),
      self.fetch_categories(budget_id, options),
      self.fetch_payees(budget_id, options),
      self.fetch_months(budget_id, options),
    )?;
    info!(
      budget_id,
      accounts = accounts.data.len(),
      category_groups = categories.data.len(),
      payees = payees.data.len(),
      months = months.data.len(),
      "cache warmed"
    );
    Ok(())
  }

  /// Drop everything cached for one budget.
  pub fn refresh_budget(&self, budget_id: &str) -> usize {
    let removed = self.invalidation.invalidate_budget(budget_id);
    info!(budget_id, removed, "dropped cached budget data");
    removed
  }

  pub fn clear_cache(&self) {
    self.store().clear();
    self.ledger().reset();
    info!("cache cleared");
  }

  pub fn stats(&self) -> ServiceStats {
    ServiceStats {
      cache: self.store().get_stats(),
      ledger_entries: self.ledger().len(),
      default_budget: self.default_budget(),
    }
  }
}
