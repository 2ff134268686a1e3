//! Caching layer for a remote API that reports change tokens.
//!
//! This module provides:
//! - An in-memory TTL + LRU store with single-flight loading
//! - A ledger of the last server-knowledge token seen per cache key
//! - Pure merge strategies for reconciling cached collections with deltas
//! - A delta orchestrator choosing between full and incremental fetches
//! - Write-path invalidation of everything a mutation may have made stale

mod delta;
mod invalidation;
mod keys;
mod ledger;
pub(crate) mod lock;
pub mod merge;
mod store;
mod traits;

pub use delta::{DeltaOrchestrator, FetchOptions};
pub use invalidation::{
  ChangeKind, InvalidationCoordinator, InvalidationPlan, MutationImpact, TransactionChange,
  TransactionFacts,
};
pub use keys::{
  account_transactions_prefix, budget_account_transactions_prefix, detail_prefix,
  filtered_transactions_prefix, BudgetQueryKey,
};
pub use ledger::KnowledgeLedger;
pub use store::{CacheStats, CacheStore, WriteTicket};
pub use traits::{
  CachedRead, DeltaFetchResult, DeltaResponse, Grouped, MonthKeyed, Patchable, Syncable,
};
