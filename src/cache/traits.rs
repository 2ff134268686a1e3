//! Core traits and types for the delta-sync cache.

use serde::Serialize;

/// An entity that can be cached and reconciled with incremental deltas.
///
/// Implementors provide a stable identity for matching base and delta
/// entries, and report whether a delta element is a tombstone.
pub trait Syncable: Clone + Send + Sync + 'static {
  /// Stable identity used to match a delta entry against the cached base.
  fn sync_key(&self) -> String;

  /// Whether this element signals removal rather than an upsert.
  fn is_deleted(&self) -> bool;

  /// Entity type name used in logs (e.g., "account", "transaction").
  fn entity_type() -> &'static str;

  /// Reconcile a cached base collection with a delta.
  ///
  /// Defaults to the flat id-keyed strategy.
  fn merge(base: &[Self], delta: &[Self]) -> Vec<Self> {
    super::merge::merge_flat(base, delta)
  }
}

/// Entities where some responses carry fewer fields than others.
///
/// `apply_patch` folds a (possibly thinner) newer copy into `self`, keeping
/// any detail fields the newer copy leaves out.
pub trait Patchable: Syncable {
  fn apply_patch(&mut self, newer: &Self);
}

/// Entities keyed by calendar month instead of an opaque id.
pub trait MonthKeyed: Syncable {
  /// Raw month string as reported by the API.
  fn month(&self) -> &str;
}

/// A parent entity owning a nested collection (e.g., category groups).
pub trait Grouped: Syncable {
  type Item: Syncable;

  fn items(&self) -> &[Self::Item];

  fn items_mut(&mut self) -> &mut Vec<Self::Item>;

  /// Id of the group an item belongs to, if the item records it.
  fn owning_group(item: &Self::Item) -> Option<String>;

  /// A copy of this group's own fields with no items.
  fn without_items(&self) -> Self;
}

/// Page of data returned by the remote API together with its change token.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaResponse<T> {
  pub data: Vec<T>,
  pub server_knowledge: i64,
}

impl<T> DeltaResponse<T> {
  pub fn new(data: Vec<T>, server_knowledge: i64) -> Self {
    Self {
      data,
      server_knowledge,
    }
  }
}

/// Result of a delta-aware fetch, including where the data came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaFetchResult<T> {
  /// The reconciled collection
  pub data: Vec<T>,
  /// A cached base existed and was used
  pub was_cached: bool,
  /// A non-empty delta was merged into the cached base
  pub used_delta: bool,
  /// Token recorded for the key after this fetch
  pub server_knowledge: i64,
}

impl<T> DeltaFetchResult<T> {
  /// Fresh data from a full fetch.
  pub fn full(data: Vec<T>, server_knowledge: i64) -> Self {
    Self {
      data,
      was_cached: false,
      used_delta: false,
      server_knowledge,
    }
  }

  /// Cached base returned as-is.
  pub fn cached(data: Vec<T>, server_knowledge: i64) -> Self {
    Self {
      data,
      was_cached: true,
      used_delta: false,
      server_knowledge,
    }
  }

  /// Cached base with a delta merged in.
  pub fn merged(data: Vec<T>, server_knowledge: i64) -> Self {
    Self {
      data,
      was_cached: true,
      used_delta: true,
      server_knowledge,
    }
  }
}

/// Result of a single-entity read through the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRead<T> {
  pub data: T,
  pub was_cached: bool,
}
