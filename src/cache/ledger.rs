//! Server-knowledge ledger: the last change token seen per cache key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::ledger";

/// Records the highest server-knowledge token observed for each cache key.
///
/// Tokens never move backwards. A key with no token has never been fully
/// fetched, which forces the next fetch to be a full one. Cloning shares the
/// same records.
#[derive(Clone, Default)]
pub struct KnowledgeLedger {
  tokens: Arc<Mutex<HashMap<String, i64>>>,
}

impl KnowledgeLedger {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store `max(existing, token)` and return the recorded value.
  pub fn update(&self, key: &str, token: i64) -> i64 {
    let mut tokens = mutex_lock(&self.tokens, SOURCE, "update");
    let recorded = tokens.entry(key.to_string()).or_insert(token);
    if token > *recorded {
      *recorded = token;
    } else if token < *recorded {
      debug!(key, token, recorded = *recorded, "ignoring older server knowledge");
    }
    *recorded
  }

  pub fn get(&self, key: &str) -> Option<i64> {
    mutex_lock(&self.tokens, SOURCE, "get").get(key).copied()
  }

  /// Forget every token recorded for keys scoped to `budget_id`.
  pub fn clear_budget(&self, budget_id: &str) -> usize {
    let mut tokens = mutex_lock(&self.tokens, SOURCE, "clear_budget");
    let before = tokens.len();
    tokens.retain(|key, _| !key.split(':').any(|segment| segment == budget_id));
    before - tokens.len()
  }

  pub fn reset(&self) {
    mutex_lock(&self.tokens, SOURCE, "reset").clear();
  }

  pub fn len(&self) -> usize {
    mutex_lock(&self.tokens, SOURCE, "len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unknown_key_has_no_token() {
    let ledger = KnowledgeLedger::new();
    assert_eq!(ledger.get("accounts:list:b1"), None);
  }

  #[test]
  fn test_update_only_advances() {
    let ledger = KnowledgeLedger::new();
    assert_eq!(ledger.update("k", 10), 10);
    assert_eq!(ledger.update("k", 7), 10);
    assert_eq!(ledger.get("k"), Some(10));
    assert_eq!(ledger.update("k", 12), 12);
    assert_eq!(ledger.get("k"), Some(12));
  }

  #[test]
  fn test_clear_budget_only_touches_that_budget() {
    let ledger = KnowledgeLedger::new();
    ledger.update("accounts:list:b1", 1);
    ledger.update("payees:list:b1", 2);
    ledger.update("accounts:list:b2", 3);

    assert_eq!(ledger.clear_budget("b1"), 2);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get("accounts:list:b2"), Some(3));

    ledger.reset();
    assert!(ledger.is_empty());
  }
}
