//! Sync implementations for budgeting types.

use crate::cache::merge::{merge_by_month, merge_grouped, merge_patched};
use crate::cache::{Grouped, MonthKeyed, Patchable, Syncable, TransactionFacts};

use super::types::{
  Account, BudgetSummary, Category, CategoryGroup, MonthSummary, NewTransaction, Payee,
  Transaction, TransactionUpdate,
};

// ============================================================================
// Flat collections
// ============================================================================

impl Syncable for BudgetSummary {
  fn sync_key(&self) -> String {
    self.id.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "budget"
  }
}

impl Syncable for Account {
  fn sync_key(&self) -> String {
    self.id.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "account"
  }
}

impl Syncable for Payee {
  fn sync_key(&self) -> String {
    self.id.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "payee"
  }
}

// ============================================================================
// Categories nested in groups
// ============================================================================

impl Syncable for Category {
  fn sync_key(&self) -> String {
    self.id.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "category"
  }
}

impl Syncable for CategoryGroup {
  fn sync_key(&self) -> String {
    self.id.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "category_group"
  }

  fn merge(base: &[Self], delta: &[Self]) -> Vec<Self> {
    merge_grouped(base, delta)
  }
}

impl Grouped for CategoryGroup {
  type Item = Category;

  fn items(&self) -> &[Category] {
    &self.categories
  }

  fn items_mut(&mut self) -> &mut Vec<Category> {
    &mut self.categories
  }

  fn owning_group(item: &Category) -> Option<String> {
    item.category_group_id.clone()
  }

  fn without_items(&self) -> Self {
    Self {
      categories: Vec::new(),
      ..self.clone()
    }
  }
}

// ============================================================================
// Transactions
// ============================================================================

impl Syncable for Transaction {
  fn sync_key(&self) -> String {
    self.id.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "transaction"
  }

  fn merge(base: &[Self], delta: &[Self]) -> Vec<Self> {
    merge_patched(base, delta)
  }
}

impl Patchable for Transaction {
  fn apply_patch(&mut self, newer: &Self) {
    // Names are only trustworthy while the ids they describe are unchanged.
    let account_name = keep_if_same(&self.account_id, &newer.account_id, &self.account_name);
    let payee_name = match (&self.payee_id, &newer.payee_id) {
      (Some(old), Some(new)) if old == new => self.payee_name.clone(),
      _ => None,
    };
    let category_name = match (&self.category_id, &newer.category_id) {
      (Some(old), Some(new)) if old == new => self.category_name.clone(),
      _ => None,
    };
    let subtransactions = self.subtransactions.take();

    *self = newer.clone();
    self.account_name = newer.account_name.clone().or(account_name);
    self.payee_name = newer.payee_name.clone().or(payee_name);
    self.category_name = newer.category_name.clone().or(category_name);
    if self.subtransactions.is_none() {
      self.subtransactions = subtransactions;
    }
  }
}

fn keep_if_same(old_id: &str, new_id: &str, value: &Option<String>) -> Option<String> {
  if old_id == new_id {
    value.clone()
  } else {
    None
  }
}

impl From<&Transaction> for TransactionFacts {
  fn from(txn: &Transaction) -> Self {
    Self {
      account_id: txn.account_id.clone(),
      date: txn.date.clone(),
      amount: txn.amount,
      cleared: txn.cleared.clone(),
      category_id: txn.category_id.clone(),
      transfer_account_id: txn.transfer_account_id.clone(),
      subtransaction_category_ids: txn
        .subtransactions
        .iter()
        .flatten()
        .filter(|sub| !sub.deleted)
        .map(|sub| sub.category_id.clone())
        .collect(),
      memo: txn.memo.clone(),
      payee_name: txn.payee_name.clone(),
    }
  }
}

impl From<&NewTransaction> for TransactionFacts {
  fn from(txn: &NewTransaction) -> Self {
    Self {
      account_id: txn.account_id.clone(),
      date: txn.date.clone(),
      amount: txn.amount,
      cleared: txn.cleared.clone().unwrap_or_else(|| "uncleared".to_string()),
      category_id: txn.category_id.clone(),
      transfer_account_id: None,
      subtransaction_category_ids: txn
        .subtransactions
        .iter()
        .map(|sub| sub.category_id.clone())
        .collect(),
      memo: txn.memo.clone(),
      payee_name: txn.payee_name.clone(),
    }
  }
}

impl TransactionUpdate {
  /// `facts` with the fields this update sets applied.
  pub fn apply_to(&self, facts: &TransactionFacts) -> TransactionFacts {
    let mut next = facts.clone();
    if let Some(account_id) = &self.account_id {
      next.account_id = account_id.clone();
    }
    if let Some(date) = &self.date {
      next.date = date.clone();
    }
    if let Some(amount) = self.amount {
      next.amount = amount;
    }
    if let Some(cleared) = &self.cleared {
      next.cleared = cleared.clone();
    }
    if self.category_id.is_some() {
      next.category_id = self.category_id.clone();
    }
    if self.memo.is_some() {
      next.memo = self.memo.clone();
    }
    next
  }
}

// ============================================================================
// Months
// ============================================================================

impl Syncable for MonthSummary {
  fn sync_key(&self) -> String {
    self.month.clone()
  }

  fn is_deleted(&self) -> bool {
    self.deleted
  }

  fn entity_type() -> &'static str {
    "month"
  }

  fn merge(base: &[Self], delta: &[Self]) -> Vec<Self> {
    merge_by_month(base, delta)
  }
}

impl MonthKeyed for MonthSummary {
  fn month(&self) -> &str {
    &self.month
  }
}
