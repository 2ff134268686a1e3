//! Write-path invalidation.
//!
//! After a successful mutation, works out which cached collections and
//! details could now be stale and drops them.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info};

use super::keys::{
  account_transactions_prefix, budget_account_transactions_prefix, detail_prefix,
  filtered_transactions_prefix, BudgetQueryKey,
};
use super::ledger::KnowledgeLedger;
use super::merge::normalize_month;
use super::store::CacheStore;

/// The fields of a transaction that decide what a change invalidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFacts {
  pub account_id: String,
  /// `YYYY-MM-DD`
  pub date: String,
  pub amount: i64,
  pub cleared: String,
  pub category_id: Option<String>,
  pub transfer_account_id: Option<String>,
  /// Category of each sub-transaction of a split
  pub subtransaction_category_ids: Vec<Option<String>>,
  pub memo: Option<String>,
  pub payee_name: Option<String>,
}

impl TransactionFacts {
  fn categories(&self) -> BTreeSet<String> {
    self
      .category_id
      .iter()
      .chain(self.subtransaction_category_ids.iter().flatten())
      .cloned()
      .collect()
  }

  fn accounts(&self) -> impl Iterator<Item = &String> {
    std::iter::once(&self.account_id).chain(self.transfer_account_id.iter())
  }
}

/// Kind of write a [`TransactionChange`] describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeKind {
  #[default]
  Created,
  Updated,
  Deleted,
}

/// One transaction before and after a mutation.
///
/// `before` is `None` for creations, and for updates whose prior state was
/// not cached; `after` is `None` for deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionChange {
  pub kind: ChangeKind,
  pub before: Option<TransactionFacts>,
  pub after: Option<TransactionFacts>,
}

impl TransactionChange {
  pub fn created(after: TransactionFacts) -> Self {
    Self {
      kind: ChangeKind::Created,
      before: None,
      after: Some(after),
    }
  }

  pub fn updated(before: Option<TransactionFacts>, after: TransactionFacts) -> Self {
    Self {
      kind: ChangeKind::Updated,
      before,
      after: Some(after),
    }
  }

  pub fn deleted(before: TransactionFacts) -> Self {
    Self {
      kind: ChangeKind::Deleted,
      before: Some(before),
      after: None,
    }
  }

  /// An update where the previous state is unknown; anything may have changed.
  fn is_blind(&self) -> bool {
    self.kind == ChangeKind::Updated && self.before.is_none()
  }

  fn sides(&self) -> impl Iterator<Item = &TransactionFacts> {
    self.before.iter().chain(self.after.iter())
  }

  /// Whether `field` differs between the two sides. A missing side differs
  /// from any present one.
  fn differs<T: PartialEq>(&self, field: impl Fn(&TransactionFacts) -> T) -> bool {
    match (&self.before, &self.after) {
      (Some(before), Some(after)) => field(before) != field(after),
      (None, None) => false,
      _ => true,
    }
  }
}

/// What a mutation touched, and which aggregates it disturbed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationImpact {
  pub account_ids: BTreeSet<String>,
  /// Normalized `YYYY-MM-01` months
  pub month_keys: BTreeSet<String>,
  pub category_ids: BTreeSet<String>,
  /// Balances changed: account list and details are stale
  pub invalidate_accounts: bool,
  /// Activity changed: month list and details are stale
  pub invalidate_months: bool,
  /// Category activity or budgeted amounts changed
  pub invalidate_categories: bool,
  /// Some prior state was unknown, so the touched ids are incomplete and
  /// every per-entity key of the budget is stale
  pub prior_state_unknown: bool,
}

impl MutationImpact {
  /// Impact of a batch of transaction changes.
  pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a TransactionChange>) -> Self {
    let mut impact = Self::default();
    for change in changes {
      impact.absorb(change);
    }
    impact
  }

  fn absorb(&mut self, change: &TransactionChange) {
    if change.is_blind() {
      self.mark_unknown();
    }
    for side in change.sides() {
      self.account_ids.extend(side.accounts().cloned());
    }

    let amount = change.differs(|t| t.amount);
    let account = change.differs(|t| t.account_id.clone());
    let cleared = change.differs(|t| t.cleared.clone());
    let transfer = change.differs(|t| t.transfer_account_id.clone());
    let date = change.differs(|t| t.date.clone());
    let before_categories = change.before.as_ref().map(|t| t.categories()).unwrap_or_default();
    let after_categories = change.after.as_ref().map(|t| t.categories()).unwrap_or_default();
    let category = change.is_blind() || before_categories != after_categories;

    if amount || account || cleared || transfer {
      self.invalidate_accounts = true;
    }

    if category {
      self.invalidate_categories = true;
      self.category_ids.extend(before_categories);
      self.category_ids.extend(after_categories);
    }

    if amount || category || date {
      self.invalidate_months = true;
      self
        .month_keys
        .extend(change.sides().filter_map(|t| normalize_month(&t.date)));
    }
  }

  /// Impact of changing a category's budgeted amount for one month.
  pub fn category_budget(category_id: &str, month: &str) -> Self {
    Self {
      category_ids: BTreeSet::from([category_id.to_string()]),
      month_keys: normalize_month(month).into_iter().collect(),
      invalidate_categories: true,
      invalidate_months: true,
      ..Self::default()
    }
  }

  /// Impact of a write whose prior state is unknown: everything is stale.
  pub fn unknown() -> Self {
    let mut impact = Self::default();
    impact.mark_unknown();
    impact
  }

  /// Widen this impact to a write whose prior state is unknown.
  pub fn mark_unknown(&mut self) {
    self.invalidate_accounts = true;
    self.invalidate_months = true;
    self.invalidate_categories = true;
    self.prior_state_unknown = true;
  }

  /// Impact of opening a new account.
  pub fn account_created(account_id: &str) -> Self {
    Self {
      account_ids: BTreeSet::from([account_id.to_string()]),
      invalidate_accounts: true,
      ..Self::default()
    }
  }
}

/// Keys and key families to drop, deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
  pub keys: BTreeSet<String>,
  pub prefixes: BTreeSet<String>,
}

impl InvalidationPlan {
  pub fn for_impact(budget_id: &str, impact: &MutationImpact) -> Self {
    let mut plan = Self::default();

    plan
      .keys
      .insert(BudgetQueryKey::all_transactions(budget_id).cache_key());
    plan.prefixes.insert(filtered_transactions_prefix(budget_id));
    for account_id in &impact.account_ids {
      plan
        .prefixes
        .insert(account_transactions_prefix(budget_id, account_id));
    }

    if impact.invalidate_accounts {
      plan.keys.insert(BudgetQueryKey::accounts(budget_id).cache_key());
      for account_id in &impact.account_ids {
        plan
          .keys
          .insert(BudgetQueryKey::account(budget_id, account_id).cache_key());
      }
    }

    if impact.invalidate_categories {
      plan.keys.insert(BudgetQueryKey::categories(budget_id).cache_key());
      for category_id in &impact.category_ids {
        plan
          .keys
          .insert(BudgetQueryKey::category(budget_id, category_id).cache_key());
      }
    }

    if impact.invalidate_months {
      plan.keys.insert(BudgetQueryKey::months(budget_id).cache_key());
      for month in &impact.month_keys {
        plan
          .keys
          .insert(BudgetQueryKey::month(budget_id, month).cache_key());
      }
    }

    if impact.prior_state_unknown {
      plan
        .prefixes
        .insert(budget_account_transactions_prefix(budget_id));
      for scope in ["account", "category", "month"] {
        plan.prefixes.insert(detail_prefix(scope, budget_id));
      }
    }

    plan
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty() && self.prefixes.is_empty()
  }
}

impl fmt::Display for InvalidationPlan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "InvalidationPlan {{ keys: {}, prefixes: {} }}",
      self.keys.len(),
      self.prefixes.len()
    )
  }
}

/// Applies invalidation plans to the shared store and ledger.
#[derive(Clone)]
pub struct InvalidationCoordinator {
  store: CacheStore,
  ledger: KnowledgeLedger,
}

impl InvalidationCoordinator {
  pub fn new(store: CacheStore, ledger: KnowledgeLedger) -> Self {
    Self { store, ledger }
  }

  /// Drop everything `impact` may have made stale.
  ///
  /// `server_knowledge` is the token carried by the mutation response, if
  /// any; it advances the ledger of the budget-wide transaction list. A dry
  /// run touches nothing and returns the plan that would have been applied.
  pub fn invalidate(
    &self,
    budget_id: &str,
    impact: &MutationImpact,
    server_knowledge: Option<i64>,
    dry_run: bool,
  ) -> InvalidationPlan {
    let plan = InvalidationPlan::for_impact(budget_id, impact);
    if dry_run {
      debug!(budget_id, %plan, "dry run, skipping invalidation");
      return plan;
    }

    let removed = self.store.delete_many(&plan.keys);
    let removed_family: usize = plan
      .prefixes
      .iter()
      .map(|prefix| self.store.delete_by_prefix(prefix))
      .sum();

    if let Some(token) = server_knowledge {
      self
        .ledger
        .update(&BudgetQueryKey::all_transactions(budget_id).cache_key(), token);
    }

    info!(
      budget_id,
      keys = plan.keys.len(),
      prefixes = plan.prefixes.len(),
      removed = removed + removed_family,
      "invalidated cache after mutation"
    );
    plan
  }

  /// Drop everything cached for a budget, including its ledger tokens.
  pub fn invalidate_budget(&self, budget_id: &str) -> usize {
    self.ledger.clear_budget(budget_id);
    self.store.delete_by_budget_id(budget_id)
  }
}
