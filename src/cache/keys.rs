//! Cache key definitions.
//!
//! Keys render as `scope:action:budget_id:qualifiers…`. Filtered queries get
//! extra qualifiers so they never collide with the unfiltered collection.

use std::fmt;

use super::merge::normalize_month;

/// Placeholder for an absent filter qualifier.
const ANY: &str = "-";

/// Query key types for budgeting API calls.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BudgetQueryKey {
  /// All budgets visible to the token
  Budgets,
  /// One budget's settings and summary
  Budget { budget_id: String },
  Accounts { budget_id: String },
  Account { budget_id: String, account_id: String },
  /// Category groups with their categories
  Categories { budget_id: String },
  Category { budget_id: String, category_id: String },
  /// Budget-wide transactions, optionally filtered
  Transactions {
    budget_id: String,
    since_date: Option<String>,
    kind: Option<String>,
  },
  /// Transactions for a single account, optionally filtered
  AccountTransactions {
    budget_id: String,
    account_id: String,
    since_date: Option<String>,
    kind: Option<String>,
  },
  Months { budget_id: String },
  /// One month's detail; `month` is normalized to `YYYY-MM-01` when rendered
  Month { budget_id: String, month: String },
  Payees { budget_id: String },
}

impl BudgetQueryKey {
  pub fn budgets() -> Self {
    Self::Budgets
  }

  pub fn budget(budget_id: &str) -> Self {
    Self::Budget {
      budget_id: budget_id.to_string(),
    }
  }

  pub fn accounts(budget_id: &str) -> Self {
    Self::Accounts {
      budget_id: budget_id.to_string(),
    }
  }

  pub fn account(budget_id: &str, account_id: &str) -> Self {
    Self::Account {
      budget_id: budget_id.to_string(),
      account_id: account_id.to_string(),
    }
  }

  pub fn categories(budget_id: &str) -> Self {
    Self::Categories {
      budget_id: budget_id.to_string(),
    }
  }

  pub fn category(budget_id: &str, category_id: &str) -> Self {
    Self::Category {
      budget_id: budget_id.to_string(),
      category_id: category_id.to_string(),
    }
  }

  /// The unfiltered budget-wide transaction list.
  pub fn all_transactions(budget_id: &str) -> Self {
    Self::transactions(budget_id, None, None)
  }

  pub fn transactions(budget_id: &str, since_date: Option<&str>, kind: Option<&str>) -> Self {
    Self::Transactions {
      budget_id: budget_id.to_string(),
      since_date: since_date.map(String::from),
      kind: kind.map(String::from),
    }
  }

  pub fn account_transactions(
    budget_id: &str,
    account_id: &str,
    since_date: Option<&str>,
    kind: Option<&str>,
  ) -> Self {
    Self::AccountTransactions {
      budget_id: budget_id.to_string(),
      account_id: account_id.to_string(),
      since_date: since_date.map(String::from),
      kind: kind.map(String::from),
    }
  }

  pub fn months(budget_id: &str) -> Self {
    Self::Months {
      budget_id: budget_id.to_string(),
    }
  }

  pub fn month(budget_id: &str, month: &str) -> Self {
    Self::Month {
      budget_id: budget_id.to_string(),
      month: month.to_string(),
    }
  }

  pub fn payees(budget_id: &str) -> Self {
    Self::Payees {
      budget_id: budget_id.to_string(),
    }
  }

  /// Budget this key is scoped to, if any.
  pub fn budget_id(&self) -> Option<&str> {
    match self {
      Self::Budgets => None,
      Self::Budget { budget_id }
      | Self::Accounts { budget_id }
      | Self::Account { budget_id, .. }
      | Self::Categories { budget_id }
      | Self::Category { budget_id, .. }
      | Self::Transactions { budget_id, .. }
      | Self::AccountTransactions { budget_id, .. }
      | Self::Months { budget_id }
      | Self::Month { budget_id, .. }
      | Self::Payees { budget_id } => Some(budget_id),
    }
  }

  /// Rendered key string used by the cache store and ledger.
  pub fn cache_key(&self) -> String {
    self.to_string()
  }

  /// Human-readable description for logs.
  pub fn description(&self) -> String {
    match self {
      Self::Budgets => "all budgets".to_string(),
      Self::Budget { budget_id } => format!("budget {budget_id}"),
      Self::Accounts { budget_id } => format!("accounts in {budget_id}"),
      Self::Account { account_id, .. } => format!("account {account_id}"),
      Self::Categories { budget_id } => format!("categories in {budget_id}"),
      Self::Category { category_id, .. } => format!("category {category_id}"),
      Self::Transactions {
        budget_id,
        since_date,
        kind,
      } => match (since_date, kind) {
        (None, None) => format!("transactions in {budget_id}"),
        _ => format!("filtered transactions in {budget_id}"),
      },
      Self::AccountTransactions { account_id, .. } => {
        format!("transactions for account {account_id}")
      }
      Self::Months { budget_id } => format!("months in {budget_id}"),
      Self::Month { month, .. } => format!("month {month}"),
      Self::Payees { budget_id } => format!("payees in {budget_id}"),
    }
  }
}

impl fmt::Display for BudgetQueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Budgets => write!(f, "budgets:list"),
      Self::Budget { budget_id } => write!(f, "budget:get:{budget_id}"),
      Self::Accounts { budget_id } => write!(f, "accounts:list:{budget_id}"),
      Self::Account {
        budget_id,
        account_id,
      } => write!(f, "account:get:{budget_id}:{account_id}"),
      Self::Categories { budget_id } => write!(f, "categories:list:{budget_id}"),
      Self::Category {
        budget_id,
        category_id,
      } => write!(f, "category:get:{budget_id}:{category_id}"),
      Self::Transactions {
        budget_id,
        since_date: None,
        kind: None,
      } => write!(f, "transactions:list:{budget_id}:all"),
      Self::Transactions {
        budget_id,
        since_date,
        kind,
      } => write!(
        f,
        "{}{}:{}",
        filtered_transactions_prefix(budget_id),
        since_date.as_deref().unwrap_or(ANY),
        kind.as_deref().unwrap_or(ANY)
      ),
      Self::AccountTransactions {
        budget_id,
        account_id,
        since_date,
        kind,
      } => write!(
        f,
        "{}{}:{}",
        account_transactions_prefix(budget_id, account_id),
        since_date.as_deref().unwrap_or(ANY),
        kind.as_deref().unwrap_or(ANY)
      ),
      Self::Months { budget_id } => write!(f, "months:list:{budget_id}"),
      Self::Month { budget_id, month } => {
        let month = normalize_month(month).unwrap_or_else(|| month.clone());
        write!(f, "month:get:{budget_id}:{month}")
      }
      Self::Payees { budget_id } => write!(f, "payees:list:{budget_id}"),
    }
  }
}

/// Prefix shared by every filtered budget-wide transaction query.
pub fn filtered_transactions_prefix(budget_id: &str) -> String {
  format!("transactions:list:{budget_id}:filtered:")
}

/// Prefix shared by every transaction query scoped to one account.
///
/// The trailing separator keeps account `A` from matching account `AB`.
pub fn account_transactions_prefix(budget_id: &str, account_id: &str) -> String {
  format!("transactions:account:{budget_id}:{account_id}:")
}

/// Prefix of every per-account transaction query in a budget.
pub fn budget_account_transactions_prefix(budget_id: &str) -> String {
  format!("transactions:account:{budget_id}:")
}

/// Prefix of the single-entity detail keys of one scope (`account`,
/// `category`, `month`) in a budget.
pub fn detail_prefix(scope: &str, budget_id: &str) -> String {
  format!("{scope}:get:{budget_id}:")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_formats() {
    assert_eq!(BudgetQueryKey::budgets().cache_key(), "budgets:list");
    assert_eq!(BudgetQueryKey::accounts("b1").cache_key(), "accounts:list:b1");
    assert_eq!(
      BudgetQueryKey::account("b1", "A").cache_key(),
      "account:get:b1:A"
    );
    assert_eq!(
      BudgetQueryKey::all_transactions("b1").cache_key(),
      "transactions:list:b1:all"
    );
    assert_eq!(
      BudgetQueryKey::month("b1", "2024-03-15").cache_key(),
      "month:get:b1:2024-03-01"
    );
  }

  #[test]
  fn test_filtered_queries_are_distinct() {
    let unfiltered = BudgetQueryKey::all_transactions("b1").cache_key();
    let since = BudgetQueryKey::transactions("b1", Some("2024-01-01"), None).cache_key();
    let kind = BudgetQueryKey::transactions("b1", None, Some("unapproved")).cache_key();

    assert_ne!(unfiltered, since);
    assert_ne!(since, kind);
    assert_eq!(since, "transactions:list:b1:filtered:2024-01-01:-");
    assert!(kind.starts_with(&filtered_transactions_prefix("b1")));
  }

  #[test]
  fn test_account_family_shares_prefix() {
    let prefix = account_transactions_prefix("b1", "A");
    let plain = BudgetQueryKey::account_transactions("b1", "A", None, None).cache_key();
    let filtered =
      BudgetQueryKey::account_transactions("b1", "A", Some("2024-01-01"), Some("uncategorized"))
        .cache_key();
    let other = BudgetQueryKey::account_transactions("b1", "AB", None, None).cache_key();

    assert!(plain.starts_with(&prefix));
    assert!(filtered.starts_with(&prefix));
    assert!(!other.starts_with(&prefix));
  }

  #[test]
  fn test_budget_wide_families() {
    let budget_family = budget_account_transactions_prefix("b1");
    let detail = BudgetQueryKey::account("b1", "A").cache_key();

    assert!(account_transactions_prefix("b1", "A").starts_with(&budget_family));
    assert!(detail.starts_with(&detail_prefix("account", "b1")));
    assert!(!detail.starts_with(&detail_prefix("account", "b")));
    assert!(BudgetQueryKey::month("b1", "2024-03")
      .cache_key()
      .starts_with(&detail_prefix("month", "b1")));
  }

  #[test]
  fn test_budget_scope() {
    assert_eq!(BudgetQueryKey::budgets().budget_id(), None);
    assert_eq!(BudgetQueryKey::payees("b9").budget_id(), Some("b9"));
  }
}
