//! Serde envelopes matching the budgeting API's wire format.
//!
//! Every response wraps its payload in `{"data": {...}}`; collection
//! endpoints that support deltas also report `server_knowledge` there.

use serde::{Deserialize, Serialize};

use super::types::{
  Account, BudgetSummary, Category, CategoryGroup, MonthDetail, MonthSummary, NewAccount,
  NewTransaction, Payee, Transaction, TransactionUpdate,
};

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
  pub data: T,
}

// ============================================================================
// Error body
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub detail: String,
}

impl ApiErrorDetail {
  pub fn message(&self) -> String {
    match (self.name.is_empty(), self.detail.is_empty()) {
      (false, false) => format!("{}: {}", self.name, self.detail),
      (false, true) => self.name.clone(),
      _ => self.detail.clone(),
    }
  }
}

// ============================================================================
// Read responses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiBudgets {
  pub budgets: Vec<BudgetSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ApiBudget {
  pub budget: BudgetSummary,
}

#[derive(Debug, Deserialize)]
pub struct ApiAccounts {
  pub accounts: Vec<Account>,
  pub server_knowledge: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiAccount {
  pub account: Account,
}

#[derive(Debug, Deserialize)]
pub struct ApiCategoryGroups {
  pub category_groups: Vec<CategoryGroup>,
  pub server_knowledge: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiCategory {
  pub category: Category,
  pub server_knowledge: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTransactions {
  pub transactions: Vec<Transaction>,
  pub server_knowledge: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiMonths {
  pub months: Vec<MonthSummary>,
  pub server_knowledge: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiMonth {
  pub month: MonthDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiPayees {
  pub payees: Vec<Payee>,
  pub server_knowledge: i64,
}

// ============================================================================
// Write requests and responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiNewTransactions<'a> {
  pub transactions: &'a [NewTransaction],
}

#[derive(Debug, Serialize)]
pub struct ApiTransactionUpdates<'a> {
  pub transactions: &'a [TransactionUpdate],
}

#[derive(Debug, Serialize)]
pub struct ApiNewAccount<'a> {
  pub account: &'a NewAccount,
}

#[derive(Debug, Serialize)]
pub struct ApiCategoryBudget {
  pub category: ApiBudgetedAmount,
}

#[derive(Debug, Serialize)]
pub struct ApiBudgetedAmount {
  pub budgeted: i64,
}

/// Response of create and bulk update
#[derive(Debug, Deserialize)]
pub struct ApiSaveTransactions {
  #[serde(default)]
  pub transactions: Vec<Transaction>,
  /// Set instead of `transactions` when a single transaction was written
  pub transaction: Option<Transaction>,
  #[serde(default)]
  pub duplicate_import_ids: Vec<String>,
  pub server_knowledge: Option<i64>,
}

impl ApiSaveTransactions {
  pub fn into_transactions(self) -> Vec<Transaction> {
    let mut transactions = self.transactions;
    transactions.extend(self.transaction);
    transactions
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_delta_envelope() {
    let body = r#"{"data":{"accounts":[{"id":"a1","name":"Checking","type":"checking",
      "on_budget":true,"closed":false,"note":null,"balance":1000,"cleared_balance":1000,
      "uncleared_balance":0,"transfer_payee_id":null,"deleted":false}],"server_knowledge":42}}"#;

    let parsed: Envelope<ApiAccounts> = serde_json::from_str(body).unwrap();
    assert_eq!(parsed.data.server_knowledge, 42);
    assert_eq!(parsed.data.accounts[0].account_type, "checking");
  }

  #[test]
  fn test_parse_single_saved_transaction() {
    let body = r#"{"data":{"transaction":{"id":"t1","date":"2024-03-01","amount":-500,
      "memo":null,"cleared":"uncleared","approved":true,"flag_color":null,"account_id":"A",
      "payee_id":null,"category_id":null,"transfer_account_id":null,
      "transfer_transaction_id":null,"matched_transaction_id":null,"import_id":null,
      "deleted":true},"server_knowledge":7}}"#;

    let parsed: Envelope<ApiSaveTransactions> = serde_json::from_str(body).unwrap();
    assert_eq!(parsed.data.server_knowledge, Some(7));
    let transactions = parsed.data.into_transactions();
    assert_eq!(transactions.len(), 1);
    assert!(transactions[0].deleted);
  }

  #[test]
  fn test_error_message() {
    let body = r#"{"error":{"id":"429","name":"too_many_requests","detail":"Slow down"}}"#;
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
    assert_eq!(parsed.error.message(), "too_many_requests: Slow down");
  }
}
