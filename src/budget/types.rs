//! Domain types for the budgeting API.
//!
//! Amounts are in milliunits (1000 = one unit of currency).

use serde::{Deserialize, Serialize};

/// Budget summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
  pub id: String,
  pub name: String,
  pub last_modified_on: Option<String>,
  pub first_month: Option<String>,
  pub last_month: Option<String>,
  #[serde(default)]
  pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub account_type: String,
  pub on_budget: bool,
  pub closed: bool,
  pub note: Option<String>,
  pub balance: i64,
  pub cleared_balance: i64,
  pub uncleared_balance: i64,
  pub transfer_payee_id: Option<String>,
  #[serde(default)]
  pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payee {
  pub id: String,
  pub name: String,
  pub transfer_account_id: Option<String>,
  #[serde(default)]
  pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: String,
  /// Owning group; absent in some older responses
  pub category_group_id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub hidden: bool,
  pub note: Option<String>,
  pub budgeted: i64,
  pub activity: i64,
  pub balance: i64,
  pub goal_type: Option<String>,
  #[serde(default)]
  pub deleted: bool,
}

/// Category group with its categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub hidden: bool,
  #[serde(default)]
  pub deleted: bool,
  #[serde(default)]
  pub categories: Vec<Category>,
}

/// Part of a split transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTransaction {
  pub id: String,
  pub transaction_id: String,
  pub amount: i64,
  pub memo: Option<String>,
  pub payee_id: Option<String>,
  pub category_id: Option<String>,
  pub category_name: Option<String>,
  pub transfer_account_id: Option<String>,
  #[serde(default)]
  pub deleted: bool,
}

/// A transaction.
///
/// List endpoints return a thinner shape than detail endpoints: the
/// `*_name` fields and `subtransactions` may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
  pub id: String,
  /// `YYYY-MM-DD`
  pub date: String,
  pub amount: i64,
  pub memo: Option<String>,
  /// "cleared", "uncleared" or "reconciled"
  pub cleared: String,
  pub approved: bool,
  pub flag_color: Option<String>,
  pub account_id: String,
  pub payee_id: Option<String>,
  pub category_id: Option<String>,
  pub transfer_account_id: Option<String>,
  pub transfer_transaction_id: Option<String>,
  pub matched_transaction_id: Option<String>,
  pub import_id: Option<String>,
  #[serde(default)]
  pub deleted: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub account_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payee_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subtransactions: Option<Vec<SubTransaction>>,
}

/// Month summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthSummary {
  /// `YYYY-MM-01`
  pub month: String,
  pub note: Option<String>,
  pub income: i64,
  pub budgeted: i64,
  pub activity: i64,
  pub to_be_budgeted: i64,
  pub age_of_money: Option<i64>,
  #[serde(default)]
  pub deleted: bool,
}

/// Month with per-category figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthDetail {
  #[serde(flatten)]
  pub summary: MonthSummary,
  #[serde(default)]
  pub categories: Vec<Category>,
}

/// Filters for transaction list queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
  /// Only transactions on or after this date (`YYYY-MM-DD`)
  pub since_date: Option<String>,
  /// "uncategorized" or "unapproved"
  pub kind: Option<String>,
}

/// Payload for creating a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewTransaction {
  pub account_id: String,
  pub date: String,
  pub amount: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payee_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payee_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memo: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cleared: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub approved: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub flag_color: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub import_id: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub subtransactions: Vec<NewSubTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewSubTransaction {
  pub amount: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payee_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memo: Option<String>,
}

/// Partial update of an existing transaction; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionUpdate {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub account_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub amount: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payee_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memo: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cleared: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub approved: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub flag_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAccount {
  pub name: String,
  #[serde(rename = "type")]
  pub account_type: String,
  pub balance: i64,
}

/// Transactions returned by a write, with the change token the write produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedTransactions {
  pub transactions: Vec<Transaction>,
  pub server_knowledge: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedCategory {
  pub category: Category,
  pub server_knowledge: Option<i64>,
}
