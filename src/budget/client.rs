use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::budget::api_types::{
  ApiAccount, ApiAccounts, ApiBudget, ApiBudgetedAmount, ApiBudgets, ApiCategory,
  ApiCategoryBudget, ApiCategoryGroups, ApiErrorBody, ApiMonth, ApiMonths, ApiNewAccount,
  ApiNewTransactions, ApiPayees, ApiSaveTransactions, ApiTransactionUpdates, ApiTransactions,
  Envelope,
};
use crate::budget::types::{
  Account, BudgetSummary, Category, CategoryGroup, MonthDetail, MonthSummary, NewAccount,
  NewTransaction, Payee, SavedCategory, SavedTransactions, Transaction, TransactionFilter,
  TransactionUpdate,
};
use crate::cache::DeltaResponse;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote budgeting API.
///
/// List methods that support deltas take the last known server knowledge;
/// `None` requests the full collection.
#[async_trait]
pub trait BudgetApi: Send + Sync {
  async fn list_budgets(&self) -> ApiResult<Vec<BudgetSummary>>;

  async fn get_budget(&self, budget_id: &str) -> ApiResult<BudgetSummary>;

  async fn list_accounts(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Account>>;

  async fn get_account(&self, budget_id: &str, account_id: &str) -> ApiResult<Account>;

  async fn create_account(&self, budget_id: &str, account: &NewAccount) -> ApiResult<Account>;

  async fn list_categories(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<CategoryGroup>>;

  async fn get_category(&self, budget_id: &str, category_id: &str) -> ApiResult<Category>;

  async fn update_category_budget(
    &self,
    budget_id: &str,
    month: &str,
    category_id: &str,
    budgeted: i64,
  ) -> ApiResult<SavedCategory>;

  async fn list_transactions(
    &self,
    budget_id: &str,
    filter: &TransactionFilter,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Transaction>>;

  async fn list_account_transactions(
    &self,
    budget_id: &str,
    account_id: &str,
    filter: &TransactionFilter,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Transaction>>;

  async fn create_transactions(
    &self,
    budget_id: &str,
    transactions: &[NewTransaction],
  ) -> ApiResult<SavedTransactions>;

  async fn update_transactions(
    &self,
    budget_id: &str,
    updates: &[TransactionUpdate],
  ) -> ApiResult<SavedTransactions>;

  async fn delete_transaction(
    &self,
    budget_id: &str,
    transaction_id: &str,
  ) -> ApiResult<SavedTransactions>;

  async fn list_months(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<MonthSummary>>;

  async fn get_month(&self, budget_id: &str, month: &str) -> ApiResult<MonthDetail>;

  async fn list_payees(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Payee>>;
}

/// HTTP implementation of [`BudgetApi`]
#[derive(Clone)]
pub struct HttpBudgetApi {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpBudgetApi {
  pub fn new(config: &ApiConfig, token: &str) -> Result<Self> {
    // A trailing slash makes `Url::join` append instead of replacing the last segment.
    let base = format!("{}/", config.url.trim_end_matches('/'));
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API url {}: {}", config.url, e))?;

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
      .map_err(|e| eyre!("Invalid API token: {}", e))?;
    auth.set_sensitive(true);
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn url(&self, path: &str) -> ApiResult<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| ApiError::Network(format!("invalid request path {path}: {e}")))
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ApiResult<T> {
    let url = self.url(path)?;
    debug!(%url, ?query, "GET");
    let response = self.client.get(url).query(query).send().await?;
    Self::parse_response(response).await
  }

  async fn send_json<T, B>(&self, method: reqwest::Method, path: &str, body: &B) -> ApiResult<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    let url = self.url(path)?;
    debug!(%url, %method, "write request");
    let response = self.client.request(method, url).json(body).send().await?;
    Self::parse_response(response).await
  }

  async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
    let url = self.url(path)?;
    debug!(%url, "DELETE");
    let response = self.client.delete(url).send().await?;
    Self::parse_response(response).await
  }

  async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    let status = response.status();
    if status.is_success() {
      let envelope: Envelope<T> = response.json().await?;
      return Ok(envelope.data);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorBody>(&text) {
      Ok(body) => body.error.message(),
      Err(_) => text,
    };
    Err(ApiError::from_status(status.as_u16(), message))
  }

  async fn save_transactions(
    &self,
    method: reqwest::Method,
    path: &str,
    body: &(impl Serialize + Sync),
  ) -> ApiResult<SavedTransactions> {
    let saved: ApiSaveTransactions = self.send_json(method, path, body).await?;
    if !saved.duplicate_import_ids.is_empty() {
      debug!(
        duplicates = saved.duplicate_import_ids.len(),
        "server skipped transactions with duplicate import ids"
      );
    }
    let server_knowledge = saved.server_knowledge;
    Ok(SavedTransactions {
      transactions: saved.into_transactions(),
      server_knowledge,
    })
  }
}

fn knowledge_query(last_knowledge: Option<i64>) -> Vec<(&'static str, String)> {
  last_knowledge
    .map(|k| ("last_knowledge_of_server", k.to_string()))
    .into_iter()
    .collect()
}

fn transaction_query(
  filter: &TransactionFilter,
  last_knowledge: Option<i64>,
) -> Vec<(&'static str, String)> {
  let mut query = knowledge_query(last_knowledge);
  if let Some(since) = &filter.since_date {
    query.push(("since_date", since.clone()));
  }
  if let Some(kind) = &filter.kind {
    query.push(("type", kind.clone()));
  }
  query
}

#[async_trait]
impl BudgetApi for HttpBudgetApi {
  async fn list_budgets(&self) -> ApiResult<Vec<BudgetSummary>> {
    let response: ApiBudgets = self.get_json("budgets", &[]).await?;
    Ok(response.budgets)
  }

  async fn get_budget(&self, budget_id: &str) -> ApiResult<BudgetSummary> {
    // The detail payload is large; only the summary fields are decoded.
    let response: ApiBudget = self
      .get_json(&format!("budgets/{}", budget_id), &[])
      .await?;
    Ok(response.budget)
  }

  async fn list_accounts(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Account>> {
    let response: ApiAccounts = self
      .get_json(&format!("budgets/{}/accounts", budget_id), &knowledge_query(last_knowledge))
      .await?;
    Ok(DeltaResponse::new(response.accounts, response.server_knowledge))
  }

  async fn get_account(&self, budget_id: &str, account_id: &str) -> ApiResult<Account> {
    let response: ApiAccount = self
      .get_json(&format!("budgets/{}/accounts/{}", budget_id, account_id), &[])
      .await?;
    Ok(response.account)
  }

  async fn create_account(&self, budget_id: &str, account: &NewAccount) -> ApiResult<Account> {
    let response: ApiAccount = self
      .send_json(
        reqwest::Method::POST,
        &format!("budgets/{}/accounts", budget_id),
        &ApiNewAccount { account },
      )
      .await?;
    Ok(response.account)
  }

  async fn list_categories(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<CategoryGroup>> {
    let response: ApiCategoryGroups = self
      .get_json(&format!("budgets/{}/categories", budget_id), &knowledge_query(last_knowledge))
      .await?;
    Ok(DeltaResponse::new(response.category_groups, response.server_knowledge))
  }

  async fn get_category(&self, budget_id: &str, category_id: &str) -> ApiResult<Category> {
    let response: ApiCategory = self
      .get_json(&format!("budgets/{}/categories/{}", budget_id, category_id), &[])
      .await?;
    Ok(response.category)
  }

  async fn update_category_budget(
    &self,
    budget_id: &str,
    month: &str,
    category_id: &str,
    budgeted: i64,
  ) -> ApiResult<SavedCategory> {
    let response: ApiCategory = self
      .send_json(
        reqwest::Method::PATCH,
        &format!("budgets/{}/months/{}/categories/{}", budget_id, month, category_id),
        &ApiCategoryBudget {
          category: ApiBudgetedAmount { budgeted },
        },
      )
      .await?;
    Ok(SavedCategory {
      category: response.category,
      server_knowledge: response.server_knowledge,
    })
  }

  async fn list_transactions(
    &self,
    budget_id: &str,
    filter: &TransactionFilter,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Transaction>> {
    let response: ApiTransactions = self
      .get_json(
        &format!("budgets/{}/transactions", budget_id),
        &transaction_query(filter, last_knowledge),
      )
      .await?;
    Ok(DeltaResponse::new(response.transactions, response.server_knowledge))
  }

  async fn list_account_transactions(
    &self,
    budget_id: &str,
    account_id: &str,
    filter: &TransactionFilter,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Transaction>> {
    let response: ApiTransactions = self
      .get_json(
        &format!("budgets/{}/accounts/{}/transactions", budget_id, account_id),
        &transaction_query(filter, last_knowledge),
      )
      .await?;
    Ok(DeltaResponse::new(response.transactions, response.server_knowledge))
  }

  async fn create_transactions(
    &self,
    budget_id: &str,
    transactions: &[NewTransaction],
  ) -> ApiResult<SavedTransactions> {
    self
      .save_transactions(
        reqwest::Method::POST,
        &format!("budgets/{}/transactions", budget_id),
        &ApiNewTransactions { transactions },
      )
      .await
  }

  async fn update_transactions(
    &self,
    budget_id: &str,
    updates: &[TransactionUpdate],
  ) -> ApiResult<SavedTransactions> {
    self
      .save_transactions(
        reqwest::Method::PATCH,
        &format!("budgets/{}/transactions", budget_id),
        &ApiTransactionUpdates {
          transactions: updates,
        },
      )
      .await
  }

  async fn delete_transaction(
    &self,
    budget_id: &str,
    transaction_id: &str,
  ) -> ApiResult<SavedTransactions> {
    let saved: ApiSaveTransactions = self
      .delete_json(&format!("budgets/{}/transactions/{}", budget_id, transaction_id))
      .await?;
    let server_knowledge = saved.server_knowledge;
    Ok(SavedTransactions {
      transactions: saved.into_transactions(),
      server_knowledge,
    })
  }

  async fn list_months(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<MonthSummary>> {
    let response: ApiMonths = self
      .get_json(&format!("budgets/{}/months", budget_id), &knowledge_query(last_knowledge))
      .await?;
    Ok(DeltaResponse::new(response.months, response.server_knowledge))
  }

  async fn get_month(&self, budget_id: &str, month: &str) -> ApiResult<MonthDetail> {
    let response: ApiMonth = self
      .get_json(&format!("budgets/{}/months/{}", budget_id, month), &[])
      .await?;
    Ok(response.month)
  }

  async fn list_payees(
    &self,
    budget_id: &str,
    last_knowledge: Option<i64>,
  ) -> ApiResult<DeltaResponse<Payee>> {
    let response: ApiPayees = self
      .get_json(&format!("budgets/{}/payees", budget_id), &knowledge_query(last_knowledge))
      .await?;
    Ok(DeltaResponse::new(response.payees, response.server_knowledge))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transaction_query_params() {
    let filter = TransactionFilter {
      since_date: Some("2024-01-01".into()),
      kind: Some("unapproved".into()),
    };
    let query = transaction_query(&filter, Some(12));
    assert_eq!(
      query,
      vec![
        ("last_knowledge_of_server", "12".to_string()),
        ("since_date", "2024-01-01".to_string()),
        ("type", "unapproved".to_string()),
      ]
    );
    assert!(knowledge_query(None).is_empty());
  }

  #[test]
  fn test_base_url_keeps_version_segment() {
    let api = HttpBudgetApi::new(
      &ApiConfig {
        url: "https://api.example.com/v1".into(),
      },
      "token",
    )
    .unwrap();
    assert_eq!(
      api.url("budgets/b1/accounts").unwrap().as_str(),
      "https://api.example.com/v1/budgets/b1/accounts"
    );
  }
}
