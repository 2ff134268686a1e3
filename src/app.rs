use crate::budget::{BudgetService, CacheTtls, HttpBudgetApi, MutationOutcome};
use crate::cache::{CacheStore, CachedRead, DeltaFetchResult, FetchOptions, KnowledgeLedger};
use crate::commands::{self, Action, Invocation, COMMANDS};
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::info;

/// Interactive command shell over the cached budget service
pub struct App {
  service: BudgetService,

  /// Background sweeper of expired cache entries
  cleanup: Option<JoinHandle<()>>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    let api = HttpBudgetApi::new(&config.api, &token)?;
    let store = CacheStore::new(config.cache.max_entries, config.cache.default_ttl());
    let service = BudgetService::new(
      Arc::new(api),
      store,
      KnowledgeLedger::new(),
      CacheTtls::from_config(&config.cache, &config.ttl),
    )
    .with_warming(config.cache.warm_on_default_budget);

    Ok(Self::with_service(service, &config))
  }

  /// Build the shell around an existing service. Must run inside a tokio runtime.
  pub fn with_service(service: BudgetService, config: &Config) -> Self {
    let cleanup = config
      .cache
      .cleanup_interval()
      .map(|interval| service.store().spawn_cleanup(interval));

    if let Some(budget_id) = &config.default_budget {
      service.set_default_budget(budget_id);
    }

    Self {
      service,
      cleanup,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("bsync: type `help` for commands");

    while !self.should_quit {
      prompt()?;
      let Some(line) = lines.next_line().await? else {
        break;
      };
      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      match self.execute(line).await {
        Ok(output) if output.is_empty() => {}
        Ok(output) => println!("{}", output),
        Err(e) => println!("Error: {}", e),
      }
    }

    if let Some(handle) = self.cleanup.take() {
      handle.abort();
    }
    info!("shell closed");
    Ok(())
  }

  /// Run one command line and render its result.
  pub async fn execute(&mut self, line: &str) -> Result<String> {
    let Invocation {
      action,
      full_refresh,
      dry_run,
    } = commands::parse(line)?;

    if action == Action::Quit {
      self.should_quit = true;
      return Ok(String::new());
    }

    let options = if full_refresh {
      FetchOptions::full_refresh()
    } else {
      FetchOptions::default()
    };
    let budget_id = if action.needs_budget() {
      self.current_budget()?
    } else {
      String::new()
    };
    let svc = &self.service;

    match action {
      Action::Budgets => render_collection(svc.fetch_budgets(options).await?),
      Action::Use(id) => {
        svc.set_default_budget(&id);
        Ok(format!("Default budget set to {}", id))
      }
      Action::Accounts => render_collection(svc.fetch_accounts(&budget_id, options).await?),
      Action::Account(id) => render_read(svc.get_account(&budget_id, &id).await?),
      Action::Categories => render_collection(svc.fetch_categories(&budget_id, options).await?),
      Action::Category(id) => render_read(svc.get_category(&budget_id, &id).await?),
      Action::Transactions { account_id, filter } => {
        let result = match account_id {
          Some(account_id) => {
            svc
              .fetch_transactions_by_account(&budget_id, &account_id, &filter, options)
              .await?
          }
          None => svc.fetch_transactions(&budget_id, &filter, options).await?,
        };
        render_collection(result)
      }
      Action::Months => render_collection(svc.fetch_months(&budget_id, options).await?),
      Action::Month(month) => render_read(svc.get_month(&budget_id, &month).await?),
      Action::Payees => render_collection(svc.fetch_payees(&budget_id, options).await?),
      Action::DeleteTransaction(id) => {
        render_mutation(svc.delete_transaction(&budget_id, &id, dry_run).await?)
      }
      Action::Assign {
        category_id,
        month,
        budgeted,
      } => render_mutation(
        svc
          .update_category_budget(&budget_id, &month, &category_id, budgeted, dry_run)
          .await?,
      ),
      Action::Stats => to_json(&svc.stats()),
      Action::Refresh => Ok(format!(
        "Dropped {} cached entries for {}",
        svc.refresh_budget(&budget_id),
        budget_id
      )),
      Action::Clear => {
        svc.clear_cache();
        Ok("Cache cleared".to_string())
      }
      Action::Help => Ok(help_text()),
      Action::Quit => Ok(String::new()),
    }
  }

  fn current_budget(&self) -> Result<String> {
    self
      .service
      .default_budget()
      .ok_or_else(|| eyre!("No budget selected. Run `use <budget_id>` first."))
  }

  pub fn should_quit(&self) -> bool {
    self.should_quit
  }
}

fn prompt() -> Result<()> {
  let mut stdout = std::io::stdout();
  write!(stdout, "bsync> ")?;
  stdout.flush()?;
  Ok(())
}

fn render_collection<T: Serialize>(result: DeltaFetchResult<T>) -> Result<String> {
  let source = match (result.was_cached, result.used_delta) {
    (false, _) => "fetched",
    (true, false) => "cached",
    (true, true) => "cached + delta",
  };
  Ok(format!(
    "{} items ({}, server knowledge {})\n{}",
    result.data.len(),
    source,
    result.server_knowledge,
    to_json(&result.data)?
  ))
}

fn render_read<T: Serialize>(read: CachedRead<T>) -> Result<String> {
  let source = if read.was_cached { "cached" } else { "fetched" };
  Ok(format!("({})\n{}", source, to_json(&read.data)?))
}

fn render_mutation<T: Serialize>(outcome: MutationOutcome<T>) -> Result<String> {
  let plan = format!(
    "{} keys and {} key prefixes",
    outcome.plan.keys.len(),
    outcome.plan.prefixes.len()
  );
  if outcome.dry_run {
    return Ok(format!("Dry run, nothing sent. Would drop {}", plan));
  }

  let knowledge = outcome
    .server_knowledge
    .map(|k| format!(" (server knowledge {})", k))
    .unwrap_or_default();
  Ok(format!("Dropped {}{}\n{}", plan, knowledge, to_json(&outcome.data)?))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))
}

fn help_text() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("  {}\n      {}", cmd.usage, cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use std::time::Duration;

  /// Shell over an unreachable API; only commands that stay local are run.
  fn offline_app() -> App {
    let api = HttpBudgetApi::new(
      &ApiConfig {
        url: "http://127.0.0.1:9".into(),
      },
      "token",
    )
    .unwrap();
    let service = BudgetService::new(
      Arc::new(api),
      CacheStore::new(10, Duration::from_secs(60)),
      KnowledgeLedger::new(),
      CacheTtls::uniform(Duration::from_secs(60)),
    )
    .with_warming(false);
    App::with_service(service, &Config::default())
  }

  #[tokio::test]
  async fn test_budget_scoped_command_needs_selection() {
    let mut app = offline_app();
    let err = app.execute("accounts").await.unwrap_err();
    assert!(err.to_string().contains("No budget selected"));
  }

  #[tokio::test]
  async fn test_use_stats_and_quit() {
    let mut app = offline_app();

    let output = app.execute("use b1").await.unwrap();
    assert_eq!(output, "Default budget set to b1");

    let stats = app.execute("stats").await.unwrap();
    assert!(stats.contains("\"ledger_entries\": 0"));
    assert!(stats.contains("\"default_budget\": \"b1\""));

    assert!(!app.should_quit());
    app.execute("q").await.unwrap();
    assert!(app.should_quit());
  }

  #[tokio::test]
  async fn test_help_lists_every_command() {
    let mut app = offline_app();
    let help = app.execute("help").await.unwrap();
    for cmd in COMMANDS {
      assert!(help.contains(cmd.usage), "missing {}", cmd.name);
    }
  }

  #[tokio::test]
  async fn test_dry_run_writes_stay_local() {
    let mut app = offline_app();
    app.execute("use b1").await.unwrap();
    app.service.store().set("accounts:list:b1", 1u8, Duration::from_secs(60));

    let delete = app.execute("delete t9 --dry-run").await.unwrap();
    assert_eq!(delete, "Dry run, nothing sent. Would drop 4 keys and 5 key prefixes");

    let assign = app.execute("assign rent 2024-05 90000 --dry-run").await.unwrap();
    assert_eq!(assign, "Dry run, nothing sent. Would drop 5 keys and 1 key prefixes");
    assert!(app.service.store().has("accounts:list:b1"));
  }

  #[tokio::test]
  async fn test_refresh_and_clear() {
    let mut app = offline_app();
    app.service.store().set("accounts:list:b1", 1u8, Duration::from_secs(60));
    app.execute("use b1").await.unwrap();

    let output = app.execute("refresh").await.unwrap();
    assert_eq!(output, "Dropped 1 cached entries for b1");
    assert_eq!(app.execute("clear").await.unwrap(), "Cache cleared");
  }
}
