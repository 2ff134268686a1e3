//! Available commands, parsing and autocomplete logic

use color_eyre::{eyre::eyre, Result};

use crate::budget::types::TransactionFilter;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "budgets",
    aliases: &["b", "budget"],
    usage: "budgets",
    description: "List budgets",
  },
  Command {
    name: "use",
    aliases: &["select", "default"],
    usage: "use <budget_id>",
    description: "Set the default budget and warm its cache",
  },
  Command {
    name: "accounts",
    aliases: &["a", "accts"],
    usage: "accounts [--full]",
    description: "List accounts",
  },
  Command {
    name: "account",
    aliases: &["acct"],
    usage: "account <account_id>",
    description: "Show one account",
  },
  Command {
    name: "categories",
    aliases: &["c", "cats"],
    usage: "categories [--full]",
    description: "List category groups and categories",
  },
  Command {
    name: "category",
    aliases: &["cat"],
    usage: "category <category_id>",
    description: "Show one category",
  },
  Command {
    name: "transactions",
    aliases: &["t", "tx", "txns"],
    usage: "transactions [account_id] [--since YYYY-MM-DD] [--type uncategorized|unapproved] [--full]",
    description: "List transactions",
  },
  Command {
    name: "months",
    aliases: &["m"],
    usage: "months [--full]",
    description: "List budget months",
  },
  Command {
    name: "month",
    aliases: &["mo"],
    usage: "month <YYYY-MM>",
    description: "Show one month",
  },
  Command {
    name: "payees",
    aliases: &["p"],
    usage: "payees [--full]",
    description: "List payees",
  },
  Command {
    name: "delete",
    aliases: &["del", "rm"],
    usage: "delete <transaction_id> [--dry-run]",
    description: "Delete a transaction",
  },
  Command {
    name: "assign",
    aliases: &["budget-category"],
    usage: "assign <category_id> <YYYY-MM> <milliunits> [--dry-run]",
    description: "Set a category's budgeted amount for a month",
  },
  Command {
    name: "stats",
    aliases: &["s", "cache"],
    usage: "stats",
    description: "Show cache statistics",
  },
  Command {
    name: "refresh",
    aliases: &["r", "invalidate"],
    usage: "refresh",
    description: "Drop cached data for the current budget",
  },
  Command {
    name: "clear",
    aliases: &["reset"],
    usage: "clear",
    description: "Clear the whole cache",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "Show available commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit bsync",
  },
];

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
  Budgets,
  Use(String),
  Accounts,
  Account(String),
  Categories,
  Category(String),
  Transactions {
    account_id: Option<String>,
    filter: TransactionFilter,
  },
  Months,
  Month(String),
  Payees,
  DeleteTransaction(String),
  Assign {
    category_id: String,
    month: String,
    budgeted: i64,
  },
  Stats,
  Refresh,
  Clear,
  Help,
  Quit,
}

impl Action {
  /// Whether the action reads from a budget.
  pub fn needs_budget(&self) -> bool {
    !matches!(
      self,
      Self::Budgets | Self::Use(_) | Self::Stats | Self::Clear | Self::Help | Self::Quit
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub action: Action,
  /// Bypass the recorded change token and refetch in full
  pub full_refresh: bool,
  /// Preview a write without sending it
  pub dry_run: bool,
}

/// Find a command by exact name or alias
pub fn resolve(name: &str) -> Option<&'static Command> {
  let name = name.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == name || cmd.aliases.contains(&name.as_str()))
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Invocation> {
  let mut words = line.split_whitespace();
  let Some(first) = words.next() else {
    return Err(eyre!("Empty command"));
  };

  let Some(command) = resolve(first) else {
    let hint = get_suggestions(first)
      .first()
      .map(|cmd| format!(" Did you mean `{}`?", cmd.name))
      .unwrap_or_default();
    return Err(eyre!("Unknown command `{}`.{}", first, hint));
  };

  let mut positional = Vec::new();
  let mut filter = TransactionFilter::default();
  let mut full_refresh = false;
  let mut dry_run = false;
  while let Some(word) = words.next() {
    match word {
      "--full" => full_refresh = true,
      "--dry-run" => dry_run = true,
      "--since" => filter.since_date = Some(flag_value(&mut words, "--since")?),
      "--type" => filter.kind = Some(flag_value(&mut words, "--type")?),
      flag if flag.starts_with("--") => return Err(eyre!("Unknown flag {}", flag)),
      value => positional.push(value.to_string()),
    }
  }

  let mut positional = positional.into_iter();
  let action = match command.name {
    "budgets" => Action::Budgets,
    "use" => Action::Use(required(&mut positional, "budget id", command)?),
    "accounts" => Action::Accounts,
    "account" => Action::Account(required(&mut positional, "account id", command)?),
    "categories" => Action::Categories,
    "category" => Action::Category(required(&mut positional, "category id", command)?),
    "transactions" => Action::Transactions {
      account_id: positional.next(),
      filter,
    },
    "months" => Action::Months,
    "month" => Action::Month(required(&mut positional, "month", command)?),
    "payees" => Action::Payees,
    "delete" => Action::DeleteTransaction(required(&mut positional, "transaction id", command)?),
    "assign" => {
      let category_id = required(&mut positional, "category id", command)?;
      let month = required(&mut positional, "month", command)?;
      let amount = required(&mut positional, "amount", command)?;
      let budgeted = amount
        .parse()
        .map_err(|_| eyre!("Amount must be whole milliunits, got `{}`", amount))?;
      Action::Assign {
        category_id,
        month,
        budgeted,
      }
    }
    "stats" => Action::Stats,
    "refresh" => Action::Refresh,
    "clear" => Action::Clear,
    "help" => Action::Help,
    "quit" => Action::Quit,
    other => return Err(eyre!("Command `{}` is not handled", other)),
  };

  Ok(Invocation {
    action,
    full_refresh,
    dry_run,
  })
}

fn required(
  positional: &mut impl Iterator<Item = String>,
  what: &str,
  command: &Command,
) -> Result<String> {
  positional
    .next()
    .ok_or_else(|| eyre!("Missing {}. Usage: {}", what, command.usage))
}

fn flag_value<'a>(words: &mut impl Iterator<Item = &'a str>, flag: &str) -> Result<String> {
  words
    .next()
    .map(String::from)
    .ok_or_else(|| eyre!("{} needs a value", flag))
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}
