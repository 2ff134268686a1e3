use budget_sync::{app, config};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bsync")]
#[command(about = "A caching, delta-syncing shell for a budgeting API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Budget id to select and warm on startup
  #[arg(short, long)]
  budget: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = install_tracing()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;

  // Override default budget if specified on command line
  let config = if let Some(budget) = args.budget {
    config::Config {
      default_budget: Some(budget),
      ..config
    }
  } else {
    config
  };

  let mut app = app::App::new(config)?;
  app.run().await?;

  Ok(())
}

/// Log to a file in the data dir so output never interleaves with the shell.
fn install_tracing() -> Result<WorkerGuard> {
  let dir = config::Config::data_dir();
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::never(&dir, "bsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env("BSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
