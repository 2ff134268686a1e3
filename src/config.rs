use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.ynab.com/v1";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  /// Budget selected at startup; its collections are warmed in the background
  pub default_budget: Option<String>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub ttl: TtlConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub max_entries: usize,
  pub default_ttl_secs: u64,
  /// Interval of the background sweep of expired entries; 0 disables it
  pub cleanup_interval_secs: u64,
  pub warm_on_default_budget: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: 1000,
      default_ttl_secs: 300,
      cleanup_interval_secs: 60,
      warm_on_default_budget: true,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }

  pub fn cleanup_interval(&self) -> Option<Duration> {
    (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
  }
}

/// Per-family TTL overrides in seconds. Unset families use the cache default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtlConfig {
  pub budgets: Option<u64>,
  pub accounts: Option<u64>,
  pub categories: Option<u64>,
  pub transactions: Option<u64>,
  pub months: Option<u64>,
  pub payees: Option<u64>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bsync/config.yaml
  ///
  /// Without a file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("bsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks BSYNC_API_TOKEN first, then YNAB_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("BSYNC_API_TOKEN")
      .or_else(|_| std::env::var("YNAB_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set BSYNC_API_TOKEN or YNAB_API_TOKEN environment variable.")
      })
  }

  /// Directory for log files.
  pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
      .unwrap_or_else(std::env::temp_dir)
      .join("bsync")
  }
}
