use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub versionone: V1Config,
  pub backlog: BacklogConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
  /// VersionOne access token, sent as a Bearer token
  #[default]
  Token,
  /// Username + password (Basic auth)
  Basic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V1Config {
  /// Instance base URL, e.g. https://www14.v1host.com/MyCompany
  pub url: String,
  /// Authentication type: token or basic
  #[serde(default)]
  pub auth_type: AuthType,
  /// Username for basic auth
  pub username: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Retries for transient failures (connect errors, timeouts, 429, 5xx), at most 5
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_max_retries() -> u32 {
  3
}

fn default_page_size() -> u32 {
  500
}

/// Which work items the cache tracks and which attributes it reads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BacklogConfig {
  /// Scope (project) name; items anywhere below it are included
  pub scope: String,
  #[serde(default = "default_asset_type")]
  pub asset_type: String,
  #[serde(default = "default_number_attribute")]
  pub number_attribute: String,
  #[serde(default = "default_name_attribute")]
  pub name_attribute: String,
  #[serde(default = "default_change_attribute")]
  pub change_attribute: String,
  /// Attribute path holding the names of the item's scope and its ancestors
  #[serde(default = "default_scope_attribute")]
  pub scope_attribute: String,
  /// Optional custom field shown as the item's tag; `null` disables it
  #[serde(default = "default_tag_attribute")]
  pub tag_attribute: Option<String>,
}

fn default_asset_type() -> String {
  "PrimaryWorkitem".to_string()
}

fn default_number_attribute() -> String {
  "Number".to_string()
}

fn default_name_attribute() -> String {
  "Name".to_string()
}

fn default_change_attribute() -> String {
  "ChangeDateUTC".to_string()
}

fn default_scope_attribute() -> String {
  "Scope.ParentMeAndUp.Name".to_string()
}

fn default_tag_attribute() -> Option<String> {
  Some("Custom_Tags2".to_string())
}

impl BacklogConfig {
  /// Default attribute names for the given scope.
  #[cfg(test)]
  pub fn for_scope(scope: impl Into<String>) -> Self {
    Self {
      scope: scope.into(),
      asset_type: default_asset_type(),
      number_attribute: default_number_attribute(),
      name_attribute: default_name_attribute(),
      change_attribute: default_change_attribute(),
      scope_attribute: default_scope_attribute(),
      tag_attribute: default_tag_attribute(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Also write logs to this file
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./v1backlog.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/v1backlog/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/v1backlog/config.yaml"
      )),
    }
  }

  /// Replace the configured scope, e.g. from the command line.
  pub fn with_scope(self, scope: impl Into<String>) -> Self {
    Self {
      backlog: BacklogConfig {
        scope: scope.into(),
        ..self.backlog
      },
      ..self
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("v1backlog.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("v1backlog").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the VersionOne access token from environment variables.
  ///
  /// Checks V1BACKLOG_TOKEN first, then V1_ACCESS_TOKEN as fallback.
  pub fn get_access_token() -> Result<String> {
    std::env::var("V1BACKLOG_TOKEN")
      .or_else(|_| std::env::var("V1_ACCESS_TOKEN"))
      .map_err(|_| {
        eyre!(
          "VersionOne access token not found. Set V1BACKLOG_TOKEN or V1_ACCESS_TOKEN environment variable."
        )
      })
  }

  /// Get the VersionOne password from environment variables.
  ///
  /// Checks V1BACKLOG_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("V1BACKLOG_PASSWORD").map_err(|_| {
      eyre!("VersionOne password not found. Set V1BACKLOG_PASSWORD environment variable.")
    })
  }
}
