//! Application configuration

pub mod client;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use client::{ConfigError, WidgetConfig};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

/// Where conversation documents are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Files,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "files" | "file" => Ok(StoreBackend::Files),
            other => Err(ConfigError::Validation(format!(
                "unknown store backend '{}', expected sqlite or files",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Base URL of the remote answer service
    pub endpoint: String,
    pub data_dir: PathBuf,
    pub store: StoreBackend,
    /// Overrides `[widget] user_id` from the TOML file
    pub user_id: Option<String>,
    pub widget_config: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let store = match var("CHATBOX_STORE") {
            Some(value) => value.parse()?,
            None => StoreBackend::default(),
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            endpoint: var("CHATBOX_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.into()),
            data_dir: var("CHATBOX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            store,
            user_id: var("CHATBOX_USER_ID").filter(|id| !id.trim().is_empty()),
            widget_config: var("CHATBOX_CONFIG").map(PathBuf::from),
        })
    }

    /// Load the widget TOML file if one is configured
    pub fn widget(&self) -> Result<WidgetConfig, ConfigError> {
        let mut widget = match &self.widget_config {
            Some(path) => WidgetConfig::from_file(path)?,
            None => WidgetConfig::default(),
        };
        if let Some(user_id) = &self.user_id {
            widget.widget.user_id = user_id.clone();
        }
        Ok(widget)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }
}
