//! Widget settings persisted alongside the chat history

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::store::{load_json, to_document, DocumentStore, StorageError, PREFERENCES_KEY};

pub const DEFAULT_AVATAR_ID: &str = "default";
pub const DEFAULT_AVATAR_URL: &str = "/static/img/default-avatar.png";

/// How detailed the remote answers should be
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationLevel {
    #[default]
    Basic,
    Intermediate,
    Advanced,
}

impl fmt::Display for ExplanationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExplanationLevel::Basic => "basic",
            ExplanationLevel::Intermediate => "intermediate",
            ExplanationLevel::Advanced => "advanced",
        };
        f.write_str(name)
    }
}

impl FromStr for ExplanationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(ExplanationLevel::Basic),
            "intermediate" => Ok(ExplanationLevel::Intermediate),
            "advanced" => Ok(ExplanationLevel::Advanced),
            other => Err(format!("unknown explanation level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default = "default_avatar")]
    pub selected_avatar: String,

    #[serde(default)]
    pub voice_enabled: bool,

    #[serde(default)]
    pub level: ExplanationLevel,

    #[serde(default)]
    pub dark_mode: bool,
}

fn default_avatar() -> String {
    DEFAULT_AVATAR_ID.to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            selected_avatar: default_avatar(),
            voice_enabled: false,
            level: ExplanationLevel::default(),
            dark_mode: false,
        }
    }
}

impl Preferences {
    pub async fn load(store: &dyn DocumentStore) -> Result<Self, StorageError> {
        Ok(load_json(store, PREFERENCES_KEY).await?.unwrap_or_default())
    }

    pub async fn save(&self, store: &dyn DocumentStore) -> Result<(), StorageError> {
        store.put(PREFERENCES_KEY, to_document(self)?).await?;
        debug!(avatar = %self.selected_avatar, level = %self.level, "Saved preferences");
        Ok(())
    }
}

/// An avatar the widget can show next to answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub avatar_id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_url: Option<String>,
}

/// Avatars available without the remote service
pub fn default_avatars() -> Vec<Avatar> {
    vec![Avatar {
        avatar_id: DEFAULT_AVATAR_ID.to_string(),
        name: "Default".to_string(),
        url: DEFAULT_AVATAR_URL.to_string(),
        animation_url: None,
    }]
}
