use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::store::KeyValueStore;
use crate::config::{FALLBACK_MODEL_ID, SETTINGS_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub stream_responses: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_model() -> String {
    FALLBACK_MODEL_ID.to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            stream_responses: true,
            temperature: None,
            default_model: default_model(),
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(store: &dyn KeyValueStore) -> AppSettings {
        match store.load(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings: {}", e);
                AppSettings::default()
            }),
            Ok(None) => AppSettings::default(),
            Err(e) => {
                tracing::error!("Failed to load settings: {}", e);
                AppSettings::default()
            }
        }
    }

    pub async fn save(store: &dyn KeyValueStore, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        store.save(SETTINGS_KEY, &json).await
    }
}
