use std::path::PathBuf;

use anyhow::{Context, Result};

pub const APP_NAME: &str = "ForkChat";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1/";

/// Model used for new rooms when nothing else was chosen.
pub const FALLBACK_MODEL_ID: &str = "deepseek/deepseek-r1";

pub const ROOMS_KEY: &str = "chatRooms";
pub const API_KEY_KEY: &str = "API_KEY";
pub const SETTINGS_KEY: &str = "app_settings";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub api_base: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let db_path = match std::env::var("FORKCHAT_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::default_db_path()?,
        };
        let api_base =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        Ok(Self { db_path, api_base })
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("Neither XDG_DATA_HOME nor HOME is set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(data_dir.join("forkchat").join("forkchat.db"))
    }
}
