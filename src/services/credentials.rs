use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::store::KeyValueStore;
use crate::config::API_KEY_KEY;

/// Source of the routing API key.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn api_key(&self) -> Result<Option<String>>;
}

/// Keeps the API key in the same store as the rooms.
#[derive(Clone)]
pub struct StoredCredentials {
    store: Arc<dyn KeyValueStore>,
}

impl StoredCredentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn set_api_key(&self, api_key: &str) -> Result<()> {
        self.store
            .save(API_KEY_KEY, api_key.trim())
            .await
            .context("Failed to store API key")
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentials {
    async fn api_key(&self) -> Result<Option<String>> {
        let key = self
            .store
            .load(API_KEY_KEY)
            .await
            .context("Failed to read API key")?;
        Ok(key.filter(|k| !k.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    #[tokio::test]
    async fn test_roundtrip_and_blank_key() {
        let creds = StoredCredentials::new(Arc::new(MemoryStore::new()));
        assert!(creds.api_key().await.unwrap().is_none());

        creds.set_api_key("  sk-or-123 \n").await.unwrap();
        assert_eq!(creds.api_key().await.unwrap().as_deref(), Some("sk-or-123"));

        creds.set_api_key("   ").await.unwrap();
        assert!(creds.api_key().await.unwrap().is_none());
    }
}
