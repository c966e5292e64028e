//! Provider configuration source.

use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::ProviderConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supplies the provider configuration snapshot each flow runs with.
///
/// Callers fetch a fresh snapshot per operation, so a saved change applies
/// to the next login or refresh.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn provider_config(&self) -> Result<ProviderConfig>;
}

/// A fixed snapshot.
#[async_trait]
impl ConfigProvider for ProviderConfig {
    async fn provider_config(&self) -> Result<ProviderConfig> {
        Ok(self.clone())
    }
}

/// Persisted configuration, falling back to a default snapshot.
pub struct StoredConfigProvider {
    store: Arc<TokenStore>,
    fallback: ProviderConfig,
}

impl StoredConfigProvider {
    pub fn new(store: Arc<TokenStore>, fallback: ProviderConfig) -> Self {
        Self { store, fallback }
    }

    /// Fall back to [`ProviderConfig::from_env`].
    pub fn from_env(store: Arc<TokenStore>) -> Self {
        Self::new(store, ProviderConfig::from_env())
    }

    pub fn fallback(&self) -> &ProviderConfig {
        &self.fallback
    }

    /// Persist `config` as the new snapshot.
    ///
    /// Incomplete configurations are accepted here; flows reject them when
    /// they start.
    pub async fn save(&self, config: &ProviderConfig) -> Result<()> {
        self.store.save_config(config).await
    }
}

#[async_trait]
impl ConfigProvider for StoredConfigProvider {
    async fn provider_config(&self) -> Result<ProviderConfig> {
        match self.store.load_config().await {
            Ok(Some(config)) => Ok(config),
            Ok(None) => {
                debug!("No saved provider config, using defaults");
                Ok(self.fallback.clone())
            }
            Err(AuthError::StoreCorrupted { reason, .. }) => {
                warn!(%reason, "Saved provider config discarded, using defaults");
                Ok(self.fallback.clone())
            }
            Err(e) => Err(e),
        }
    }
}
