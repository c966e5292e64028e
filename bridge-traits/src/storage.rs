//! Key-Value Persistence
//!
//! The only persistence the auth core needs: string values under string keys,
//! plus transactions so a multi-key update lands all at once or not at all.

use async_trait::async_trait;

use crate::error::Result;

/// Key-value settings storage trait
///
/// Abstracts the host's preferences storage (SQLite on desktop, browser
/// `localStorage` on the web, an in-memory map in tests).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_accounts(store: &dyn SettingsStore, json: &str) -> Result<()> {
///     let mut tx = store.begin_transaction().await?;
///     tx.set_string("kc_accounts", json).await?;
///     tx.commit().await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }

    /// Begin a transaction for atomic updates
    ///
    /// Nothing written through the transaction is visible until
    /// [`SettingsTransaction::commit`] succeeds. Dropping the transaction
    /// without committing discards its writes.
    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>>;
}

/// Transaction for atomic settings updates
#[async_trait]
pub trait SettingsTransaction: Send {
    /// Set a value within the transaction
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    /// Delete a value within the transaction
    async fn delete(&mut self, key: &str) -> Result<()>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}
