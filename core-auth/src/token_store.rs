//! Account Persistence
//!
//! Keeps the ordered account collection, the provider configuration and the
//! pending PKCE verifier in a [`SettingsStore`].
//!
//! ## Guarantees
//!
//! - Every mutation re-persists the whole collection inside one settings
//!   transaction. The in-memory collection only changes after the commit
//!   succeeds, so readers never see a state that is not on disk.
//! - Writers are serialized: the collection lock is held across the write.
//! - Token values are never logged.
//!
//! ## Keys
//!
//! With the default prefix `kc_`: `kc_config`, `kc_accounts`,
//! `kc_pending_verifier`.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{Account, Profile, TokenSet, TokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SettingsStore;
//! # async fn example(settings: Arc<dyn SettingsStore>) -> core_auth::Result<()> {
//! let store = TokenStore::new(settings, "kc_");
//! store.load(chrono::Utc::now()).await?;
//!
//! let account = Account::new(TokenSet::new("at", 300), Profile::placeholder(), chrono::Utc::now());
//! let index = store.add_account(account).await?;
//! store.remove_account(index).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{Account, AccountId, Profile, ProviderConfig, TokenSet};
use bridge_traits::storage::SettingsStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Persisted account collection plus the small bits of login state.
pub struct TokenStore {
    settings: Arc<dyn SettingsStore>,
    prefix: String,
    accounts: Mutex<Vec<Account>>,
}

impl TokenStore {
    pub fn new(settings: Arc<dyn SettingsStore>, prefix: impl Into<String>) -> Self {
        Self {
            settings,
            prefix: prefix.into(),
            accounts: Mutex::new(Vec::new()),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn accounts_key(&self) -> String {
        self.key("accounts")
    }

    fn config_key(&self) -> String {
        self.key("config")
    }

    fn verifier_key(&self) -> String {
        self.key("pending_verifier")
    }

    /// Restore the persisted collection.
    ///
    /// Nothing persisted yields an empty collection. Entries written without
    /// an issuance time are stamped with `now` and written back, so their
    /// countdowns stay put across later restarts.
    ///
    /// # Errors
    ///
    /// [`AuthError::StoreCorrupted`] when the stored JSON cannot be read. The
    /// corrupted entry is deleted so the next start begins empty.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        let mut guard = self.accounts.lock().await;

        let mut accounts: Vec<Account> = self
            .read_json(&self.accounts_key())
            .await?
            .unwrap_or_default();

        let mut stamped = 0usize;
        for account in accounts.iter_mut().filter(|a| a.issued_at.is_none()) {
            account.issued_at = Some(now);
            stamped += 1;
        }

        if stamped > 0 {
            debug!(stamped, "Stamped legacy accounts with load time");
            self.persist(&accounts).await?;
        }

        info!(count = accounts.len(), "Loaded accounts");
        *guard = accounts.clone();
        Ok(accounts)
    }

    /// Snapshot of the collection in display order.
    pub async fn accounts(&self) -> Vec<Account> {
        self.accounts.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.accounts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.lock().await.is_empty()
    }

    pub async fn get(&self, index: usize) -> Option<Account> {
        self.accounts.lock().await.get(index).cloned()
    }

    /// Current position and contents of the account with `id`.
    pub async fn find(&self, id: AccountId) -> Option<(usize, Account)> {
        self.accounts
            .lock()
            .await
            .iter()
            .enumerate()
            .find(|(_, account)| account.id == id)
            .map(|(index, account)| (index, account.clone()))
    }

    /// Append `account` and persist. Returns its index.
    pub async fn add_account(&self, account: Account) -> Result<usize> {
        let mut guard = self.accounts.lock().await;
        let mut next = guard.clone();
        let account_id = account.id;
        next.push(account);

        self.persist(&next).await?;
        *guard = next;

        let index = guard.len() - 1;
        info!(account_id = %account_id, index, "Account added");
        Ok(index)
    }

    /// Remove the account at `index` and persist.
    ///
    /// An out-of-range index is a no-op returning `Ok(None)`.
    pub async fn remove_account(&self, index: usize) -> Result<Option<Account>> {
        let mut guard = self.accounts.lock().await;
        if index >= guard.len() {
            debug!(index, count = guard.len(), "Remove ignored: index out of range");
            return Ok(None);
        }

        let mut next = guard.clone();
        let removed = next.remove(index);

        self.persist(&next).await?;
        *guard = next;

        info!(account_id = %removed.id, index, "Account removed");
        Ok(Some(removed))
    }

    /// Replace the tokens of the account at `index` (last write wins).
    pub async fn replace_tokens(
        &self,
        index: usize,
        tokens: TokenSet,
        issued_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.accounts.lock().await;
        if index >= guard.len() {
            return Err(AuthError::AccountNotFound(format!("index {}", index)));
        }

        let mut next = guard.clone();
        next[index].tokens = tokens;
        next[index].issued_at = Some(issued_at);

        self.persist(&next).await?;
        *guard = next;

        debug!(index, "Tokens replaced");
        Ok(())
    }

    /// Replace the tokens of the account with `id`, wherever it now sits.
    ///
    /// Returns the account's current index.
    pub async fn replace_tokens_for(
        &self,
        id: AccountId,
        tokens: TokenSet,
        issued_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut guard = self.accounts.lock().await;
        let index = position(&guard, id)?;

        let mut next = guard.clone();
        next[index].tokens = tokens;
        next[index].issued_at = Some(issued_at);

        self.persist(&next).await?;
        *guard = next;

        debug!(account_id = %id, index, "Tokens replaced");
        Ok(index)
    }

    pub async fn replace_profile_for(&self, id: AccountId, profile: Profile) -> Result<()> {
        let mut guard = self.accounts.lock().await;
        let index = position(&guard, id)?;

        let mut next = guard.clone();
        next[index].profile = profile;

        self.persist(&next).await?;
        *guard = next;

        debug!(account_id = %id, "Profile replaced");
        Ok(())
    }

    /// Store the verifier of the login in flight, replacing any earlier one.
    pub async fn set_pending_verifier(&self, verifier: &str) -> Result<()> {
        self.settings
            .set_string(&self.verifier_key(), verifier)
            .await
            .map_err(|e| storage_error("store pending verifier", e))
    }

    pub async fn pending_verifier(&self) -> Result<Option<String>> {
        self.settings
            .get_string(&self.verifier_key())
            .await
            .map_err(|e| storage_error("read pending verifier", e))
    }

    pub async fn clear_pending_verifier(&self) -> Result<()> {
        self.settings
            .delete(&self.verifier_key())
            .await
            .map_err(|e| storage_error("clear pending verifier", e))
    }

    /// The persisted provider configuration, if one was saved.
    pub async fn load_config(&self) -> Result<Option<ProviderConfig>> {
        self.read_json(&self.config_key()).await
    }

    pub async fn save_config(&self, config: &ProviderConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.settings
            .set_string(&self.config_key(), &json)
            .await
            .map_err(|e| storage_error("save provider config", e))?;

        info!(realm = %config.realm, client_id = %config.client_id, "Provider config saved");
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self
            .settings
            .get_string(key)
            .await
            .map_err(|e| storage_error("read settings", e))?
        else {
            debug!(key, "Nothing persisted");
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Persisted entry is corrupted, discarding it");

                if let Err(delete_err) = self.settings.delete(key).await {
                    warn!(key, error = %delete_err, "Failed to delete corrupted entry");
                }

                Err(AuthError::StoreCorrupted {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Write the whole collection in one transaction.
    async fn persist(&self, accounts: &[Account]) -> Result<()> {
        let key = self.accounts_key();
        let json = serde_json::to_string(accounts)?;

        let mut tx = self
            .settings
            .begin_transaction()
            .await
            .map_err(|e| storage_error("begin transaction", e))?;

        if let Err(e) = tx.set_string(&key, &json).await {
            warn!(error = %e, "Failed to write accounts, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            return Err(storage_error("write accounts", e));
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("commit accounts", e))?;

        debug!(count = accounts.len(), "Accounts persisted");
        Ok(())
    }
}

fn position(accounts: &[Account], id: AccountId) -> Result<usize> {
    accounts
        .iter()
        .position(|account| account.id == id)
        .ok_or_else(|| AuthError::AccountNotFound(id.to_string()))
}

fn storage_error(action: &str, e: bridge_traits::error::BridgeError) -> AuthError {
    AuthError::Storage(format!("Failed to {}: {}", action, e))
}
