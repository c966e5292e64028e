//! # Authentication Manager
//!
//! Multi-account orchestrator over one Keycloak client registration.
//!
//! ## Overview
//!
//! `AuthManager` ties together the [`TokenStore`], the login flow and one
//! [`TokenLifecycleManager`] per account, and reports what happens on the
//! [`EventBus`]. Accounts are addressed by their position in the collection,
//! as shown to the user; internally each carries a stable [`AccountId`].
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthManager, RedirectOutcome};
//! use core_runtime::CoreConfig;
//!
//! # async fn example(core: CoreConfig) -> core_auth::Result<()> {
//! let manager = AuthManager::from_config(&core);
//! manager.initialize().await?;
//!
//! let login = manager.begin_login().await?;
//! println!("Open {}", login.url);
//!
//! // ... the browser comes back to the redirect URI
//! # let redirected = String::new();
//! if let RedirectOutcome::Completed { added, .. } = manager.handle_redirect(&redirected).await? {
//!     println!("Signed in as {}", added.account.display_name());
//! }
//! # Ok(())
//! # }
//! ```

use crate::callback::parse_redirect;
use crate::config::{ConfigProvider, StoredConfigProvider};
use crate::error::{AuthError, Result};
use crate::flow::{AuthFlowController, LoginRequest, ProfilePolicy};
use crate::lifecycle::{Countdown, LifecycleContext, TokenLifecycleManager};
use crate::oauth::{OAuthClient, ProbeResult};
use crate::token_store::TokenStore;
use crate::types::{Account, AccountId, ProviderConfig, TokenSet};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_if_sensitive;
use core_runtime::CoreConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// An account committed by a completed login.
#[derive(Debug)]
pub struct AddedAccount {
    pub index: usize,
    pub account: Account,
    /// Set when the account was committed with a placeholder profile.
    pub profile_error: Option<AuthError>,
}

/// Result of feeding a URL to [`AuthManager::handle_redirect`].
#[derive(Debug)]
pub enum RedirectOutcome {
    /// Not a login callback; nothing was done.
    Ignored,
    Completed {
        added: AddedAccount,
        /// The address to show instead, without the code.
        normalized_url: String,
    },
}

/// Multi-account authentication orchestrator.
pub struct AuthManager {
    store: Arc<TokenStore>,
    flow: AuthFlowController,
    config_provider: Arc<dyn ConfigProvider>,
    lifecycle_ctx: LifecycleContext,
    lifecycles: Mutex<HashMap<AccountId, TokenLifecycleManager>>,
    events: EventBus,
}

impl AuthManager {
    /// Build with its own event bus sized by `core.event_buffer_size`.
    ///
    /// The provider configuration is read from the settings store, falling
    /// back to [`ProviderConfig::from_env`].
    pub fn from_config(core: &CoreConfig) -> Self {
        Self::new(core, EventBus::new(core.event_buffer_size))
    }

    pub fn new(core: &CoreConfig, events: EventBus) -> Self {
        let store = Arc::new(TokenStore::new(
            core.settings_store.clone(),
            core.storage_prefix.clone(),
        ));
        let oauth = OAuthClient::new(core.http_client.clone(), core.http_timeout);
        let flow = AuthFlowController::new(
            oauth.clone(),
            store.clone(),
            core.clock.clone(),
            events.clone(),
        );
        let config_provider = Arc::new(StoredConfigProvider::from_env(store.clone()));

        let lifecycle_ctx = LifecycleContext {
            oauth,
            store: store.clone(),
            scheduler: core.scheduler.clone(),
            clock: core.clock.clone(),
            events: events.clone(),
            countdown_tick: core.countdown_tick,
        };

        Self {
            store,
            flow,
            config_provider,
            lifecycle_ctx,
            lifecycles: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Read the provider configuration from `provider` instead.
    pub fn with_config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.config_provider = provider;
        self
    }

    pub fn with_profile_policy(mut self, policy: ProfilePolicy) -> Self {
        self.flow.set_profile_policy(policy);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Load persisted accounts and resume their countdowns.
    ///
    /// A corrupted collection is discarded and reported as an
    /// [`AuthEvent::Error`]; the manager then starts empty. Returns the number
    /// of accounts restored.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<usize> {
        let now = self.lifecycle_ctx.clock.now();

        let accounts = match self.store.load(now).await {
            Ok(accounts) => accounts,
            Err(e @ AuthError::StoreCorrupted { .. }) => {
                warn!(error = %e, "Starting with no accounts");
                self.emit(CoreEvent::Auth(AuthEvent::Error {
                    account_id: None,
                    message: e.to_string(),
                    recoverable: false,
                }));
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        for account in &accounts {
            let lifecycle = self.track(account.id);
            lifecycle.restore(&account.tokens, account.issued_at.unwrap_or(now));
        }

        info!(count = accounts.len(), "Auth manager initialized");
        Ok(accounts.len())
    }

    /// The configuration the next operation will use.
    pub async fn provider_config(&self) -> Result<ProviderConfig> {
        self.config_provider.provider_config().await
    }

    /// Persist a new provider configuration.
    pub async fn save_provider_config(&self, config: &ProviderConfig) -> Result<()> {
        self.store.save_config(config).await
    }

    /// Start a login; returns the authorize URL to open.
    pub async fn begin_login(&self) -> Result<LoginRequest> {
        let config = self.provider_config().await?;
        self.flow.begin_login(&config).await
    }

    /// Redeem `code` and append the new account.
    #[instrument(skip(self, code))]
    pub async fn complete_login(&self, code: &str) -> Result<AddedAccount> {
        let config = self.provider_config().await?;
        self.redeem(code, &config).await
    }

    async fn redeem(&self, code: &str, config: &ProviderConfig) -> Result<AddedAccount> {
        let completed = self.flow.complete_login(code, config).await?;
        let account = completed.account;

        let index = self.store.add_account(account.clone()).await?;

        let lifecycle = self.track(account.id);
        let issued_at = account
            .issued_at
            .unwrap_or_else(|| self.lifecycle_ctx.clock.now());
        lifecycle.restore(&account.tokens, issued_at);

        info!(
            account_id = %account.id,
            index,
            username = %redact_if_sensitive("preferred_username", account.display_name()),
            "Account added"
        );
        self.emit(CoreEvent::Auth(AuthEvent::AccountAdded {
            account_id: account.id.to_string(),
            display_name: account.display_name().to_string(),
        }));

        if let Some(e) = &completed.profile_error {
            self.emit(CoreEvent::Auth(AuthEvent::ProfileFetchFailed {
                account_id: account.id.to_string(),
                message: e.to_string(),
            }));
        }

        Ok(AddedAccount {
            index,
            account,
            profile_error: completed.profile_error,
        })
    }

    /// Handle the URL the provider redirected to.
    ///
    /// Only URLs on the configured `redirect_uri` count; anything else, and a
    /// URL with neither `code` nor `error`, is ignored without touching the
    /// pending login. A provider-reported error ends the pending login and is
    /// returned as [`AuthError::TokenExchange`].
    pub async fn handle_redirect(&self, url: &str) -> Result<RedirectOutcome> {
        let params = parse_redirect(url)?;
        if !params.is_callback() {
            debug!("Redirect carries no callback parameters");
            return Ok(RedirectOutcome::Ignored);
        }

        let config = self.provider_config().await?;
        config.validate()?;
        if !params.is_for(&config.redirect_uri) {
            warn!(landed = %params.normalized_url, "Callback outside the redirect URI ignored");
            return Ok(RedirectOutcome::Ignored);
        }

        let normalized_url = params.normalized_url.clone();

        let code = match params.into_code() {
            Ok(Some(code)) => code,
            Ok(None) => return Ok(RedirectOutcome::Ignored),
            Err(e) => {
                warn!(error = %e, "Provider rejected the login");
                self.store.clear_pending_verifier().await?;
                self.emit(CoreEvent::Auth(AuthEvent::Error {
                    account_id: None,
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                }));
                return Err(e);
            }
        };

        let added = self.redeem(&code, &config).await?;
        Ok(RedirectOutcome::Completed {
            added,
            normalized_url,
        })
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.store.accounts().await
    }

    pub async fn account(&self, index: usize) -> Option<Account> {
        self.store.get(index).await
    }

    /// Log out the account at `index` and stop its timers.
    ///
    /// An out-of-range index is a no-op returning `Ok(None)`.
    pub async fn remove_account(&self, index: usize) -> Result<Option<Account>> {
        let Some(account) = self.store.remove_account(index).await? else {
            return Ok(None);
        };

        if let Some(lifecycle) = self.lifecycles.lock().remove(&account.id) {
            lifecycle.shutdown();
        }

        info!(
            account_id = %account.id,
            username = %redact_if_sensitive("preferred_username", account.display_name()),
            "Account logged out"
        );
        self.emit(CoreEvent::Auth(AuthEvent::AccountRemoved {
            account_id: account.id.to_string(),
        }));

        Ok(Some(account))
    }

    /// Refresh the tokens of the account at `index`.
    pub async fn refresh(&self, index: usize) -> Result<TokenSet> {
        let lifecycle = self.lifecycle_at(index).await?;
        let config = self.provider_config().await?;
        lifecycle.refresh_now(&config).await
    }

    /// Check whether the access token of the account at `index` is accepted.
    pub async fn probe(&self, index: usize) -> Result<ProbeResult> {
        let lifecycle = self.lifecycle_at(index).await?;
        let config = self.provider_config().await?;
        lifecycle.probe_access_token(&config).await
    }

    pub async fn start_auto_refresh(&self, index: usize, interval_minutes: u32) -> Result<()> {
        let lifecycle = self.lifecycle_at(index).await?;
        lifecycle.start_auto_refresh(interval_minutes, self.config_provider.clone())
    }

    pub async fn stop_auto_refresh(&self, index: usize) -> Result<()> {
        self.lifecycle_at(index).await?.stop_auto_refresh();
        Ok(())
    }

    /// Minutes between scheduled refreshes; 0 when disabled.
    pub async fn auto_refresh_interval(&self, index: usize) -> Result<u32> {
        Ok(self
            .lifecycle_at(index)
            .await?
            .auto_refresh_interval_minutes())
    }

    pub async fn countdown(&self, index: usize) -> Result<Countdown> {
        Ok(self.lifecycle_at(index).await?.countdown())
    }

    pub async fn subscribe_countdown(&self, index: usize) -> Result<watch::Receiver<Countdown>> {
        Ok(self.lifecycle_at(index).await?.subscribe())
    }

    /// Stop every account's timers.
    pub fn shutdown(&self) {
        let lifecycles: Vec<_> = self.lifecycles.lock().drain().map(|(_, l)| l).collect();
        for lifecycle in &lifecycles {
            lifecycle.shutdown();
        }
        debug!(count = lifecycles.len(), "Auth manager shut down");
    }

    fn track(&self, id: AccountId) -> TokenLifecycleManager {
        let lifecycle = TokenLifecycleManager::new(id, self.lifecycle_ctx.clone());
        if let Some(previous) = self.lifecycles.lock().insert(id, lifecycle.clone()) {
            previous.shutdown();
        }
        lifecycle
    }

    async fn lifecycle_at(&self, index: usize) -> Result<TokenLifecycleManager> {
        let account = self
            .store
            .get(index)
            .await
            .ok_or_else(|| AuthError::AccountNotFound(format!("index {}", index)))?;

        self.lifecycles
            .lock()
            .get(&account.id)
            .cloned()
            .ok_or_else(|| AuthError::AccountNotFound(account.id.to_string()))
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.events.emit(event);
    }
}

impl Drop for AuthManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
