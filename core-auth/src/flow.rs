//! Authorization Code + PKCE login flow.
//!
//! Two phases:
//!
//! 1. [`AuthFlowController::begin_login`] stores a fresh verifier in the
//!    single pending-login slot and returns the authorize URL. Navigating
//!    there is the caller's job.
//! 2. [`AuthFlowController::complete_login`] redeems the code with the
//!    pending verifier, fetches the profile and hands back a new [`Account`].
//!    Appending it to the store is the caller's job.
//!
//! The verifier is single-use: it is cleared as soon as the token endpoint
//! has answered, whether it issued tokens or rejected the code. A transport
//! failure leaves it in place so the same callback can be retried.

use crate::error::{AuthError, Result};
use crate::oauth::OAuthClient;
use crate::pkce::PkcePair;
use crate::token_store::TokenStore;
use crate::types::{Account, Profile, ProviderConfig};
use bridge_traits::Clock;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What to do with valid tokens when the userinfo call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfilePolicy {
    /// Keep the account with an empty profile and report the failure.
    #[default]
    CommitWithPlaceholder,
    /// Fail the login with [`AuthError::ProfileFetch`].
    Discard,
}

/// Where to send the user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub url: String,
    /// S256 challenge embedded in `url`
    pub challenge: String,
}

/// A redeemed login, not yet committed.
#[derive(Debug)]
pub struct CompletedLogin {
    pub account: Account,
    /// Set when the profile is a placeholder because userinfo failed.
    pub profile_error: Option<AuthError>,
}

pub struct AuthFlowController {
    oauth: OAuthClient,
    store: Arc<TokenStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    profile_policy: ProfilePolicy,
}

impl AuthFlowController {
    pub fn new(
        oauth: OAuthClient,
        store: Arc<TokenStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            oauth,
            store,
            clock,
            events,
            profile_policy: ProfilePolicy::default(),
        }
    }

    pub fn with_profile_policy(mut self, policy: ProfilePolicy) -> Self {
        self.profile_policy = policy;
        self
    }

    pub fn set_profile_policy(&mut self, policy: ProfilePolicy) {
        self.profile_policy = policy;
    }

    pub fn profile_policy(&self) -> ProfilePolicy {
        self.profile_policy
    }

    /// Start a login.
    ///
    /// Overwrites any verifier left by an unfinished login.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ConfigIncomplete`] / [`AuthError::InvalidConfig`] before
    ///   anything is generated or stored
    /// - [`AuthError::Storage`] if the verifier cannot be persisted
    #[instrument(skip(self, config), fields(realm = %config.realm))]
    pub async fn begin_login(&self, config: &ProviderConfig) -> Result<LoginRequest> {
        config.validate()?;

        let pkce = PkcePair::generate();
        let url = self.oauth.authorize_url(config, pkce.challenge())?;

        if self.store.pending_verifier().await?.is_some() {
            warn!("Replacing the verifier of an unfinished login");
        }
        self.store.set_pending_verifier(pkce.verifier()).await?;

        info!(client_id = %config.client_id, "Login started");
        self.emit(CoreEvent::Auth(AuthEvent::LoginStarted));

        Ok(LoginRequest {
            url,
            challenge: pkce.challenge().to_string(),
        })
    }

    /// Redeem `code` from the redirect.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingVerifier`] when no login is pending
    /// - [`AuthError::TokenExchange`] when the provider rejects the code
    /// - [`AuthError::Network`] on transport failure (verifier kept)
    /// - [`AuthError::ProfileFetch`] under [`ProfilePolicy::Discard`]
    #[instrument(skip(self, code, config), fields(realm = %config.realm))]
    pub async fn complete_login(&self, code: &str, config: &ProviderConfig) -> Result<CompletedLogin> {
        let result = self.redeem(code, config).await;

        if let Err(e) = &result {
            warn!(error = %e, "Login failed");
            self.emit(CoreEvent::Auth(AuthEvent::Error {
                account_id: None,
                message: e.to_string(),
                recoverable: e.is_recoverable(),
            }));
        }

        result
    }

    async fn redeem(&self, code: &str, config: &ProviderConfig) -> Result<CompletedLogin> {
        config.validate()?;

        let Some(verifier) = self.store.pending_verifier().await? else {
            return Err(AuthError::MissingVerifier);
        };

        let exchanged = self.oauth.exchange_code(config, code, &verifier).await;
        if !matches!(exchanged, Err(AuthError::Network(_))) {
            if let Err(e) = self.store.clear_pending_verifier().await {
                warn!(error = %e, "Failed to clear pending verifier");
            }
        }
        let tokens = exchanged?;
        let issued_at = self.clock.now();

        let (profile, profile_error) =
            match self.oauth.fetch_profile(config, &tokens.access_token).await {
                Ok(profile) => (profile, None),
                Err(e) if self.profile_policy == ProfilePolicy::Discard => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Profile fetch failed, committing placeholder");
                    (Profile::placeholder(), Some(e))
                }
            };

        let account = Account::new(tokens, profile, issued_at);
        debug!(account_id = %account.id, "Login redeemed");

        Ok(CompletedLogin {
            account,
            profile_error,
        })
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::derive_challenge;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use bridge_traits::storage::{SettingsStore, SettingsTransaction};
    use bridge_traits::SystemClock;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use url::Url;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl SettingsStore for MapStore {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            self.0.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.0.lock().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.0.lock().remove(key);
            Ok(())
        }

        async fn begin_transaction(&self) -> BridgeResult<Box<dyn SettingsTransaction + Send>> {
            Err(BridgeError::NotAvailable("transactions".to_string()))
        }
    }

    /// Replies from a queue; an empty queue is a transport failure.
    #[derive(Default)]
    struct QueuedHttp(Mutex<VecDeque<HttpResponse>>);

    #[async_trait]
    impl HttpClient for QueuedHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.0
                .lock()
                .pop_front()
                .ok_or_else(|| BridgeError::OperationFailed("connection refused".to_string()))
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new("https://idp.test", "r1", "c1", "openid", "https://app.test")
    }

    fn controller(replies: Vec<HttpResponse>) -> (AuthFlowController, Arc<TokenStore>, EventBus) {
        let store = Arc::new(TokenStore::new(Arc::new(MapStore::default()), "kc_"));
        let events = EventBus::new(16);
        let oauth = OAuthClient::new(
            Arc::new(QueuedHttp(Mutex::new(replies.into()))),
            Duration::from_secs(5),
        );
        let flow = AuthFlowController::new(oauth, store.clone(), Arc::new(SystemClock), events.clone());
        (flow, store, events)
    }

    #[tokio::test]
    async fn test_begin_login_stores_matching_verifier() {
        let (flow, store, events) = controller(vec![]);
        let mut rx = events.subscribe();

        let request = flow.begin_login(&config()).await.unwrap();
        let verifier = store.pending_verifier().await.unwrap().unwrap();
        assert_eq!(derive_challenge(&verifier).unwrap(), request.challenge);

        let url = Url::parse(&request.url).unwrap();
        let challenge = url
            .query_pairs()
            .find(|(k, _)| k == "code_challenge")
            .map(|(_, v)| v.into_owned());
        assert_eq!(challenge, Some(request.challenge));
        assert_eq!(rx.recv().await.unwrap(), CoreEvent::Auth(AuthEvent::LoginStarted));
    }

    #[tokio::test]
    async fn test_begin_login_rejects_incomplete_config() {
        let (flow, store, _) = controller(vec![]);
        let mut incomplete = config();
        incomplete.client_id.clear();

        assert!(matches!(
            flow.begin_login(&incomplete).await,
            Err(AuthError::ConfigIncomplete { .. })
        ));
        assert_eq!(store.pending_verifier().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_complete_without_pending_login() {
        let (flow, _, _) = controller(vec![]);
        assert!(matches!(
            flow.complete_login("code", &config()).await,
            Err(AuthError::MissingVerifier)
        ));
    }

    #[tokio::test]
    async fn test_placeholder_profile_when_userinfo_fails() {
        let (flow, store, _) = controller(vec![
            HttpResponse::new(200, r#"{"access_token":"at","expires_in":300}"#),
            HttpResponse::new(500, ""),
        ]);
        flow.begin_login(&config()).await.unwrap();

        let login = flow.complete_login("code", &config()).await.unwrap();
        assert!(login.account.profile.is_placeholder());
        assert!(matches!(
            login.profile_error,
            Some(AuthError::ProfileFetch { status: Some(500), .. })
        ));
        assert_eq!(store.pending_verifier().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_discard_policy_fails_login() {
        let (flow, _, _) = controller(vec![
            HttpResponse::new(200, r#"{"access_token":"at"}"#),
            HttpResponse::new(401, ""),
        ]);
        let flow = flow.with_profile_policy(ProfilePolicy::Discard);
        flow.begin_login(&config()).await.unwrap();

        assert!(matches!(
            flow.complete_login("code", &config()).await,
            Err(AuthError::ProfileFetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_network_failure_keeps_verifier() {
        let (flow, store, events) = controller(vec![]);
        flow.begin_login(&config()).await.unwrap();
        let mut rx = events.subscribe();

        assert!(matches!(
            flow.complete_login("code", &config()).await,
            Err(AuthError::Network(_))
        ));
        assert!(store.pending_verifier().await.unwrap().is_some());

        match rx.recv().await.unwrap() {
            CoreEvent::Auth(AuthEvent::Error { recoverable, .. }) => assert!(recoverable),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
