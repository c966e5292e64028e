//! Per-account token lifecycle
//!
//! A [`TokenLifecycleManager`] turns the relative lifetimes of the account's
//! current tokens into wall-clock deadlines, publishes a countdown, reports
//! expiry, and refreshes on demand or on a fixed schedule.
//!
//! ## Timers
//!
//! Two schedules per account, both owned through [`CancelHandle`]s:
//!
//! - the countdown tick, recreated on every issuance and stopped once
//!   nothing is left to count
//! - the optional auto-refresh, first firing one full interval after start
//!
//! Scheduled closures hold a weak reference, so a dropped or shut down
//! manager stops acting on its account.
//!
//! ## Refresh
//!
//! Refreshes for one account are single-flight. A caller arriving while a
//! refresh is in flight waits; if that refresh succeeds it receives the new
//! tokens without a second request. Nothing is retried automatically: a
//! failed scheduled refresh is logged, emitted as [`AuthEvent::Error`], and
//! the schedule carries on.

use crate::config::ConfigProvider;
use crate::error::{AuthError, Result};
use crate::oauth::{OAuthClient, ProbeResult};
use crate::token_store::TokenStore;
use crate::types::{AccountId, ProviderConfig, TokenSet};
use bridge_traits::background::{CancelHandle, ScheduledTask, TaskScheduler};
use bridge_traits::Clock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, TokenEvent};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Wall-clock expiry of the current tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDeadlines {
    pub access: DateTime<Utc>,
    /// `None` when the provider reported no refresh lifetime.
    pub refresh: Option<DateTime<Utc>>,
}

impl TokenDeadlines {
    /// Deadlines for `tokens` issued at `issued_at`.
    ///
    /// A missing or zero `refresh_expires_in` means no refresh deadline.
    pub fn from_tokens(tokens: &TokenSet, issued_at: DateTime<Utc>) -> Self {
        let refresh = tokens
            .refresh_expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| after(issued_at, secs));

        Self {
            access: after(issued_at, tokens.expires_in),
            refresh,
        }
    }

    pub fn countdown(&self, now: DateTime<Utc>) -> Countdown {
        Countdown {
            access_remaining: remaining(self.access, now),
            refresh_remaining: self.refresh.map(|deadline| remaining(deadline, now)),
        }
    }
}

fn after(start: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from(deadline.signed_duration_since(now).num_seconds()).unwrap_or(0)
}

/// Whole seconds left, clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Countdown {
    pub access_remaining: u64,
    pub refresh_remaining: Option<u64>,
}

impl Countdown {
    pub fn access_expired(&self) -> bool {
        self.access_remaining == 0
    }

    pub fn refresh_expired(&self) -> bool {
        self.refresh_remaining == Some(0)
    }

    /// Nothing left to count down.
    pub fn is_settled(&self) -> bool {
        self.access_expired() && self.refresh_remaining.map_or(true, |secs| secs == 0)
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access {}", format_hms(self.access_remaining))?;
        match self.refresh_remaining {
            Some(secs) => write!(f, ", refresh {}", format_hms(secs)),
            None => write!(f, ", refresh n/a"),
        }
    }
}

/// `hh:mm:ss`, zero padded; hours are not wrapped.
pub fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Shared collaborators of every lifecycle manager.
#[derive(Clone)]
pub struct LifecycleContext {
    pub oauth: OAuthClient,
    pub store: Arc<TokenStore>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub countdown_tick: Duration,
}

struct AutoRefresh {
    interval_minutes: u32,
    _handle: CancelHandle,
}

#[derive(Default)]
struct State {
    deadlines: Option<TokenDeadlines>,
    access_expiry_reported: bool,
    refresh_expiry_reported: bool,
    countdown: Option<CancelHandle>,
    auto_refresh: Option<AutoRefresh>,
}

struct Inner {
    account_id: AccountId,
    ctx: LifecycleContext,
    state: Mutex<State>,
    countdown_tx: watch::Sender<Countdown>,
    refresh_lock: tokio::sync::Mutex<()>,
    /// Bumped after every successful refresh
    generation: AtomicU64,
}

/// Deadlines, countdown and refresh scheduling for one account.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("account_id", &self.inner.account_id)
            .field("auto_refresh_minutes", &self.auto_refresh_interval_minutes())
            .finish_non_exhaustive()
    }
}

impl TokenLifecycleManager {
    pub fn new(account_id: AccountId, ctx: LifecycleContext) -> Self {
        let (countdown_tx, _) = watch::channel(Countdown::default());

        Self {
            inner: Arc::new(Inner {
                account_id,
                ctx,
                state: Mutex::new(State::default()),
                countdown_tx,
                refresh_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn account_id(&self) -> AccountId {
        self.inner.account_id
    }

    pub fn deadlines(&self) -> Option<TokenDeadlines> {
        self.inner.state.lock().deadlines
    }

    /// Countdown as of now.
    pub fn countdown(&self) -> Countdown {
        let now = self.inner.ctx.clock.now();
        self.inner
            .state
            .lock()
            .deadlines
            .map(|deadlines| deadlines.countdown(now))
            .unwrap_or_default()
    }

    /// Receiver updated on every tick and issuance.
    pub fn subscribe(&self) -> watch::Receiver<Countdown> {
        self.inner.countdown_tx.subscribe()
    }

    /// New tokens were issued just now.
    pub fn on_tokens_issued(&self, tokens: &TokenSet) {
        let issued_at = self.inner.ctx.clock.now();
        self.apply(TokenDeadlines::from_tokens(tokens, issued_at));
    }

    /// Resume tracking tokens issued at `issued_at`, e.g. after a restart.
    pub fn restore(&self, tokens: &TokenSet, issued_at: DateTime<Utc>) {
        self.apply(TokenDeadlines::from_tokens(tokens, issued_at));
    }

    fn apply(&self, deadlines: TokenDeadlines) {
        let handle = self.schedule_countdown();

        let previous = {
            let mut state = self.inner.state.lock();
            state.deadlines = Some(deadlines);
            state.access_expiry_reported = false;
            state.refresh_expiry_reported = false;
            state.countdown.replace(handle)
        };
        drop(previous);

        debug!(
            account_id = %self.inner.account_id,
            access_deadline = %deadlines.access,
            "Token deadlines updated"
        );
        self.tick();
    }

    fn schedule_countdown(&self) -> CancelHandle {
        let weak = Arc::downgrade(&self.inner);
        let task: ScheduledTask = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(manager) = TokenLifecycleManager::from_weak(&weak) {
                    manager.tick();
                }
            }
            .boxed()
        });

        self.inner
            .ctx
            .scheduler
            .schedule_repeating(self.inner.ctx.countdown_tick, task)
    }

    /// Recompute and publish the countdown.
    ///
    /// Reports each expiry once per issuance and stops the countdown schedule
    /// once nothing is left to count. Driven by the countdown schedule.
    pub fn tick(&self) {
        let now = self.inner.ctx.clock.now();
        let account_id = self.inner.account_id.to_string();

        let (countdown, access_expired, refresh_expired, stopped) = {
            let mut state = self.inner.state.lock();
            let Some(deadlines) = state.deadlines else {
                return;
            };
            let countdown = deadlines.countdown(now);

            let access_expired = countdown.access_expired() && !state.access_expiry_reported;
            state.access_expiry_reported |= access_expired;

            let refresh_expired = countdown.refresh_expired() && !state.refresh_expiry_reported;
            state.refresh_expiry_reported |= refresh_expired;

            let stopped = if countdown.is_settled() {
                state.countdown.take()
            } else {
                None
            };

            (countdown, access_expired, refresh_expired, stopped)
        };

        self.inner.countdown_tx.send_replace(countdown);

        if access_expired {
            info!(account_id = %account_id, "Access token expired");
            self.emit(CoreEvent::Token(TokenEvent::AccessTokenExpired {
                account_id: account_id.clone(),
            }));
        }
        if refresh_expired {
            info!(account_id = %account_id, "Refresh token expired");
            self.emit(CoreEvent::Token(TokenEvent::RefreshTokenExpired {
                account_id: account_id.clone(),
            }));
        }
        if stopped.is_some() {
            debug!(account_id = %account_id, "Countdown finished");
        }
    }

    /// Redeem the account's refresh token now.
    ///
    /// On success the store and deadlines are updated, [`TokenEvent::Refreshed`]
    /// is emitted and the profile is re-fetched. A failed profile fetch is
    /// reported as [`AuthEvent::ProfileFetchFailed`] and keeps the new tokens.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AccountNotFound`] when the account has been removed
    /// - [`AuthError::NoRefreshToken`] when there is nothing to redeem
    /// - [`AuthError::TokenExchange`] / [`AuthError::Network`] from the provider
    #[instrument(skip(self, config), fields(account_id = %self.inner.account_id))]
    pub async fn refresh_now(&self, config: &ProviderConfig) -> Result<TokenSet> {
        let observed = self.inner.generation.load(Ordering::SeqCst);
        let _guard = self.inner.refresh_lock.lock().await;

        if self.inner.generation.load(Ordering::SeqCst) != observed {
            debug!("Joined a refresh that completed while waiting");
            return self.current_tokens().await;
        }

        let account_id = self.inner.account_id;
        let ctx = &self.inner.ctx;

        let refresh_token = self
            .current_tokens()
            .await?
            .refresh_token
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::NoRefreshToken)?;

        let tokens = ctx.oauth.refresh(config, &refresh_token).await?;
        let issued_at = ctx.clock.now();
        ctx.store
            .replace_tokens_for(account_id, tokens.clone(), issued_at)
            .await?;

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let deadlines = TokenDeadlines::from_tokens(&tokens, issued_at);
        self.apply(deadlines);

        self.emit(CoreEvent::Token(TokenEvent::Refreshed {
            account_id: account_id.to_string(),
            access_expires_at: deadlines.access.timestamp(),
        }));

        match ctx.oauth.fetch_profile(config, &tokens.access_token).await {
            Ok(profile) => {
                if let Err(e) = ctx.store.replace_profile_for(account_id, profile).await {
                    warn!(error = %e, "Failed to store refreshed profile");
                }
            }
            Err(e) => {
                warn!(error = %e, "Profile re-fetch failed after refresh");
                self.emit(CoreEvent::Auth(AuthEvent::ProfileFetchFailed {
                    account_id: account_id.to_string(),
                    message: e.to_string(),
                }));
            }
        }

        Ok(tokens)
    }

    async fn current_tokens(&self) -> Result<TokenSet> {
        self.inner
            .ctx
            .store
            .find(self.inner.account_id)
            .await
            .map(|(_, account)| account.tokens)
            .ok_or_else(|| AuthError::AccountNotFound(self.inner.account_id.to_string()))
    }

    /// Refresh every `interval_minutes`, starting one interval from now.
    ///
    /// Replaces any running schedule. The configuration is read from
    /// `config` at each tick.
    pub fn start_auto_refresh(
        &self,
        interval_minutes: u32,
        config: Arc<dyn ConfigProvider>,
    ) -> Result<()> {
        if interval_minutes < 1 {
            return Err(AuthError::InvalidInterval(interval_minutes));
        }

        let weak = Arc::downgrade(&self.inner);
        let task: ScheduledTask = Arc::new(move || {
            let weak = weak.clone();
            let config = config.clone();
            async move {
                if let Some(manager) = TokenLifecycleManager::from_weak(&weak) {
                    manager.auto_refresh_tick(config.as_ref()).await;
                }
            }
            .boxed()
        });

        let interval = Duration::from_secs(u64::from(interval_minutes) * 60);
        let handle = self.inner.ctx.scheduler.schedule_repeating(interval, task);

        let previous = self.inner.state.lock().auto_refresh.replace(AutoRefresh {
            interval_minutes,
            _handle: handle,
        });
        drop(previous);

        info!(
            account_id = %self.inner.account_id,
            interval_minutes,
            "Auto-refresh started"
        );
        self.emit(CoreEvent::Token(TokenEvent::AutoRefreshStarted {
            account_id: self.inner.account_id.to_string(),
            interval_minutes,
        }));
        Ok(())
    }

    async fn auto_refresh_tick(&self, config: &dyn ConfigProvider) {
        let result = match config.provider_config().await {
            Ok(config) => self.refresh_now(&config).await.map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(
                account_id = %self.inner.account_id,
                error = %e,
                "Scheduled refresh failed"
            );
            self.emit(CoreEvent::Auth(AuthEvent::Error {
                account_id: Some(self.inner.account_id.to_string()),
                message: e.to_string(),
                recoverable: e.is_recoverable(),
            }));
        }
    }

    /// Cancel the auto-refresh schedule. No-op when none is running.
    pub fn stop_auto_refresh(&self) {
        let previous = self.inner.state.lock().auto_refresh.take();
        if previous.is_some() {
            drop(previous);
            info!(account_id = %self.inner.account_id, "Auto-refresh stopped");
            self.emit(CoreEvent::Token(TokenEvent::AutoRefreshStopped {
                account_id: self.inner.account_id.to_string(),
            }));
        }
    }

    /// Interval of the running schedule; 0 when disabled.
    pub fn auto_refresh_interval_minutes(&self) -> u32 {
        self.inner
            .state
            .lock()
            .auto_refresh
            .as_ref()
            .map_or(0, |auto| auto.interval_minutes)
    }

    /// Check the current access token against userinfo.
    ///
    /// Reports only; deadlines are left alone whatever the answer.
    #[instrument(skip(self, config), fields(account_id = %self.inner.account_id))]
    pub async fn probe_access_token(&self, config: &ProviderConfig) -> Result<ProbeResult> {
        let tokens = self.current_tokens().await?;
        self.inner.ctx.oauth.probe(config, &tokens.access_token).await
    }

    /// Cancel every timer of this account.
    pub fn shutdown(&self) {
        let (countdown, auto_refresh) = {
            let mut state = self.inner.state.lock();
            (state.countdown.take(), state.auto_refresh.take())
        };
        drop(countdown);
        drop(auto_refresh);
        debug!(account_id = %self.inner.account_id, "Lifecycle timers cancelled");
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.inner.ctx.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(59), "00:00:59");
        assert_eq!(format_hms(3661), "01:01:01");
        assert_eq!(format_hms(360_000), "100:00:00");
    }

    #[test]
    fn test_deadlines_from_tokens() {
        let tokens = TokenSet::new("at", 300).with_refresh_token("rt", Some(1800));
        let deadlines = TokenDeadlines::from_tokens(&tokens, at(1_000));

        assert_eq!(deadlines.access, at(1_300));
        assert_eq!(deadlines.refresh, Some(at(2_800)));
    }

    #[test]
    fn test_zero_refresh_lifetime_means_none() {
        let tokens = TokenSet::new("at", 300).with_refresh_token("rt", Some(0));
        assert_eq!(TokenDeadlines::from_tokens(&tokens, at(0)).refresh, None);

        let tokens = TokenSet::new("at", 300);
        assert_eq!(TokenDeadlines::from_tokens(&tokens, at(0)).refresh, None);
    }

    #[test]
    fn test_countdown_clamps_at_zero() {
        let tokens = TokenSet::new("at", 60).with_refresh_token("rt", Some(120));
        let deadlines = TokenDeadlines::from_tokens(&tokens, at(0));

        let countdown = deadlines.countdown(at(30));
        assert_eq!(countdown.access_remaining, 30);
        assert_eq!(countdown.refresh_remaining, Some(90));
        assert!(!countdown.is_settled());

        let countdown = deadlines.countdown(at(90));
        assert!(countdown.access_expired());
        assert!(!countdown.refresh_expired());
        assert!(!countdown.is_settled());

        let countdown = deadlines.countdown(at(10_000));
        assert_eq!(countdown.access_remaining, 0);
        assert_eq!(countdown.refresh_remaining, Some(0));
        assert!(countdown.is_settled());
    }

    #[test]
    fn test_countdown_display() {
        let countdown = Countdown {
            access_remaining: 65,
            refresh_remaining: None,
        };
        assert_eq!(countdown.to_string(), "access 00:01:05, refresh n/a");
    }

    #[test]
    fn test_huge_lifetime_does_not_overflow() {
        let tokens = TokenSet::new("at", u64::MAX);
        let deadlines = TokenDeadlines::from_tokens(&tokens, at(0));
        assert!(deadlines.access > at(0));
    }
}
