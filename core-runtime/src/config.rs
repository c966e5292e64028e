//! # Core Configuration Module
//!
//! Collects the bridge capabilities and tunables the auth core runs with.
//!
//! ## Overview
//!
//! `CoreConfig` is built with [`CoreConfigBuilder`] and validated fail-fast:
//! anything the core cannot run without is reported with an actionable
//! [`Error::CapabilityMissing`] before a single request is made.
//!
//! ## Required Dependencies
//!
//! - `SettingsStore` - persistence for accounts, provider config and the pending verifier
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - token, userinfo and probe calls (desktop default: reqwest)
//! - `TaskScheduler` - countdown ticks and auto-refresh (desktop default: tokio)
//! - `Clock` - deadline arithmetic (default: system clock)
//!
//! The HTTP client and scheduler defaults are only available with the
//! `desktop-shims` feature.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;
//! let config = CoreConfig::builder()
//!     .settings_store(Arc::new(settings))
//!     .http_timeout(Duration::from_secs(15))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, HttpClient, SettingsStore, SystemClock, TaskScheduler};
use std::sync::Arc;
use std::time::Duration;

/// Default prefix for persisted keys (`kc_config`, `kc_accounts`, ...).
pub const DEFAULT_STORAGE_PREFIX: &str = "kc_";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Core configuration for the auth core.
#[derive(Clone)]
pub struct CoreConfig {
    /// HTTP transport for provider endpoints
    pub http_client: Arc<dyn HttpClient>,

    /// Key-value persistence (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// Repeating task scheduler for countdowns and auto-refresh
    pub scheduler: Arc<dyn TaskScheduler>,

    /// Time source for token deadlines
    pub clock: Arc<dyn Clock>,

    /// Prefix applied to every persisted key
    pub storage_prefix: String,

    /// Upper bound on a single provider request
    pub http_timeout: Duration,

    /// Countdown refresh period
    pub countdown_tick: Duration,

    /// Event bus capacity per subscriber
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("storage_prefix", &self.storage_prefix)
            .field("http_timeout", &self.http_timeout)
            .field("countdown_tick", &self.countdown_tick)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates tunables.
    pub fn validate(&self) -> Result<()> {
        if self.storage_prefix.chars().any(char::is_whitespace) {
            return Err(Error::Config(
                "Storage prefix must not contain whitespace".to_string(),
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(Error::Config(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }

        if self.countdown_tick < Duration::from_millis(100) {
            return Err(Error::Config(
                "Countdown tick must be at least 100ms".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required to persist accounts. \
                 Desktop: open a bridge_desktop::SqliteSettingsStore. \
                 Tests: inject an in-memory store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout)
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: enable the 'desktop-shims' feature. \
                 Other hosts: inject a platform HTTP adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_scheduler() -> Result<Arc<dyn TaskScheduler>> {
    Ok(Arc::new(bridge_desktop::TokioScheduler::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_scheduler() -> Result<Arc<dyn TaskScheduler>> {
    Err(Error::CapabilityMissing {
        capability: "TaskScheduler".to_string(),
        message: "No TaskScheduler implementation provided. \
                 Desktop: enable the 'desktop-shims' feature. \
                 Other hosts: inject a scheduler backed by the host event loop."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    clock: Option<Arc<dyn Clock>>,
    storage_prefix: Option<String>,
    http_timeout: Option<Duration>,
    countdown_tick: Option<Duration>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the settings store implementation (required).
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Prefix for persisted keys. Default: `kc_`.
    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = Some(prefix.into());
        self
    }

    /// Timeout applied to every provider request. Default: 30s.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Countdown refresh period. Default: 1s.
    pub fn countdown_tick(mut self, tick: Duration) -> Self {
        self.countdown_tick = Some(tick);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when the settings store is absent, or the
    ///   HTTP client / scheduler is absent without `desktop-shims`
    /// - [`Error::Config`] when a tunable is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let settings_store = self.settings_store.ok_or_else(settings_store_missing_error)?;
        let http_timeout = self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(http_timeout)?,
        };

        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => provide_default_scheduler()?,
        };

        let config = CoreConfig {
            http_client,
            settings_store,
            scheduler,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            storage_prefix: self
                .storage_prefix
                .unwrap_or_else(|| DEFAULT_STORAGE_PREFIX.to_string()),
            http_timeout,
            countdown_tick: self.countdown_tick.unwrap_or(DEFAULT_COUNTDOWN_TICK),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
