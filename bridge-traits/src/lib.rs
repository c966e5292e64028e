//! # Host Bridge Traits
//!
//! Ports the auth core needs from its host, with no platform code of its own.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP for token and userinfo calls
//! - [`SettingsStore`](storage::SettingsStore) - Key-value persistence with transactions
//! - [`TaskScheduler`](background::TaskScheduler) - Cancellable repeating tasks
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing (see `core_runtime::config::CoreConfigBuilder::build`).
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the message actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! by every account's lifecycle tasks.

pub mod background;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{CancelHandle, ScheduledTask, TaskScheduler};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{SettingsStore, SettingsTransaction};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
