//! # Event Bus System
//!
//! Broadcasts what happens to accounts and their tokens so a front end can
//! react without polling: logins, removals, refreshes, expiries and errors.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ AuthFlowController ├────────>│           ├────────────>│ CLI / UI   │
//! └────────────────────┘         │ EventBus  │             └────────────┘
//! ┌────────────────────┐  emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ TokenLifecycle     ├────────>│  channel) ├────────────>│ Logger     │
//! └────────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(64);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Auth(AuthEvent::LoginStarted)).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event, CoreEvent::Auth(AuthEvent::LoginStarted));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Emitting with no subscribers returns `Err(SendError)`; emitters ignore it.
//! A slow subscriber receives `RecvError::Lagged(n)` from a raw receiver;
//! [`EventStream`] logs and skips past the gap instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::warn;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Login flow and account membership events
    Auth(AuthEvent),
    /// Per-account token lifecycle events
    Token(TokenEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Token(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::ProfileFetchFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Token(TokenEvent::AccessTokenExpired { .. })
            | CoreEvent::Token(TokenEvent::RefreshTokenExpired { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::AccountAdded { .. })
            | CoreEvent::Auth(AuthEvent::AccountRemoved { .. })
            | CoreEvent::Token(TokenEvent::Refreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// The account this event concerns, when there is one.
    pub fn account_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Auth(AuthEvent::LoginStarted) => None,
            CoreEvent::Auth(AuthEvent::AccountAdded { account_id, .. })
            | CoreEvent::Auth(AuthEvent::AccountRemoved { account_id })
            | CoreEvent::Auth(AuthEvent::ProfileFetchFailed { account_id, .. }) => {
                Some(account_id)
            }
            CoreEvent::Auth(AuthEvent::Error { account_id, .. }) => account_id.as_deref(),
            CoreEvent::Token(event) => Some(event.account_id()),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to the login flow and the account collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// An authorize URL was issued and a verifier is pending.
    LoginStarted,
    /// A login completed and the account was committed.
    AccountAdded {
        account_id: String,
        /// Display name taken from the profile (`preferred_username`).
        display_name: String,
    },
    /// An account was removed and its timers cancelled.
    AccountRemoved { account_id: String },
    /// Tokens are valid but the userinfo call failed.
    ProfileFetchFailed { account_id: String, message: String },
    /// An operation failed. Nothing is retried automatically.
    Error {
        account_id: Option<String>,
        message: String,
        /// Whether a user-initiated retry can succeed.
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::LoginStarted => "Login started",
            AuthEvent::AccountAdded { .. } => "Account added",
            AuthEvent::AccountRemoved { .. } => "Account removed",
            AuthEvent::ProfileFetchFailed { .. } => "Profile fetch failed",
            AuthEvent::Error { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Token Events
// ============================================================================

/// Events emitted by an account's token lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TokenEvent {
    /// New tokens were issued by a refresh.
    Refreshed {
        account_id: String,
        /// Access token deadline (Unix epoch seconds).
        access_expires_at: i64,
    },
    /// The access countdown reached zero.
    AccessTokenExpired { account_id: String },
    /// The refresh countdown reached zero.
    RefreshTokenExpired { account_id: String },
    AutoRefreshStarted {
        account_id: String,
        interval_minutes: u32,
    },
    AutoRefreshStopped { account_id: String },
}

impl TokenEvent {
    fn description(&self) -> &str {
        match self {
            TokenEvent::Refreshed { .. } => "Tokens refreshed",
            TokenEvent::AccessTokenExpired { .. } => "Access token expired",
            TokenEvent::RefreshTokenExpired { .. } => "Refresh token expired",
            TokenEvent::AutoRefreshStarted { .. } => "Auto-refresh started",
            TokenEvent::AutoRefreshStopped { .. } => "Auto-refresh stopped",
        }
    }

    fn account_id(&self) -> &str {
        match self {
            TokenEvent::Refreshed { account_id, .. }
            | TokenEvent::AccessTokenExpired { account_id }
            | TokenEvent::RefreshTokenExpired { account_id }
            | TokenEvent::AutoRefreshStarted { account_id, .. }
            | TokenEvent::AutoRefreshStopped { account_id } => account_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Subscribe through an [`EventStream`].
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus};
///
/// let event_bus = EventBus::default();
/// let token_events = event_bus
///     .stream()
///     .filter(|event| matches!(event, CoreEvent::Token(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by [`recv`](Self::recv).
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events concerning `account_id`.
    pub fn for_account(self, account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        self.filter(move |event| event.account_id() == Some(account_id.as_str()))
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    ///
    /// Lagging is logged and skipped. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<CoreEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered matching event without waiting.
    pub fn try_recv(&mut self) -> Option<CoreEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
