//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the auth core and its front ends:
//! - Logging and tracing setup with credential redaction
//! - `CoreConfig` assembly of bridge capabilities
//! - Event bus for account and token lifecycle events

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, EventStream, TokenEvent};
