//! # kc-workspace
//!
//! Facade over the workspace crates: a Keycloak Authorization Code + PKCE
//! client that keeps several accounts signed in at once and tracks their token
//! lifetimes.
//!
//! - [`auth`]: PKCE, token storage, login flow, lifecycle and orchestration
//! - [`runtime`]: logging, configuration and the event bus
//! - [`bridge`]: host capability traits
//! - `desktop` (feature `desktop-shims`): reqwest / sqlx / tokio adapters

pub use bridge_traits as bridge;
pub use core_auth as auth;
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;

pub use core_auth::{AuthError, AuthManager, ProviderConfig};
pub use core_runtime::{CoreConfig, CoreEvent, EventBus};
