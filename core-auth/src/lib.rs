//! # Authentication Module
//!
//! Keycloak Authorization Code + PKCE client holding several signed-in
//! accounts at once.
//!
//! ## Overview
//!
//! This module runs the browser login against one Keycloak client
//! registration, stores every resulting account, and keeps each account's
//! tokens alive: expiry countdowns, manual and scheduled refresh, and
//! access-token probing against the userinfo endpoint.
//!
//! ## Features
//!
//! - Authorization Code flow with S256 PKCE and a single-use verifier
//! - Multi-account token store persisted through the settings bridge
//! - Per-account expiry countdowns and optional auto-refresh timers
//! - Single-flight refresh per account
//! - Auth and token event emission on the core event bus

pub mod callback;
pub mod claims;
pub mod config;
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod manager;
pub mod oauth;
pub mod pkce;
pub mod token_store;
pub mod types;

pub use callback::{parse_redirect, RedirectParams};
pub use claims::decode_claims;
pub use config::{ConfigProvider, StoredConfigProvider};
pub use error::{AuthError, Result};
pub use flow::{AuthFlowController, CompletedLogin, LoginRequest, ProfilePolicy};
pub use lifecycle::{format_hms, Countdown, LifecycleContext, TokenDeadlines, TokenLifecycleManager};
pub use manager::{AddedAccount, AuthManager, RedirectOutcome};
pub use oauth::{OAuthClient, ProbeResult};
pub use pkce::{derive_challenge, PkcePair};
pub use token_store::TokenStore;
pub use types::{Account, AccountId, Profile, ProviderConfig, TokenSet, DEFAULT_SCOPE};
