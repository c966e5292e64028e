use thiserror::Error;

/// Failures reported by the login flow, the token store and token lifecycles.
///
/// Nothing in this crate retries on its own. Each variant reaches the caller
/// that started the operation, and [`AuthError::is_recoverable`] tells it
/// whether a user-initiated retry can succeed.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Provider configuration incomplete: missing {}", .missing.join(", "))]
    ConfigIncomplete { missing: Vec<&'static str> },

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("No pending login found; start the login again")]
    MissingVerifier,

    #[error("Token request rejected ({code}): {}", .description.as_deref().unwrap_or("no description"))]
    TokenExchange {
        code: String,
        description: Option<String>,
    },

    #[error("Failed to fetch user profile: {reason}")]
    ProfileFetch { status: Option<u16>, reason: String },

    #[error("Account has no refresh token")]
    NoRefreshToken,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid auto-refresh interval: {0} minutes (minimum is 1)")]
    InvalidInterval(u32),

    #[error("Malformed response from {endpoint} endpoint: {reason}")]
    MalformedResponse {
        endpoint: &'static str,
        reason: String,
    },

    #[error("Persistence failed: {0}")]
    Storage(String),

    #[error("Persisted {key} is corrupted: {reason}")]
    StoreCorrupted { key: String, reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid PKCE verifier: {0}")]
    InvalidVerifier(String),
}

impl AuthError {
    /// Whether retrying the same operation later (or restarting the login)
    /// can succeed without changing configuration or stored data.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::MissingVerifier
                | AuthError::TokenExchange { .. }
                | AuthError::ProfileFetch { .. }
                | AuthError::Network(_)
                | AuthError::Storage(_)
                | AuthError::MalformedResponse { .. }
        )
    }

    /// Provider error code for a rejected token request.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            AuthError::TokenExchange { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
