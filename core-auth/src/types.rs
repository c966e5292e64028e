use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Stable identifier for an account entry.
///
/// Accounts are addressed by position in the public API, but positions shift
/// when an earlier account is removed. Timers and in-flight refreshes hold an
/// `AccountId` instead, so they keep targeting the entry they were created for.
///
/// # Examples
///
/// ```
/// use core_auth::AccountId;
///
/// let id = AccountId::new();
/// let parsed = AccountId::from_string(&id.to_string()).unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keycloak client registration the flows run against.
///
/// Persisted as JSON with camelCase keys (`clientId`, `redirectUri`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Authorization server base, e.g. `https://sso.example.com`
    pub url: String,
    pub realm: String,
    pub client_id: String,
    /// Space separated scopes
    pub scope: String,
    pub redirect_uri: String,
}

/// Scope requested when none is configured.
pub const DEFAULT_SCOPE: &str = "openid profile email";

impl ProviderConfig {
    pub fn new(
        url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        scope: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            scope: scope.into(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Build from `KC_URL`, `KC_REALM`, `KC_CLIENT_ID`, `KC_SCOPE` and
    /// `KC_REDIRECT_URI`. Unset variables become empty fields, except the
    /// scope which defaults to [`DEFAULT_SCOPE`].
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).unwrap_or_default();
        let scope = read("KC_SCOPE");

        Self {
            url: read("KC_URL"),
            realm: read("KC_REALM"),
            client_id: read("KC_CLIENT_ID"),
            scope: if scope.is_empty() {
                DEFAULT_SCOPE.to_string()
            } else {
                scope
            },
            redirect_uri: read("KC_REDIRECT_URI"),
        }
    }

    /// Names of the fields that are still blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("url", &self.url),
            ("realm", &self.realm),
            ("client_id", &self.client_id),
            ("scope", &self.scope),
            ("redirect_uri", &self.redirect_uri),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    /// Fail fast before any flow starts.
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(AuthError::ConfigIncomplete { missing });
        }

        Url::parse(&self.url)
            .map_err(|e| AuthError::InvalidConfig(format!("url {:?}: {}", self.url, e)))?;
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::InvalidConfig(format!("redirect_uri {:?}: {}", self.redirect_uri, e))
        })?;

        Ok(())
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            self.url.trim_end_matches('/'),
            self.realm,
            name
        )
    }

    pub fn auth_endpoint(&self) -> String {
        self.endpoint("auth")
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("token")
    }

    pub fn userinfo_endpoint(&self) -> String {
        self.endpoint("userinfo")
    }
}

fn default_expires_in() -> u64 {
    3600
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint response.
///
/// Lifetimes are relative seconds as of issuance. Fields beyond the named
/// ones (`scope`, `session_state`, ...) are kept verbatim in `extra`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            id_token: None,
            expires_in,
            refresh_expires_in: None,
            token_type: default_token_type(),
            extra: Map::new(),
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>, expires_in: Option<u64>) -> Self {
        self.refresh_token = Some(token.into());
        self.refresh_expires_in = expires_in;
        self
    }

    pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(token.into());
        self
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

// Custom Debug implementation that redacts sensitive tokens
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("token_type", &self.token_type)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

/// Userinfo claims, kept as returned by the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(pub Map<String, Value>);

impl Profile {
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    /// Stand-in committed when the userinfo call fails after a good exchange.
    pub fn placeholder() -> Self {
        Self(Map::new())
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    /// `preferred_username`, or "Unknown".
    pub fn display_name(&self) -> &str {
        self.0
            .get("preferred_username")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(Self::UNKNOWN_NAME)
    }

    /// The `sub` claim.
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }
}

/// One signed-in identity: its tokens and profile.
///
/// The same person may appear twice if they log in twice; entries are never
/// merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: AccountId,
    pub tokens: TokenSet,
    #[serde(default)]
    pub profile: Profile,
    /// When the current tokens were committed. Absent in entries written
    /// before issuance tracking existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(tokens: TokenSet, profile: Profile, issued_at: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            tokens,
            profile,
            issued_at: Some(issued_at),
        }
    }

    pub fn display_name(&self) -> &str {
        self.profile.display_name()
    }
}
