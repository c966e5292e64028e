//! Keycloak OpenID Connect endpoints
//!
//! This module speaks the wire protocol of RFC 6749 (authorization code and
//! refresh grants) with RFC 7636 PKCE against a Keycloak realm:
//!
//! - `.../auth` authorize URL construction
//! - `.../token` code exchange and refresh
//! - `.../userinfo` profile fetch and access token probe
//!
//! # Failure model
//!
//! Every call is a single attempt bounded by the configured timeout. A body
//! shaped like `{"error": ..., "error_description": ...}` is a provider
//! rejection ([`AuthError::TokenExchange`]) whatever the status; other non-2xx
//! replies become `TokenExchange` with code `http_<status>`. Transport
//! failures and timeouts are [`AuthError::Network`]. Nothing is retried.
//!
//! # Security
//!
//! Codes, verifiers and tokens are never logged.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::OAuthClient;
//! use core_auth::{PkcePair, ProviderConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = ProviderConfig::new(
//!     "https://sso.example.com",
//!     "demo",
//!     "web",
//!     "openid profile email",
//!     "http://localhost:5173",
//! );
//! let client = OAuthClient::new(http_client, Duration::from_secs(30));
//! let pkce = PkcePair::generate();
//! let url = client.authorize_url(&config, pkce.challenge())?;
//! // Send the user to `url`, then with the returned code:
//! let tokens = client.exchange_code(&config, "code", pkce.verifier()).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{Profile, ProviderConfig, TokenSet};
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Outcome of calling userinfo with the current access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// True iff the provider answered with a 2xx status
    pub valid: bool,
    pub status: u16,
}

/// `{error, error_description}` payload returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct ProviderError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for one Keycloak realm's OpenID Connect endpoints.
///
/// Stateless apart from the transport; the realm is passed per call so a
/// configuration change takes effect on the next request.
#[derive(Clone)]
pub struct OAuthClient {
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl OAuthClient {
    pub fn new(http_client: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }

    /// Build the authorize URL for `challenge`.
    ///
    /// Always sends `prompt=login` so the provider asks for credentials even
    /// when a session cookie exists, which is what makes adding a second
    /// account from the same browser possible.
    pub fn authorize_url(&self, config: &ProviderConfig, challenge: &str) -> Result<String> {
        let mut url = Url::parse(&config.auth_endpoint())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("scope", &config.scope)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "login");

        debug!(realm = %config.realm, "Built authorization URL");
        Ok(url.into())
    }

    /// Exchange an authorization code for tokens.
    #[instrument(skip(self, config, code, verifier), fields(realm = %config.realm))]
    pub async fn exchange_code(
        &self,
        config: &ProviderConfig,
        code: &str,
        verifier: &str,
    ) -> Result<TokenSet> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];

        debug!("Exchanging authorization code for tokens");
        let tokens = self.token_request(config, &params).await?;

        info!(
            expires_in = tokens.expires_in,
            has_refresh_token = tokens.has_refresh_token(),
            "Exchanged authorization code for tokens"
        );
        Ok(tokens)
    }

    /// Redeem a refresh token.
    ///
    /// Keycloak may omit `refresh_token` from the reply; the one that was
    /// sent stays valid in that case and is carried over.
    #[instrument(skip(self, config, refresh_token), fields(realm = %config.realm))]
    pub async fn refresh(&self, config: &ProviderConfig, refresh_token: &str) -> Result<TokenSet> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        debug!("Refreshing access token");
        let mut tokens = self.token_request(config, &params).await?;

        if !tokens.has_refresh_token() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }

        info!(expires_in = tokens.expires_in, "Refreshed access token");
        Ok(tokens)
    }

    /// Fetch the userinfo claims for `access_token`.
    ///
    /// Every failure, transport included, is reported as
    /// [`AuthError::ProfileFetch`]: the tokens themselves are not in doubt.
    #[instrument(skip(self, config, access_token), fields(realm = %config.realm))]
    pub async fn fetch_profile(&self, config: &ProviderConfig, access_token: &str) -> Result<Profile> {
        let request = HttpRequest::new(HttpMethod::Get, config.userinfo_endpoint())
            .bearer_token(access_token)
            .header("Accept", "application/json");

        let response = self.send(request).await.map_err(|e| AuthError::ProfileFetch {
            status: None,
            reason: e.to_string(),
        })?;

        if !response.is_success() {
            warn!(status = response.status, "Userinfo request rejected");
            return Err(AuthError::ProfileFetch {
                status: Some(response.status),
                reason: format!("userinfo endpoint returned {}", response.status),
            });
        }

        match response.json::<Value>() {
            Ok(Value::Object(claims)) => {
                debug!(claims = claims.len(), "Fetched user profile");
                Ok(Profile(claims))
            }
            Ok(_) => Err(AuthError::ProfileFetch {
                status: Some(response.status),
                reason: "userinfo body is not a JSON object".to_string(),
            }),
            Err(e) => Err(AuthError::ProfileFetch {
                status: Some(response.status),
                reason: e.to_string(),
            }),
        }
    }

    /// Ask userinfo whether `access_token` is still accepted.
    #[instrument(skip(self, config, access_token), fields(realm = %config.realm))]
    pub async fn probe(&self, config: &ProviderConfig, access_token: &str) -> Result<ProbeResult> {
        let request =
            HttpRequest::new(HttpMethod::Get, config.userinfo_endpoint()).bearer_token(access_token);
        let response = self.send(request).await?;

        let result = ProbeResult {
            valid: response.is_success(),
            status: response.status,
        };
        debug!(status = result.status, valid = result.valid, "Probed access token");
        Ok(result)
    }

    async fn token_request(
        &self,
        config: &ProviderConfig,
        params: &[(&str, &str)],
    ) -> Result<TokenSet> {
        let request = HttpRequest::new(HttpMethod::Post, config.token_endpoint())
            .header("Accept", "application/json")
            .form(params)
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let response = self.send(request).await?;
        parse_token_response(&response)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.timeout(self.timeout);

        match tokio::time::timeout(self.timeout, self.http_client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(BridgeError::Timeout(after))) => {
                warn!(timeout_ms = after.as_millis() as u64, "Provider request timed out");
                Err(AuthError::Network(format!("request timed out after {:?}", after)))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Provider request failed");
                Err(AuthError::Network(e.to_string()))
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider request timed out"
                );
                Err(AuthError::Network(format!(
                    "request timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenSet> {
    if let Ok(rejection) = response.json::<ProviderError>() {
        warn!(
            status = response.status,
            error = %rejection.error,
            "Token endpoint rejected the request"
        );
        return Err(AuthError::TokenExchange {
            code: rejection.error,
            description: rejection.error_description,
        });
    }

    if !response.is_success() {
        let body = response.text().unwrap_or_default();
        let body = body.trim();
        warn!(status = response.status, "Token endpoint returned an error status");
        return Err(AuthError::TokenExchange {
            code: format!("http_{}", response.status),
            description: (!body.is_empty()).then(|| body.to_string()),
        });
    }

    response.json().map_err(|e| AuthError::MalformedResponse {
        endpoint: "token",
        reason: e.to_string(),
    })
}
