//! Redirect callback parsing.
//!
//! The provider sends the user agent back to `redirect_uri?code=...` (or
//! `?error=...`). After handling, the caller should replace the address with
//! [`RedirectParams::normalized_url`] so a reload does not replay the code.

use crate::error::{AuthError, Result};
use url::Url;

/// What the provider put on the redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Scheme, host, port and path of the redirect; no query or fragment.
    pub normalized_url: String,
}

impl RedirectParams {
    /// Whether this URL is a login callback at all.
    pub fn is_callback(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    /// Whether the redirect landed on `redirect_uri`.
    ///
    /// Scheme, host, port and path must all match; the query is ignored.
    pub fn is_for(&self, redirect_uri: &str) -> bool {
        let (Ok(landed), Ok(expected)) = (Url::parse(&self.normalized_url), Url::parse(redirect_uri.trim()))
        else {
            return false;
        };

        landed.scheme() == expected.scheme()
            && landed.host_str() == expected.host_str()
            && landed.port_or_known_default() == expected.port_or_known_default()
            && landed.path() == expected.path()
    }

    /// The provider-reported rejection, if any.
    pub fn provider_error(&self) -> Option<AuthError> {
        self.error.as_ref().map(|code| AuthError::TokenExchange {
            code: code.clone(),
            description: self.error_description.clone(),
        })
    }

    /// The authorization code, or the provider's rejection.
    ///
    /// `Ok(None)` means there was nothing to handle.
    pub fn into_code(self) -> Result<Option<String>> {
        if let Some(err) = self.provider_error() {
            return Err(err);
        }
        Ok(self.code)
    }
}

impl std::fmt::Debug for RedirectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectParams")
            .field("code", &self.code.as_ref().map(|_| "[REDACTED]"))
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .field("normalized_url", &self.normalized_url)
            .finish()
    }
}

/// Split a redirect URL into its callback parameters and the bare address.
///
/// Empty `code`/`error` values count as absent.
pub fn parse_redirect(url: &str) -> Result<RedirectParams> {
    let mut parsed = Url::parse(url.trim()).map_err(|e| AuthError::MalformedResponse {
        endpoint: "redirect",
        reason: e.to_string(),
    })?;

    let mut code = None;
    let mut error = None;
    let mut error_description = None;

    for (key, value) in parsed.query_pairs() {
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    parsed.set_query(None);
    parsed.set_fragment(None);

    Ok(RedirectParams {
        code,
        error,
        error_description,
        normalized_url: parsed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code_and_normalize() {
        let params =
            parse_redirect("https://app.test:8443/cb?code=abc&session_state=s1#frag").unwrap();

        assert!(params.is_callback());
        assert_eq!(params.code.as_deref(), Some("abc"));
        assert_eq!(params.normalized_url, "https://app.test:8443/cb");
        assert_eq!(params.into_code().unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_provider_error() {
        let params = parse_redirect(
            "https://app.test/?error=access_denied&error_description=User%20cancelled",
        )
        .unwrap();

        assert!(params.is_callback());
        match params.into_code() {
            Err(AuthError::TokenExchange { code, description }) => {
                assert_eq!(code, "access_denied");
                assert_eq!(description.as_deref(), Some("User cancelled"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_plain_url_is_not_a_callback() {
        let params = parse_redirect("https://app.test/home?tab=1&code=").unwrap();
        assert!(!params.is_callback());
        assert_eq!(params.normalized_url, "https://app.test/home");
        assert_eq!(params.into_code().unwrap(), None);
    }

    #[test]
    fn test_is_for_compares_origin_and_path() {
        let params = parse_redirect("https://app.test:443/cb?code=abc").unwrap();
        assert!(params.is_for("https://app.test/cb"));
        assert!(params.is_for("https://app.test/cb?unused=1"));
        assert!(!params.is_for("https://app.test/other"));
        assert!(!params.is_for("http://app.test/cb"));
        assert!(!params.is_for("https://app.test:8443/cb"));
        assert!(!params.is_for("https://evil.test/cb"));
        assert!(!params.is_for(""));
    }

    #[test]
    fn test_unparseable_redirect() {
        assert!(matches!(
            parse_redirect("not a url"),
            Err(AuthError::MalformedResponse { endpoint: "redirect", .. })
        ));
    }

    #[test]
    fn test_debug_hides_code() {
        let params = parse_redirect("https://app.test/?code=secret-code").unwrap();
        assert!(!format!("{:?}", params).contains("secret-code"));
    }
}
