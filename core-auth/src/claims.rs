//! Unverified JWT payload decoding for display.
//!
//! Signatures are not checked. The result is for inspection only and must
//! never drive an authorization decision.

use crate::types::TokenSet;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{Map, Value};

/// Decode the payload segment of a compact JWT.
///
/// Returns `None` for anything that is not three dot-separated segments with
/// a base64url JSON object in the middle.
pub fn decode_claims(token: &str) -> Option<Map<String, Value>> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;

    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

impl TokenSet {
    /// Claims carried by the access token, if it is a JWT.
    pub fn access_claims(&self) -> Option<Map<String, Value>> {
        decode_claims(&self.access_token)
    }

    /// Claims carried by the ID token.
    pub fn id_claims(&self) -> Option<Map<String, Value>> {
        self.id_token.as_deref().and_then(decode_claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn test_decode_claims() {
        let jwt = make_jwt(&json!({"sub": "s-1", "preferred_username": "alice", "exp": 100}));
        let claims = decode_claims(&jwt).unwrap();
        assert_eq!(claims["preferred_username"], "alice");
        assert_eq!(claims["exp"], 100);
    }

    #[test]
    fn test_decode_padded_payload() {
        let payload = URL_SAFE.encode(br#"{"a":1}"#);
        assert!(payload.ends_with('='));
        let claims = decode_claims(&format!("h.{}.s", payload)).unwrap();
        assert_eq!(claims["a"], 1);
    }

    #[test]
    fn test_decode_rejects_non_jwt() {
        assert!(decode_claims("opaque-token").is_none());
        assert!(decode_claims("a.b").is_none());
        assert!(decode_claims("a.b.c.d").is_none());
        assert!(decode_claims("h.!!!.s").is_none());

        let array = URL_SAFE_NO_PAD.encode("[1,2]");
        assert!(decode_claims(&format!("h.{}.s", array)).is_none());
    }

    #[test]
    fn test_token_set_claims() {
        let tokens = TokenSet::new(make_jwt(&json!({"azp": "c1"})), 60)
            .with_id_token(make_jwt(&json!({"aud": "c1"})));

        assert_eq!(tokens.access_claims().unwrap()["azp"], "c1");
        assert_eq!(tokens.id_claims().unwrap()["aud"], "c1");
        assert!(TokenSet::new("opaque", 60).id_claims().is_none());
    }
}
