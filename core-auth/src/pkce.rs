//! PKCE (RFC 7636) verifier and S256 challenge.
//!
//! The verifier is 28 random bytes rendered as lowercase hex (56 characters,
//! inside the 43..=128 range the RFC allows). The challenge is
//! `BASE64URL(SHA256(verifier))` without padding.

use crate::error::{AuthError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

const VERIFIER_BYTES: usize = 28;

/// Verifier/challenge pair for one login attempt.
///
/// Only the challenge leaves the process with the authorize URL. The
/// verifier is persisted until the code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Fresh pair from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let verifier = hex::encode(bytes);
        let challenge = challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }

    /// Rebuild the pair from a stored verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Result<Self> {
        let verifier = verifier.into();
        let challenge = derive_challenge(&verifier)?;
        Ok(Self {
            verifier,
            challenge,
        })
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// S256 challenge for `verifier`.
///
/// # Errors
///
/// [`AuthError::InvalidVerifier`] for an empty verifier.
pub fn derive_challenge(verifier: &str) -> Result<String> {
    if verifier.is_empty() {
        return Err(AuthError::InvalidVerifier(
            "verifier must not be empty".to_string(),
        ));
    }
    Ok(challenge_for(verifier))
}

fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
