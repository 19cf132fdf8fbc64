// Token material and the seam between the session owner and device transports.
//
// The account service issues a JWT access token plus an opaque refresh
// token. Transports never own tokens: before every handshake they ask a
// `TokenSource` for a snapshot, and they watch its `SessionSignal` to learn
// when the session is revoked or re-established.

use std::future::Future;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;

/// Access + refresh token pair returned by login, MFA, and refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Expiry read from the access token's `exp` claim, when present.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    pub fn new(access_token: SecretString, refresh_token: SecretString) -> Self {
        let expires_at = jwt_expiry(access_token.expose_secret());
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<f64>,
}

/// Extract the `exp` claim from a JWT without verifying its signature.
///
/// Returns `None` for anything that is not a three-part token with a
/// base64url JSON payload carrying a numeric `exp`.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&decoded).ok()?;

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let secs = claims.exp?.trunc() as i64;
    DateTime::from_timestamp(secs, 0)
}

/// Authorization status published by the session owner.
///
/// `generation` increases every time new tokens are installed, so a
/// transport parked in `Failed` can tell a fresh login from a refresh it
/// already tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSignal {
    pub authorized: bool,
    pub generation: u64,
}

/// Why a token could not be produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// No usable session -- the user has to log in again.
    #[error("no authenticated session")]
    Unavailable,

    /// Temporary failure (network); retry with backoff.
    #[error("token temporarily unavailable: {0}")]
    Transient(String),
}

/// Supplies authentication material to device transports.
pub trait TokenSource: Send + Sync + 'static {
    /// A valid access token, refreshed first if it is close to expiry.
    fn access_token(&self) -> impl Future<Output = Result<SecretString, TokenError>> + Send;

    /// Called when a device endpoint rejected the current token.
    fn refresh_after_rejection(
        &self,
    ) -> impl Future<Output = Result<SecretString, TokenError>> + Send;

    /// Watch of session authorization changes.
    fn signals(&self) -> watch::Receiver<SessionSignal>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn extracts_exp_claim() {
        let token = jwt_with_payload(r#"{"sub":"42","exp":1900000000}"#);
        let exp = jwt_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn tolerates_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1900000000}"#);
        let token = format!("h.{payload}.s");
        assert_eq!(jwt_expiry(&token).unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn opaque_tokens_have_no_expiry() {
        assert!(jwt_expiry("not-a-jwt").is_none());
        assert!(jwt_expiry("a.b").is_none());
        assert!(jwt_expiry("a.b.c.d").is_none());
        assert!(jwt_expiry(&jwt_with_payload(r#"{"sub":"42"}"#)).is_none());
    }

    #[test]
    fn token_pair_reads_expiry() {
        let token = jwt_with_payload(r#"{"exp":1900000000}"#);
        let pair = TokenPair::new(token.into(), "refresh".to_string().into());
        assert_eq!(pair.expires_at.unwrap().timestamp(), 1_900_000_000);
    }
}
