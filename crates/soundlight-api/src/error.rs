use thiserror::Error;

use crate::codec::CodecError;

/// Top-level error type for the `soundlight-api` crate.
///
/// Covers every failure mode across the account API and the device
/// WebSocket: authentication, transport, wire codec, and data decoding.
/// `soundlight-core` maps these into its user-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Email/password rejected by the account service.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The MFA code was wrong.
    #[error("Invalid MFA code")]
    InvalidMfaCode,

    /// The MFA challenge is no longer valid.
    #[error("MFA challenge expired")]
    MfaChallengeExpired,

    /// Refresh token rejected -- full re-login required.
    #[error("Refresh token rejected -- re-authentication required")]
    RefreshRejected,

    /// Access token rejected by an authenticated endpoint.
    #[error("Access token rejected")]
    Unauthorized,

    /// Any other authentication failure.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Rate limited by the account service. Includes retry-after in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Unexpected HTTP status from the account service.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the device endpoint.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// No traffic seen within the heartbeat window.
    #[error("No traffic for {timeout_secs}s -- connection presumed dead")]
    HeartbeatTimeout { timeout_secs: u64 },

    /// No active device connection to send on.
    #[error("Device not connected")]
    NotConnected,

    // ── Data ────────────────────────────────────────────────────────
    /// Wire codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the access token has expired
    /// and a refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
