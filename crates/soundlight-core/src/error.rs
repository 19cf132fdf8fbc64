// ── Core error types ──
//
// User-facing errors from soundlight-core. Consumers never see HTTP status
// codes or socket errors directly; the `From<soundlight_api::Error>` impl
// translates transport-layer failures into this taxonomy.

use thiserror::Error;

pub use soundlight_api::CodecError;

/// Session and login failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Too many attempts -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Cannot reach the account service: {0}")]
    Network(String),

    #[error("Invalid MFA code ({attempts_remaining} attempts remaining)")]
    InvalidCode { attempts_remaining: u32 },

    #[error("MFA challenge expired -- log in again")]
    ChallengeExpired,

    #[error("No MFA challenge is pending")]
    NoPendingChallenge,

    #[error("Session expired -- log in again")]
    RefreshInvalid,

    #[error("Not logged in")]
    NotAuthenticated,
}

/// Device socket failures surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Why a control command did not take effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Device did not acknowledge the command")]
    Timeout,

    #[error("Command queue full -- oldest command dropped")]
    QueueOverflow,

    #[error("Command cancelled")]
    Cancelled,

    #[error("Device rejected the command (status {status_code}){}", detail(.message))]
    Rejected {
        status_code: i32,
        message: Option<String>,
    },
}

#[allow(clippy::ref_option)]
fn detail(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Command(#[from] CommandError),

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Token store error: {message}")]
    TokenStore { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<soundlight_api::Error> for AuthError {
    fn from(err: soundlight_api::Error) -> Self {
        use soundlight_api::Error as Api;
        match err {
            Api::InvalidCredentials => Self::InvalidCredentials,
            Api::InvalidMfaCode => Self::InvalidCode {
                attempts_remaining: 0,
            },
            Api::MfaChallengeExpired => Self::ChallengeExpired,
            Api::RefreshRejected => Self::RefreshInvalid,
            Api::Unauthorized => Self::NotAuthenticated,
            Api::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<soundlight_api::Error> for CoreError {
    fn from(err: soundlight_api::Error) -> Self {
        use soundlight_api::Error as Api;
        match err {
            Api::InvalidCredentials
            | Api::InvalidMfaCode
            | Api::MfaChallengeExpired
            | Api::RefreshRejected
            | Api::Unauthorized
            | Api::RateLimited { .. }
            | Api::Authentication { .. } => CoreError::Auth(AuthError::from(err)),
            Api::NotConnected => CoreError::Transport(TransportError::NotConnected),
            Api::WebSocketConnect(msg) => CoreError::Transport(TransportError::SendFailed(msg)),
            Api::WebSocketClosed { code, reason } => CoreError::Transport(
                TransportError::SendFailed(format!("closed ({code}): {reason}")),
            ),
            Api::HeartbeatTimeout { .. } => CoreError::Transport(TransportError::NotConnected),
            Api::Codec(e) => CoreError::Codec(e),
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            Api::Transport(ref e) => CoreError::Api {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            Api::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            Api::Deserialization { message, .. } => CoreError::Api {
                message: format!("Unexpected response: {message}"),
                status: None,
            },
        }
    }
}

impl CoreError {
    /// `true` when the user has to log in (again) to continue.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Auth(
                AuthError::NotAuthenticated
                    | AuthError::RefreshInvalid
                    | AuthError::ChallengeExpired
                    | AuthError::InvalidCredentials
            )
        )
    }
}
