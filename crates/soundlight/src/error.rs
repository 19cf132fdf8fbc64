//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable
//! help text.

use miette::Diagnostic;
use thiserror::Error;

use soundlight_config::ConfigError;
use soundlight_core::{AuthError, CommandError, CoreError, TransportError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the account service: {reason}")]
    #[diagnostic(
        code(soundlight::network),
        help("Check your network connection, or raise --timeout.")
    )]
    Network { reason: String },

    #[error("Device '{device}' is not connected ({state})")]
    #[diagnostic(
        code(soundlight::device_offline),
        help(
            "The unit may be offline or asleep. Raise --wait, or run \
             `soundlight -vv state {device}` to see connection attempts."
        )
    )]
    DeviceOffline { device: String, state: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {reason}")]
    #[diagnostic(
        code(soundlight::auth_failed),
        help(
            "Check the email and password for profile '{profile}'.\n\
             Run: soundlight config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String, reason: String },

    #[error("Not logged in")]
    #[diagnostic(code(soundlight::not_logged_in), help("Run: soundlight login"))]
    NotLoggedIn,

    #[error("A verification code is required")]
    #[diagnostic(
        code(soundlight::mfa_required),
        help("Run `soundlight login` from an interactive terminal to enter the code.")
    )]
    MfaRequired,

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(soundlight::no_credentials),
        help(
            "Store one with: soundlight config set-password\n\
             Or set SOUNDLIGHT_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(soundlight::not_found),
        help("Run: soundlight {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Command failed: {reason}")]
    #[diagnostic(code(soundlight::command_failed))]
    CommandFailed { reason: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(soundlight::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(soundlight::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: soundlight config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No account email configured")]
    #[diagnostic(
        code(soundlight::no_config),
        help(
            "Create a profile with: soundlight config init\n\
             Or pass --email / set SOUNDLIGHT_EMAIL.\n\
             Config file: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(soundlight::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for {what}")]
    #[diagnostic(code(soundlight::timeout), help("Raise --wait or check the device."))]
    Timeout { seconds: u64, what: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(soundlight::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Network { .. } | Self::DeviceOffline { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. }
            | Self::NotLoggedIn
            | Self::MfaRequired
            | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ─────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => {
                Self::ProfileNotFound { name, available }
            }
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<AuthError> for CliError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(reason) => Self::Network { reason },
            AuthError::NotAuthenticated | AuthError::RefreshInvalid => Self::NotLoggedIn,
            other => Self::AuthFailed {
                profile: "current".into(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Auth(e) => e.into(),

            CoreError::DeviceNotFound { device_id } => Self::NotFound {
                resource_type: "device".into(),
                identifier: device_id,
                list_command: "devices".into(),
            },

            CoreError::Transport(TransportError::NotConnected) => Self::DeviceOffline {
                device: "(unknown)".into(),
                state: "not connected".into(),
            },

            CoreError::Codec(e) => Self::Validation {
                field: "value".into(),
                reason: e.to_string(),
            },

            CoreError::Command(CommandError::Timeout) => Self::CommandFailed {
                reason: "the device did not acknowledge the command".into(),
            },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Api { message, .. } => Self::Network { reason: message },

            other => Self::CommandFailed {
                reason: other.to_string(),
            },
        }
    }
}
