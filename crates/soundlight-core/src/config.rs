// ── Runtime engine configuration ──
//
// These types describe *how* to reach the account service and the devices.
// They carry credential data and tuning, but never touch disk. The CLI
// constructs an `EngineConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use soundlight_api::websocket::ConnectionConfig;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.nanit.com";
pub const DEFAULT_WS_BASE: &str = "wss://remote.nanit.com/speakers";

/// Account login material. Held only for the duration of a login attempt
/// (and its MFA challenge).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
        }
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled webpki roots (strict).
    #[default]
    SystemDefaults,
    /// Also trust a custom CA certificate file.
    CustomCa(std::path::PathBuf),
}

/// Everything the engine needs to run.
///
/// Built by the CLI, passed to `Engine` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Account API base URL.
    pub api_base: Url,
    /// Device WebSocket base URL; the device id and `user_connect/` are appended.
    pub ws_base: Url,
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,

    // ── Session ──
    /// Refresh this long before the access token expires.
    pub refresh_margin: Duration,
    /// Assumed lifetime of tokens without a readable `exp` claim.
    pub default_token_lifetime: Duration,
    /// Wrong MFA codes allowed before the challenge is discarded.
    pub mfa_max_attempts: u32,

    // ── Devices ──
    pub connection: ConnectionConfig,
    /// Bounded channel between a connection and its reconciler.
    pub inbound_capacity: usize,
    /// Unacknowledged command lifetime before one resend, then failure.
    pub command_timeout: Duration,
    /// Commands buffered while disconnected.
    pub command_queue_depth: usize,
    /// State poll cadence while connected (sensors are only reported on
    /// request). `None` disables polling.
    pub state_poll_interval: Option<Duration>,
    /// Device list re-sync cadence in seconds. 0 = never.
    pub device_poll_interval_secs: u64,
    /// Broadcast capacity for device events.
    pub event_capacity: usize,
}

impl EngineConfig {
    /// Defaults for everything except the endpoints.
    pub fn new(api_base: Url, ws_base: Url) -> Self {
        Self {
            api_base,
            ws_base,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            refresh_margin: Duration::from_secs(300),
            default_token_lifetime: Duration::from_secs(3600),
            mfa_max_attempts: 3,
            connection: ConnectionConfig::default(),
            inbound_capacity: 64,
            command_timeout: Duration::from_secs(5),
            command_queue_depth: 16,
            state_poll_interval: Some(Duration::from_secs(30)),
            device_poll_interval_secs: 0,
            event_capacity: 256,
        }
    }

    /// Defaults pointed at the production service.
    pub fn production() -> Result<Self, url::ParseError> {
        Ok(Self::new(
            Url::parse(DEFAULT_API_BASE)?,
            Url::parse(DEFAULT_WS_BASE)?,
        ))
    }
}
