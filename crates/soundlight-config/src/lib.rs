//! Shared configuration for the soundlight CLI.
//!
//! TOML profiles, password resolution (env + keyring + plaintext), the
//! keyring-backed refresh-token store, and translation to
//! `soundlight_core::EngineConfig`. Core never reads these types.

mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use soundlight_core::config::{DEFAULT_API_BASE, DEFAULT_WS_BASE};
use soundlight_core::{Credentials, EngineConfig, TlsVerification};

pub use store::{KEYRING_SERVICE, KeyringTokenStore};

/// Environment variable consulted for the account password.
pub const PASSWORD_ENV: &str = "SOUNDLIGHT_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String, available: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, listing the alternatives when it is missing.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.available_profiles(),
            })
    }

    /// Comma-separated sorted profile names, or `(none)`.
    pub fn available_profiles(&self) -> String {
        let mut names: Vec<_> = self.profiles.keys().map(String::as_str).collect();
        if names.is_empty() {
            return "(none)".into();
        }
        names.sort_unstable();
        names.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named account profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Account email.
    #[serde(default)]
    pub email: String,

    /// Password (plaintext; prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Account API base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Device WebSocket base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Path to an additional CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Override HTTP timeout (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Refresh this many seconds before the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_margin_secs: Option<u64>,

    /// Unacknowledged command lifetime in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,

    /// Commands buffered per device while disconnected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_queue_depth: Option<usize>,

    /// Sensor poll cadence in seconds. 0 disables polling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_poll_secs: Option<u64>,

    /// Upper bound on reconnect backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_max_delay_secs: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "soundlight", "soundlight").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("soundlight");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from a specific file. A missing file yields the defaults.
///
/// `SOUNDLIGHT_`-prefixed variables override file values; nested keys use
/// `__` (e.g. `SOUNDLIGHT_PROFILES__HOME__EMAIL`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SOUNDLIGHT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn password_entry(email: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{email}/password"))
}

/// Resolve the account password without prompting.
///
/// Order: the profile's `password_env`, then `SOUNDLIGHT_PASSWORD`, then
/// the system keyring, then plaintext in the profile.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Env vars
    let env_names = profile.password_env.iter().map(String::as_str).chain([PASSWORD_ENV]);
    for name in env_names {
        if let Ok(val) = std::env::var(name) {
            if !val.is_empty() {
                return Ok(SecretString::from(val));
            }
        }
    }

    // 2. System keyring
    if !profile.email.is_empty() {
        if let Ok(pw) = password_entry(&profile.email).and_then(|e| e.get_password()) {
            return Ok(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store the account password in the system keyring.
pub fn store_password(email: &str, password: &str) -> Result<(), ConfigError> {
    password_entry(email)?.set_password(password)?;
    Ok(())
}

/// Login material for a profile.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Credentials, ConfigError> {
    if profile.email.is_empty() {
        return Err(ConfigError::Validation {
            field: "email".into(),
            reason: format!("profile '{profile_name}' has no email"),
        });
    }
    let password = resolve_password(profile, profile_name)?;
    Ok(Credentials::new(profile.email.clone(), password))
}

// ── EngineConfig translation ────────────────────────────────────────

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{value}': {e}"),
    })
}

/// Build an `EngineConfig` from a profile and the global defaults.
pub fn profile_to_engine_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let api_base = parse_url("api_url", profile.api_url.as_deref().unwrap_or(DEFAULT_API_BASE))?;
    let ws_base = parse_url("ws_url", profile.ws_url.as_deref().unwrap_or(DEFAULT_WS_BASE))?;

    let mut config = EngineConfig::new(api_base, ws_base);

    config.tls = profile
        .ca_cert
        .clone()
        .map_or(TlsVerification::SystemDefaults, TlsVerification::CustomCa);
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    if let Some(secs) = profile.refresh_margin_secs {
        config.refresh_margin = Duration::from_secs(secs);
    }
    if let Some(ms) = profile.command_timeout_ms {
        if ms == 0 {
            return Err(ConfigError::Validation {
                field: "command_timeout_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }
        config.command_timeout = Duration::from_millis(ms);
    }
    if let Some(depth) = profile.command_queue_depth {
        if depth == 0 {
            return Err(ConfigError::Validation {
                field: "command_queue_depth".into(),
                reason: "must be at least 1".into(),
            });
        }
        config.command_queue_depth = depth;
    }
    if let Some(secs) = profile.state_poll_secs {
        config.state_poll_interval = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(secs) = profile.reconnect_max_delay_secs {
        config.connection.reconnect.max_delay = Duration::from_secs(secs.max(1));
    }

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn home_profile() -> Profile {
        Profile {
            email: "parent@example.com".into(),
            ..Profile::default()
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                command_timeout_ms: Some(2500),
                ..home_profile()
            },
        );
        cfg.default_profile = Some("home".into());
        save_config_to(&cfg, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("password"), "{text}");
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                default_profile = "home"

                [profiles.home]
                email = "parent@example.com"
                "#,
            )?;
            jail.set_env("SOUNDLIGHT_DEFAULT_PROFILE", "cabin");
            jail.set_env("SOUNDLIGHT_PROFILES__HOME__STATE_POLL_SECS", "0");

            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(cfg.default_profile.as_deref(), Some("cabin"));
            assert_eq!(cfg.profiles["home"].state_poll_secs, Some(0));
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_lists_alternatives() {
        let mut cfg = Config::default();
        cfg.profiles.insert("b".into(), home_profile());
        cfg.profiles.insert("a".into(), home_profile());
        let err = cfg.profile("c").unwrap_err();
        assert!(
            matches!(err, ConfigError::ProfileNotFound { ref available, .. } if available == "a, b")
        );
        assert_eq!(Config::default().available_profiles(), "(none)");
    }

    #[test]
    fn password_from_profile_env_var() {
        Jail::expect_with(|jail| {
            jail.set_env("HOME_SPEAKER_PW", "from-env");
            let profile = Profile {
                password_env: Some("HOME_SPEAKER_PW".into()),
                password: Some("plaintext".into()),
                ..Profile::default()
            };
            let pw = resolve_password(&profile, "home").unwrap();
            assert_eq!(pw.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn password_falls_back_to_plaintext() {
        Jail::expect_with(|_| {
            let profile = Profile {
                password: Some("plaintext".into()),
                ..Profile::default()
            };
            let creds_err = resolve_credentials(&profile, "home").unwrap_err();
            assert!(matches!(creds_err, ConfigError::Validation { .. }));

            let pw = resolve_password(&profile, "home").unwrap();
            assert_eq!(pw.expose_secret(), "plaintext");

            let missing = resolve_password(&Profile::default(), "home").unwrap_err();
            assert!(matches!(missing, ConfigError::NoCredentials { .. }));
            Ok(())
        });
    }

    #[test]
    fn engine_config_from_profile() {
        let profile = Profile {
            api_url: Some("http://127.0.0.1:8080".into()),
            ca_cert: Some(PathBuf::from("/etc/ca.pem")),
            command_timeout_ms: Some(1500),
            command_queue_depth: Some(4),
            state_poll_secs: Some(0),
            reconnect_max_delay_secs: Some(10),
            ..home_profile()
        };
        let config = profile_to_engine_config(&profile, &Defaults::default()).unwrap();

        assert_eq!(config.api_base.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(config.ws_base.as_str(), DEFAULT_WS_BASE);
        assert_eq!(config.tls, TlsVerification::CustomCa("/etc/ca.pem".into()));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.command_timeout, Duration::from_millis(1500));
        assert_eq!(config.command_queue_depth, 4);
        assert_eq!(config.state_poll_interval, None);
        assert_eq!(config.connection.reconnect.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn engine_config_rejects_bad_values() {
        let bad_url = Profile {
            ws_url: Some("not a url".into()),
            ..home_profile()
        };
        assert!(matches!(
            profile_to_engine_config(&bad_url, &Defaults::default()),
            Err(ConfigError::Validation { ref field, .. }) if field == "ws_url"
        ));

        let zero_depth = Profile {
            command_queue_depth: Some(0),
            ..home_profile()
        };
        assert!(profile_to_engine_config(&zero_depth, &Defaults::default()).is_err());
    }
}
