//! CLI configuration: thin wrapper around `soundlight_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides (--profile,
//! --email, --timeout, --no-keyring).

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use soundlight_core::{Credentials, EngineConfig, MemoryTokenStore, TokenStore};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use soundlight_config::{
    Config, Profile, config_path, load_config_or_default, save_config, store_password,
};

/// Everything a command needs to reach the account.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub profile: Profile,
    pub email: String,
    pub engine: EngineConfig,
}

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve profile, email, and engine config.
///
/// A missing profile is fine when `--email` is given: every other setting
/// then takes its default.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.email.is_some() || global.profile.is_none() => Profile::default(),
        None => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: cfg.available_profiles(),
            });
        }
    };

    let email = global
        .email
        .clone()
        .unwrap_or_else(|| profile.email.clone());
    if email.is_empty() {
        return Err(CliError::NoConfig {
            path: config_path().display().to_string(),
        });
    }

    let mut engine = soundlight_config::profile_to_engine_config(&profile, &cfg.defaults)?;
    if let Some(secs) = global.timeout {
        engine.timeout = Duration::from_secs(secs);
    }

    Ok(Resolved {
        profile_name,
        profile,
        email,
        engine,
    })
}

/// Token store selected by `--no-keyring`.
pub fn token_store(global: &GlobalOpts) -> Arc<dyn TokenStore> {
    if global.no_keyring {
        Arc::new(MemoryTokenStore::new())
    } else {
        Arc::new(soundlight_config::KeyringTokenStore)
    }
}

/// Login material: the configured password, or a prompt on a terminal.
pub fn credentials(resolved: &Resolved) -> Result<Credentials, CliError> {
    let profile = Profile {
        email: resolved.email.clone(),
        ..resolved.profile.clone()
    };
    match soundlight_config::resolve_password(&profile, &resolved.profile_name) {
        Ok(password) => Ok(Credentials::new(resolved.email.clone(), password)),
        Err(soundlight_config::ConfigError::NoCredentials { profile })
            if !std::io::stdin().is_terminal() =>
        {
            Err(CliError::NoCredentials { profile })
        }
        Err(soundlight_config::ConfigError::NoCredentials { .. }) => {
            let password =
                rpassword::prompt_password(format!("Password for {}: ", resolved.email))?;
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "password cannot be empty".into(),
                });
            }
            Ok(Credentials::new(
                resolved.email.clone(),
                SecretString::from(password),
            ))
        }
        Err(other) => Err(other.into()),
    }
}
