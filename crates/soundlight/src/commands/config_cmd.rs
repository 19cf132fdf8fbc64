//! Config subcommand handlers.

use std::fmt::Write as _;
use std::path::PathBuf;

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

use super::util::prompt_err;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking the password.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "email = \"{}\"", p.email);
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        let strings = [
            ("password_env", p.password_env.as_deref()),
            ("api_url", p.api_url.as_deref()),
            ("ws_url", p.ws_url.as_deref()),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = \"{value}\"");
            }
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        let numbers = [
            ("timeout", p.timeout),
            ("refresh_margin_secs", p.refresh_margin_secs),
            ("command_timeout_ms", p.command_timeout_ms),
            ("state_poll_secs", p.state_poll_secs),
            ("reconnect_max_delay_secs", p.reconnect_max_delay_secs),
        ];
        for (key, value) in numbers {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = {value}");
            }
        }
        if let Some(depth) = p.command_queue_depth {
            let _ = writeln!(out, "command_queue_depth = {depth}");
        }
    }

    out.trim_end().to_owned()
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: "must be a non-negative whole number".into(),
    })
}

/// Apply `key = value` to a profile.
pub fn set_profile_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key.replace('-', "_").as_str() {
        "email" => profile.email = value,
        "password_env" => profile.password_env = Some(value),
        "api_url" => profile.api_url = Some(value),
        "ws_url" => profile.ws_url = Some(value),
        "ca_cert" => profile.ca_cert = Some(PathBuf::from(value)),
        "timeout" => profile.timeout = Some(parse_number("timeout", &value)?),
        "refresh_margin_secs" => {
            profile.refresh_margin_secs = Some(parse_number("refresh_margin_secs", &value)?);
        }
        "command_timeout_ms" => {
            profile.command_timeout_ms = Some(parse_number("command_timeout_ms", &value)?);
        }
        "command_queue_depth" => {
            profile.command_queue_depth = Some(parse_number("command_queue_depth", &value)?);
        }
        "state_poll_secs" => {
            profile.state_poll_secs = Some(parse_number("state_poll_secs", &value)?);
        }
        "reconnect_max_delay_secs" => {
            profile.reconnect_max_delay_secs =
                Some(parse_number("reconnect_max_delay_secs", &value)?);
        }
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: email, password_env, api_url, \
                     ws_url, ca_cert, timeout, refresh_margin_secs, command_timeout_ms, \
                     command_queue_depth, state_poll_secs, reconnect_max_delay_secs"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("soundlight -- configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            let email: String = Input::new()
                .with_prompt("Account email")
                .interact_text()
                .map_err(prompt_err)?;
            if email.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "email".into(),
                    reason: "email cannot be empty".into(),
                });
            }

            let choices = &[
                "Store in system keyring (recommended)",
                "Save to config file (plaintext)",
                "Ask every time",
            ];
            let selection = Select::new()
                .with_prompt("Where should the password live?")
                .items(choices)
                .default(0)
                .interact()
                .map_err(prompt_err)?;

            let password = match selection {
                0 | 1 => {
                    let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
                    if pass.is_empty() {
                        return Err(CliError::Validation {
                            field: "password".into(),
                            reason: "password cannot be empty".into(),
                        });
                    }
                    if selection == 0 {
                        config::store_password(&email, &pass)?;
                        eprintln!("   ✓ Password stored in system keyring");
                        None
                    } else {
                        Some(pass)
                    }
                }
                _ => None,
            };

            let mut cfg = config::load_config_or_default();
            cfg.profiles.insert(
                profile_name.clone(),
                Profile {
                    email: email.trim().to_owned(),
                    password,
                    ..Profile::default()
                },
            );
            cfg.default_profile = Some(profile_name.clone());
            config::save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Next: soundlight login");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut cfg = config::load_config_or_default();
            for profile in cfg.profiles.values_mut() {
                if profile.password.is_some() {
                    profile.password = Some("****".into());
                }
            }
            let out = output::render_single(&global.output, &cfg, format_config_redacted, |_| {
                "config".into()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = cfg.profiles.entry(profile_name.clone()).or_default();
            set_profile_key(profile, &key, value)?;

            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: soundlight config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            cfg.profile(&name)?;
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            let prof = cfg.profile(&profile_name)?;
            if prof.email.is_empty() {
                return Err(CliError::Validation {
                    field: "email".into(),
                    reason: format!("profile '{profile_name}' has no email"),
                });
            }

            let secret = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "value cannot be empty".into(),
                });
            }
            config::store_password(&prof.email, &secret)?;

            eprintln!("✓ Password stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}
