//! Shared helpers for command handlers: engine setup, login, device lookup.

use std::io::IsTerminal;
use std::time::Duration;

use tracing::debug;

use soundlight_core::{
    AuthError, ConnectionState, DeviceId, Engine, LoginResult, SessionInfo, SessionManager,
};

use crate::cli::GlobalOpts;
use crate::config::{self, Resolved};
use crate::error::CliError;

/// Build an engine for the active profile. Nothing is contacted yet.
pub fn open_engine(global: &GlobalOpts) -> Result<(Engine, Resolved), CliError> {
    let resolved = config::resolve(global)?;
    let engine = Engine::new(resolved.engine.clone(), config::token_store(global))?;
    Ok((engine, resolved))
}

/// Resume the stored session, falling back to a password login.
pub async fn authenticate(engine: &Engine, resolved: &Resolved) -> Result<SessionInfo, CliError> {
    match engine.session().resume(&resolved.email).await {
        Ok(info) => Ok(info),
        Err(AuthError::NotAuthenticated | AuthError::RefreshInvalid) => {
            debug!("no usable stored session, logging in");
            login(engine.session(), resolved).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Password login, prompting for the MFA code when the account asks.
pub async fn login(session: &SessionManager, resolved: &Resolved) -> Result<SessionInfo, CliError> {
    let credentials = config::credentials(resolved)?;
    let result = session
        .login(credentials)
        .await
        .map_err(|e| auth_err(e, resolved))?;
    match result {
        LoginResult::Authenticated(info) => Ok(info),
        LoginResult::MfaRequired { challenge_id } => {
            complete_mfa(session, &challenge_id, resolved).await
        }
    }
}

async fn complete_mfa(
    session: &SessionManager,
    challenge_id: &str,
    resolved: &Resolved,
) -> Result<SessionInfo, CliError> {
    if !std::io::stdin().is_terminal() {
        return Err(CliError::MfaRequired);
    }
    eprintln!("A verification code was sent to the account's phone.");
    loop {
        let code: String = dialoguer::Input::new()
            .with_prompt("Verification code")
            .interact_text()
            .map_err(prompt_err)?;
        match session.submit_mfa(challenge_id, &code).await {
            Ok(LoginResult::Authenticated(info)) => return Ok(info),
            Ok(LoginResult::MfaRequired { .. }) => return Err(CliError::MfaRequired),
            Err(AuthError::InvalidCode { attempts_remaining }) if attempts_remaining > 0 => {
                eprintln!("Invalid code, {attempts_remaining} attempt(s) left");
            }
            Err(e) => return Err(auth_err(e, resolved)),
        }
    }
}

fn auth_err(err: AuthError, resolved: &Resolved) -> CliError {
    match err {
        AuthError::InvalidCredentials | AuthError::InvalidCode { .. } => CliError::AuthFailed {
            profile: resolved.profile_name.clone(),
            reason: err.to_string(),
        },
        other => other.into(),
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Resolve a device identifier (speaker uid, speaker name, or profile name).
pub fn resolve_device(engine: &Engine, identifier: &str) -> Result<DeviceId, CliError> {
    let devices = engine.registry().devices();
    if let Some(device) = devices.iter().find(|d| d.id.as_str() == identifier) {
        return Ok(device.id.clone());
    }
    devices
        .iter()
        .find(|d| {
            d.info.speaker_name.eq_ignore_ascii_case(identifier)
                || d.info.baby_name.eq_ignore_ascii_case(identifier)
        })
        .map(|d| d.id.clone())
        .ok_or_else(|| CliError::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
            list_command: "devices".into(),
        })
}

/// Wait for the device socket to come up.
pub async fn wait_connected(
    engine: &Engine,
    id: &DeviceId,
    identifier: &str,
    secs: u64,
) -> Result<(), CliError> {
    let mut rx = engine
        .registry()
        .watch_connection(id)
        .ok_or_else(|| CliError::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
            list_command: "devices".into(),
        })?;

    let outcome = tokio::time::timeout(
        Duration::from_secs(secs),
        rx.wait_for(|s| s.is_connected() || *s == ConnectionState::Failed),
    )
    .await
    .map(|r| r.map(|state| *state));

    let state = match outcome {
        Ok(Ok(state)) => state,
        _ => *rx.borrow(),
    };
    if state.is_connected() {
        Ok(())
    } else {
        Err(CliError::DeviceOffline {
            device: identifier.into(),
            state: state.to_string(),
        })
    }
}

/// Wait for the first state report after connecting.
pub async fn wait_reported(engine: &Engine, id: &DeviceId, secs: u64) -> Result<(), CliError> {
    let Some(mut rx) = engine.registry().watch_state(id) else {
        return Ok(());
    };
    tokio::time::timeout(
        Duration::from_secs(secs),
        rx.wait_for(|s| s.power.is_some() || s.volume.is_some()),
    )
    .await
    .map_err(|_| CliError::Timeout {
        seconds: secs,
        what: "the device to report its state".into(),
    })?
    .map_err(|_| CliError::CommandFailed {
        reason: "device was removed".into(),
    })?;
    Ok(())
}

/// Authenticate, start the engine, and wait for `identifier` to connect.
pub async fn connect_device(
    global: &GlobalOpts,
    identifier: &str,
    wait_secs: u64,
) -> Result<(Engine, DeviceId), CliError> {
    let (engine, resolved) = open_engine(global)?;
    authenticate(&engine, &resolved).await?;
    engine.start().await?;
    let id = resolve_device(&engine, identifier)?;
    wait_connected(&engine, &id, identifier, wait_secs).await?;
    Ok((engine, id))
}
