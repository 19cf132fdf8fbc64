//! `set`: issue a control intent and wait for the device to take it.

use std::time::Duration;

use strum::IntoEnumIterator;
use tokio::time::Instant;
use tracing::debug;

use soundlight_core::{ControlIntent, DeviceEventKind, DeviceId, Engine, Hsb, PendingCommand, Sound};

use crate::cli::{GlobalOpts, SetArgs, SetCommand};
use crate::error::CliError;

use super::util;

const SETTLE_POLL: Duration = Duration::from_millis(100);
const EVENT_DRAIN: Duration = Duration::from_millis(50);

/// Translate the subcommand into an intent. Ranges are checked by the codec.
pub fn intent(command: &SetCommand) -> Result<ControlIntent, CliError> {
    Ok(match *command {
        SetCommand::Power { state } => ControlIntent::SetPower(state.is_on()),
        SetCommand::Light { state } => ControlIntent::SetLight(state.is_on()),
        SetCommand::Brightness { level } => ControlIntent::SetBrightness(level),
        SetCommand::Volume { level } => ControlIntent::SetVolume(level),
        SetCommand::Color {
            hue,
            saturation,
            brightness,
        } => ControlIntent::SetColor(Hsb {
            hue,
            saturation,
            brightness,
        }),
        SetCommand::Sound { ref name } => ControlIntent::SetSound(parse_sound(name)?),
    })
}

/// Sound names are matched case-insensitively; `-` and `_` stand for spaces.
pub fn parse_sound(name: &str) -> Result<Sound, CliError> {
    let normalized = name.trim().replace(['-', '_'], " ");
    normalized.parse().map_err(|_| CliError::Validation {
        field: "sound".into(),
        reason: format!(
            "unknown sound '{name}'. Known sounds: {}",
            Sound::iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}

pub async fn handle(args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let intent = intent(&args.command)?;
    intent.validate().map_err(|e| CliError::Validation {
        field: intent.name().trim_start_matches("set_").into(),
        reason: e.to_string(),
    })?;

    let (engine, id) = util::connect_device(global, &args.device, args.wait.wait).await?;
    let result = issue(&engine, &id, intent, args.no_confirm).await;
    engine.shutdown().await;
    let command = result?;

    if !global.quiet {
        let summary = command
            .desired
            .iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        if args.no_confirm {
            eprintln!("Sent to {}: {summary}", args.device);
        } else {
            eprintln!("{}: {summary}", args.device);
        }
    }
    Ok(())
}

async fn issue(
    engine: &Engine,
    id: &DeviceId,
    intent: ControlIntent,
    no_confirm: bool,
) -> Result<PendingCommand, CliError> {
    let registry = engine.registry();
    let mut events = registry.subscribe(id)?;
    let command = registry.issue_command(id, intent).await?;
    if no_confirm {
        return Ok(command);
    }

    // One resend plus slack before the reconciler gives up on its own.
    let limit = registry.config().command_timeout * 2 + Duration::from_secs(1);
    let deadline = Instant::now() + limit;
    loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(CliError::CommandFailed { reason: "device was removed".into() });
                };
                check_failure(&event.kind, &command)?;
            }
            () = tokio::time::sleep(SETTLE_POLL) => {
                let pending = registry.pending_commands(id).await?;
                if pending.iter().all(|p| p.correlation_id != command.correlation_id) {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(CliError::Timeout {
                        seconds: limit.as_secs(),
                        what: "the device to acknowledge".into(),
                    });
                }
            }
        }
    }

    // A failure is published before the command leaves the pending set.
    while let Ok(Some(event)) = tokio::time::timeout(EVENT_DRAIN, events.recv()).await {
        check_failure(&event.kind, &command)?;
    }
    debug!(correlation_id = command.correlation_id, "command acknowledged");
    Ok(command)
}

fn check_failure(kind: &DeviceEventKind, command: &PendingCommand) -> Result<(), CliError> {
    match kind {
        DeviceEventKind::CommandFailed {
            correlation_id,
            error,
            ..
        } if *correlation_id == command.correlation_id => Err(CliError::CommandFailed {
            reason: error.to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::Switch;

    #[test]
    fn sounds_parse_loosely() {
        assert_eq!(parse_sound("white-noise").unwrap(), Sound::WhiteNoise);
        assert_eq!(parse_sound("Brahms_Lullaby").unwrap(), Sound::BrahmsLullaby);
        assert_eq!(parse_sound("none").unwrap(), Sound::None);
        let err = parse_sound("thunder").unwrap_err();
        assert!(err.to_string().contains("sound"));
    }

    #[test]
    fn subcommands_map_to_intents() {
        assert_eq!(
            intent(&SetCommand::Power { state: Switch::Off }).unwrap(),
            ControlIntent::SetPower(false)
        );
        assert_eq!(
            intent(&SetCommand::Volume { level: 0.65 }).unwrap(),
            ControlIntent::SetVolume(0.65)
        );
        assert_eq!(
            intent(&SetCommand::Sound {
                name: "rain".into()
            })
            .unwrap(),
            ControlIntent::SetSound(Sound::Rain)
        );
    }
}
