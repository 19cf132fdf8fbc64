//! `watch`: stream device events until interrupted.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use serde::Serialize;

use soundlight_core::{DeviceEvent, DeviceEventKind, DeviceId, Engine, StateChanges};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// One event as emitted by `--output json`.
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    time: DateTime<Local>,
    device_id: &'a DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<&'a StateChanges>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_failed: Option<FailureRecord<'a>>,
}

#[derive(Debug, Serialize)]
struct FailureRecord<'a> {
    correlation_id: u32,
    error: String,
    reverted: &'a StateChanges,
}

impl<'a> EventRecord<'a> {
    fn new(event: &'a DeviceEvent) -> Self {
        let mut record = Self {
            time: Local::now(),
            device_id: &event.device_id,
            changes: None,
            connection: None,
            command_failed: None,
        };
        match &event.kind {
            DeviceEventKind::StateChanged(changes) => record.changes = Some(changes),
            DeviceEventKind::Connectivity(state) => record.connection = Some(state.to_string()),
            DeviceEventKind::CommandFailed {
                correlation_id,
                error,
                reverted,
            } => {
                record.command_failed = Some(FailureRecord {
                    correlation_id: *correlation_id,
                    error: error.to_string(),
                    reverted,
                });
            }
        }
        record
    }
}

fn changes_line(changes: &StateChanges) -> String {
    changes
        .iter()
        .map(|(field, value)| match value {
            Some(v) => format!("{field}={v}"),
            None => format!("{field}=?"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable single line for table/plain output.
fn event_line(event: &DeviceEvent, name: &str, color: bool) -> String {
    let time = Local::now().format("%H:%M:%S");
    let body = match &event.kind {
        DeviceEventKind::StateChanged(changes) => changes_line(changes),
        DeviceEventKind::Connectivity(state) => output::paint_connection(*state, color),
        DeviceEventKind::CommandFailed {
            correlation_id,
            error,
            reverted,
        } => {
            let text = format!("command {correlation_id} failed: {error}");
            let text = if color { text.red().to_string() } else { text };
            if reverted.is_empty() {
                text
            } else {
                format!("{text} (reverted {})", changes_line(reverted))
            }
        }
    };
    format!("{time} {name} {body}")
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (engine, resolved) = util::open_engine(global)?;
    util::authenticate(&engine, &resolved).await?;
    engine.start().await?;

    let result = stream(&engine, &args, global).await;
    engine.shutdown().await;
    result
}

async fn stream(engine: &Engine, args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let registry = engine.registry();
    let mut events = match args.device {
        Some(ref identifier) => registry.subscribe(&util::resolve_device(engine, identifier)?)?,
        None => registry.subscribe_all(),
    };
    let names: HashMap<DeviceId, String> = registry
        .devices()
        .into_iter()
        .map(|d| (d.id, d.info.speaker_name))
        .collect();
    let color = output::should_color(&global.color);

    if !global.quiet {
        eprintln!("Watching {} device(s). Ctrl-C to stop.", names.len());
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if matches!(event.kind, DeviceEventKind::Connectivity(_)) && !args.connectivity {
            continue;
        }

        let line = match global.output {
            OutputFormat::Json | OutputFormat::JsonCompact => {
                serde_json::to_string(&EventRecord::new(&event))?
            }
            OutputFormat::Table | OutputFormat::Plain => {
                let name = names
                    .get(&event.device_id)
                    .map_or_else(|| event.device_id.as_str(), String::as_str);
                event_line(&event, name, color)
            }
        };
        output::print_output(&line, global.quiet);
    }
    Ok(())
}
