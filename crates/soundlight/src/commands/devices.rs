//! Device listing and state inspection.

use std::fmt::Write as _;

use strum::IntoEnumIterator;
use tabled::Tabled;

use soundlight_core::{DeviceInfo, DeviceSnapshot, Sound};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts, OutputFormat, StateArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Profile")]
    profile: String,
}

fn device_row(d: &DeviceInfo) -> DeviceRow {
    DeviceRow {
        id: d.speaker_uid.clone(),
        name: d.speaker_name.clone(),
        profile: d.baby_name.clone(),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle(args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command.unwrap_or(DevicesCommand::List) {
        DevicesCommand::List => {
            let (engine, resolved) = util::open_engine(global)?;
            util::authenticate(&engine, &resolved).await?;
            let devices = engine.session().list_devices().await?;

            let out = output::render_list(&global.output, &devices, device_row, |d| {
                d.speaker_uid.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

pub async fn state(args: StateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (engine, id) = util::connect_device(global, &args.device, args.wait.wait).await?;
    let reported = util::wait_reported(&engine, &id, args.wait.wait).await;
    let snapshot = engine.registry().device(&id);
    engine.shutdown().await;
    reported?;

    let snapshot = snapshot.ok_or_else(|| CliError::NotFound {
        resource_type: "device".into(),
        identifier: args.device.clone(),
        list_command: "devices".into(),
    })?;
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &snapshot,
        |s| detail(s, color),
        |s| s.id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub fn sounds(global: &GlobalOpts) -> Result<(), CliError> {
    let names: Vec<String> = Sound::iter().map(|s| s.to_string()).collect();
    let out = match global.output {
        OutputFormat::Json => serde_json::to_string_pretty(&names)?,
        OutputFormat::JsonCompact => serde_json::to_string(&names)?,
        OutputFormat::Table | OutputFormat::Plain => names.join("\n"),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Detail view ─────────────────────────────────────────────────────

fn on_off(value: Option<bool>) -> String {
    match value {
        Some(true) => "on".into(),
        Some(false) => "off".into(),
        None => "-".into(),
    }
}

fn level(value: Option<f32>) -> String {
    value.map_or_else(|| "-".into(), output::percent)
}

fn detail(s: &DeviceSnapshot, color: bool) -> String {
    let st = &s.state;
    let mut out = String::new();
    let _ = writeln!(out, "Speaker:      {} ({})", s.info.speaker_name, s.id);
    let _ = writeln!(out, "Profile:      {}", s.info.baby_name);
    let _ = writeln!(
        out,
        "Connection:   {}",
        output::paint_connection(s.connection, color)
    );
    let _ = writeln!(out, "Power:        {}", on_off(st.power));
    let _ = writeln!(out, "Light:        {}", on_off(st.light_enabled));
    let _ = writeln!(out, "Brightness:   {}", level(st.brightness));
    match (st.hue, st.saturation) {
        (Some(hue), Some(sat)) => {
            let _ = writeln!(
                out,
                "Color:        hue {hue:.0}, saturation {}",
                output::percent(sat)
            );
        }
        _ => {
            let _ = writeln!(out, "Color:        -");
        }
    }
    let _ = writeln!(out, "Volume:       {}", level(st.volume));
    let _ = writeln!(
        out,
        "Sound:        {}",
        st.sound.map_or_else(|| "-".into(), |s| s.to_string())
    );
    if let Some(t) = st.temperature {
        let _ = writeln!(out, "Temperature:  {t:.1} °C");
    }
    if let Some(h) = st.humidity {
        let _ = writeln!(out, "Humidity:     {h:.0}%");
    }
    if let Some(ref tracks) = st.sound_list {
        let _ = write!(out, "Sounds:       {}", tracks.join(", "));
    }
    out.trim_end().to_owned()
}
