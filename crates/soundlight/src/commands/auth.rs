//! Login, logout, and session status.

use chrono::Local;
use owo_colors::OwoColorize;

use soundlight_core::SessionInfo;

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util;

fn describe(info: &SessionInfo) -> String {
    format!(
        "Logged in as {}\nAccess token valid until {}",
        info.email,
        info.expires_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    )
}

pub async fn login(global: &GlobalOpts) -> Result<(), CliError> {
    let (engine, resolved) = util::open_engine(global)?;
    let info = util::login(engine.session(), &resolved).await?;

    let out = output::render_single(&global.output, &info, describe, |i| i.email.clone())?;
    output::print_output(&out, global.quiet);
    if !global.quiet && global.no_keyring {
        eprintln!("Session kept in memory only (--no-keyring); it ends with this process.");
    }
    Ok(())
}

pub fn logout(global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    config::token_store(global).delete(&resolved.email)?;
    if !global.quiet {
        let mark = if output::should_color(&global.color) {
            "✓".green().to_string()
        } else {
            "✓".into()
        };
        eprintln!("{mark} Logged out {}", resolved.email);
    }
    Ok(())
}

pub async fn status(global: &GlobalOpts) -> Result<(), CliError> {
    let (engine, resolved) = util::open_engine(global)?;
    let info = engine.session().resume(&resolved.email).await?;
    let out = output::render_single(&global.output, &info, describe, |i| i.email.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
