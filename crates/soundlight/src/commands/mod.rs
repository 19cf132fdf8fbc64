//! Command dispatch: bridges CLI args -> engine operations -> output formatting.

pub mod auth;
pub mod config_cmd;
pub mod control;
pub mod devices;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an account-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Login => auth::login(global).await,
        Command::Logout => auth::logout(global),
        Command::Status => auth::status(global).await,
        Command::Devices(args) => devices::handle(args, global).await,
        Command::State(args) => devices::state(args, global).await,
        Command::Set(args) => control::handle(args, global).await,
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Sounds => devices::sounds(global),
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
