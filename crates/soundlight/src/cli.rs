//! Clap derive structures for the `soundlight` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// soundlight -- control Sound + Light units from the command line
#[derive(Debug, Parser)]
#[command(
    name = "soundlight",
    version,
    about = "Control Sound + Light units from the command line",
    long_about = "Log in to the account service, list the account's Sound + Light units,\n\
        inspect their state, change power, light, color, volume and sound,\n\
        and watch live state changes.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "SOUNDLIGHT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Account email (overrides profile)
    #[arg(long, short = 'e', env = "SOUNDLIGHT_EMAIL", global = true)]
    pub email: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SOUNDLIGHT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// HTTP timeout in seconds (overrides profile)
    #[arg(long, env = "SOUNDLIGHT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Keep tokens in memory only; never touch the system keyring
    #[arg(long, env = "SOUNDLIGHT_NO_KEYRING", global = true)]
    pub no_keyring: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in with email and password (prompts for MFA when required)
    Login,

    /// Forget the stored session
    Logout,

    /// Show whether a stored session is usable
    Status,

    /// List the account's Sound + Light units
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Show a device's current state
    State(StateArgs),

    /// Change a device setting
    Set(SetArgs),

    /// Stream live state changes
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List the sound names accepted by `set sound`
    Sounds,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: Option<DevicesCommand>,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices (default)
    #[command(alias = "ls")]
    List,
}

/// Connection wait shared by commands that talk to a device.
#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Seconds to wait for the device to connect and report
    #[arg(long, default_value = "10")]
    pub wait: u64,
}

#[derive(Debug, Args)]
pub struct StateArgs {
    /// Device id or name
    pub device: String,

    #[command(flatten)]
    pub wait: WaitArgs,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SET
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device id or name
    pub device: String,

    #[command(flatten)]
    pub wait: WaitArgs,

    /// Return once the command is sent instead of waiting for the device
    #[arg(long, global = true)]
    pub no_confirm: bool,

    #[command(subcommand)]
    pub command: SetCommand,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Debug, Subcommand)]
pub enum SetCommand {
    /// Turn the unit on or off
    Power { state: Switch },

    /// Turn the light on or off while the unit stays powered
    Light { state: Switch },

    /// Light brightness: 0-1 or a percentage (e.g. 40%)
    Brightness {
        #[arg(value_parser = parse_level)]
        level: f32,
    },

    /// Volume: 0-1 or a percentage (e.g. 65%)
    Volume {
        #[arg(value_parser = parse_level)]
        level: f32,
    },

    /// Light color
    Color {
        /// Hue in degrees (0-360)
        #[arg(long)]
        hue: f32,

        /// Saturation: 0-1 or a percentage
        #[arg(long, value_parser = parse_level)]
        saturation: f32,

        /// Brightness: 0-1 or a percentage
        #[arg(long, value_parser = parse_level)]
        brightness: f32,
    },

    /// Sound to play ("none" for silence)
    Sound { name: String },
}

/// Parse `0.65` or `65%` into a unit fraction. Range checks happen in the
/// codec so every caller gets the same error.
pub fn parse_level(raw: &str) -> Result<f32, String> {
    let trimmed = raw.trim();
    let (number, scale) = match trimmed.strip_suffix('%') {
        Some(pct) => (pct.trim(), 100.0),
        None => (trimmed, 1.0),
    };
    number
        .parse::<f32>()
        .map(|v| v / scale)
        .map_err(|_| format!("expected a number like 0.65 or 65%, got '{raw}'"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only this device (id or name); all devices when omitted
    pub device: Option<String>,

    /// Include connectivity changes
    #[arg(long)]
    pub connectivity: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Set a value on the active profile
    Set {
        /// Profile key (e.g., "email", "command_timeout_ms")
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the account password in the system keyring
    SetPassword {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
