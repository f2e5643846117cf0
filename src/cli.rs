use std::path::PathBuf;

use clap::{builder::BoolishValueParser, Parser, Subcommand};
use tracing::Level;

use crate::{
    config::Config,
    error::Error,
    reading::{Reading, EXAMPLE_LINE},
    status::StatusReport,
};

/// The command line interface for the hydroponics relay.
///
/// Settings are taken from the configuration file (if given),
/// then overridden by flags or their environment variables.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// The serial device to read from
    #[arg(long, env = "SERIAL_PORT")]
    pub serial_port: Option<String>,

    /// The baud rate of the serial device
    #[arg(long, env = "BAUD_RATE")]
    pub baud_rate: Option<u32>,

    /// The port to serve websockets and HTTP on
    #[arg(long, env = "WS_PORT")]
    pub port: Option<u16>,

    /// Relay synthetic readings without touching the device
    #[arg(long, env = "MOCK_DATA", value_parser = BoolishValueParser::new())]
    pub synthetic: Option<bool>,

    /// Log level on stdout
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: Level,

    /// Also log to a daily rotating file in this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Override the configuration with whatever was given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.serial_port {
            config.device.path = path.clone();
        }
        if let Some(baud) = self.baud_rate {
            config.device.baud = baud;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(synthetic) = self.synthetic {
            config.synthetic = synthetic;
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON reading as sent to subscribers.
    Reading,

    /// Show an example JSON response to a status query.
    Status,

    /// Show an example line as the device sends it.
    WireLine,
}

/// Print what the command asks for.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Examples(example) => {
            let shown = match example {
                Examples::Config => Config::example().serialize_pretty()?,
                Examples::Reading => to_json(&Reading::example())?,
                Examples::Status => to_json(&StatusReport::example())?,
                Examples::WireLine => EXAMPLE_LINE.to_string(),
            };

            println!("{shown}");
        }
    }

    Ok(())
}

fn to_json(value: &impl serde::Serialize) -> Result<String, Error> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Io(e.into()))
}
