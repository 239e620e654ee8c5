//! escctl - ESC bootloader configuration CLI
//!
//! Inspect protocol dialects, decode and encode configuration images, frame
//! individual packets and dry-run whole transfers against a simulated
//! bootloader.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use esc_config_protocol::{ProtocolConfig, builtin_dialect};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{DialectCommands, ImageFormat, PacketCommands};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "escctl")]
#[command(about = "ESC bootloader configuration tool - images, packets and dry-run transfers")]
#[command(version)]
#[command(long_about = "
escctl works with the configuration region of ESC bootloaders. It decodes and
encodes settings images, frames protocol packets for a given dialect and runs
complete read/write transfers against a simulated device.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Built-in protocol dialect
    #[arg(
        short,
        long,
        global = true,
        env = "ESCCTL_DIALECT",
        default_value = "bootloader"
    )]
    dialect: String,

    /// Load the dialect from a YAML or JSON file instead of the built-ins
    #[arg(long, global = true)]
    dialect_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect protocol dialects
    #[command(subcommand)]
    Dialect(DialectCommands),

    /// Decode a configuration image into settings
    Decode {
        /// Image file
        image: PathBuf,
        /// Image file format
        #[arg(long, value_enum, default_value_t = ImageFormat::Raw)]
        format: ImageFormat,
    },

    /// Encode settings into a configuration image
    Encode {
        /// Settings file (YAML or JSON)
        settings: PathBuf,
        /// Image to merge into; safe defaults when omitted
        #[arg(long)]
        base: Option<PathBuf>,
        /// Output file; printed as hex when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Format of the base and output images
        #[arg(long, value_enum, default_value_t = ImageFormat::Raw)]
        format: ImageFormat,
    },

    /// Show the safe default image and the settings it decodes to
    Defaults {
        /// Output file; printed as hex when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output image format
        #[arg(long, value_enum, default_value_t = ImageFormat::Raw)]
        format: ImageFormat,
    },

    /// Frame a single request packet
    #[command(subcommand)]
    Packet(PacketCommands),

    /// Compute the dialect checksum over hex bytes
    Checksum {
        /// Bytes as hex, e.g. "FF 20 00"
        data: String,
    },

    /// Run read-all (and optionally write-all) against a simulated device
    Simulate {
        /// Initial device region; safe defaults when omitted
        #[arg(long)]
        image: Option<PathBuf>,
        /// Image file format
        #[arg(long, value_enum, default_value_t = ImageFormat::Raw)]
        format: ImageFormat,
        /// Settings file to write after the initial read
        #[arg(long)]
        write: Option<PathBuf>,
        /// Read back and compare after writing
        #[arg(long)]
        verify: bool,
        /// Fault to inject, as INDEX:KIND (silent, nack=C1, corrupt, truncate=N, garbage=55)
        #[arg(long = "fault", value_name = "INDEX:KIND")]
        faults: Vec<String>,
        /// Deliver replies in fragments of this many bytes
        #[arg(long)]
        fragment: Option<usize>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    /// Resolve the dialect from `--dialect-file` or `--dialect`.
    fn protocol_config(&self) -> Result<ProtocolConfig> {
        if let Some(path) = &self.dialect_file {
            return commands::load_dialect_file(path);
        }
        builtin_dialect(&self.dialect)
            .map_err(|_| CliError::DialectNotFound(self.dialect.clone()).into())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "escctl={log_level},esc_config_engine={log_level},\
                     esc_config_protocol={log_level}"
                )
                .into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Dialect(cmd) => commands::dialect::execute(cmd, cli, cli.json),
        Commands::Decode { image, format } => {
            let config = cli.protocol_config()?;
            commands::image::decode(&config, image, *format, cli.json)
        }
        Commands::Encode {
            settings,
            base,
            output,
            format,
        } => {
            let config = cli.protocol_config()?;
            commands::image::encode(
                &config,
                settings,
                base.as_deref(),
                output.as_deref(),
                *format,
                cli.json,
            )
        }
        Commands::Defaults { output, format } => {
            let config = cli.protocol_config()?;
            commands::image::defaults(&config, output.as_deref(), *format, cli.json)
        }
        Commands::Packet(cmd) => {
            let config = cli.protocol_config()?;
            commands::packet::execute(cmd, &config, cli.json)
        }
        Commands::Checksum { data } => {
            let config = cli.protocol_config()?;
            commands::packet::checksum(&config, data, cli.json)
        }
        Commands::Simulate {
            image,
            format,
            write,
            verify,
            faults,
            fragment,
        } => {
            let mut config = cli.protocol_config()?;
            config.verify_writes |= *verify;
            let options = commands::simulate::SimulateOptions {
                image: image.as_deref(),
                format: *format,
                write: write.as_deref(),
                faults,
                fragment: *fragment,
            };
            commands::simulate::execute(config, options, cli.json).await
        }
        Commands::Completion { shell } => {
            completion::generate_completion(*shell);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["escctl", "dialect", "list"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.dialect, "bootloader");
        assert!(cli.dialect_file.is_none());
        assert!(matches!(
            cli.command,
            Commands::Dialect(DialectCommands::List)
        ));
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from([
            "escctl", "checksum", "30 00", "--json", "-vv", "--dialect", "xmodem",
        ])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.dialect, "xmodem");
        Ok(())
    }

    #[test]
    fn parse_simulate_faults() -> TestResult {
        let cli = Cli::try_parse_from([
            "escctl", "simulate", "--fault", "5:silent", "--fault", "2:nack=C1", "--verify",
        ])?;
        match cli.command {
            Commands::Simulate { faults, verify, .. } => {
                assert_eq!(faults, ["5:silent", "2:nack=C1"]);
                assert!(verify);
            }
            _ => return Err("expected simulate".into()),
        }
        Ok(())
    }

    #[test]
    fn parse_packet_address_hex() -> TestResult {
        let cli = Cli::try_parse_from(["escctl", "packet", "set-address", "0x2040"])?;
        assert!(matches!(
            cli.command,
            Commands::Packet(PacketCommands::SetAddress { address: 0x2040 })
        ));
        Ok(())
    }

    #[test]
    fn unknown_dialect_is_reported() -> TestResult {
        let cli = Cli::try_parse_from(["escctl", "--dialect", "nope", "defaults"])?;
        let err = cli.protocol_config().err().ok_or("expected error")?;
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::DialectNotFound(name)) if name == "nope"
        ));
        Ok(())
    }

    #[test]
    fn verify_cli_structure() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
