//! Command implementations for escctl

pub mod dialect;
pub mod image;
pub mod packet;
pub mod simulate;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use esc_config_protocol::{MemoryImage, ProtocolConfig, SettingsRecord};

use crate::error::CliError;

#[derive(Subcommand)]
pub enum DialectCommands {
    /// List built-in dialects
    List,

    /// Show the full configuration of the selected dialect
    Show,
}

#[derive(Subcommand)]
pub enum PacketCommands {
    /// Frame a set-address command
    SetAddress {
        /// Target address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u16)]
        address: u16,
    },

    /// Frame a read command
    Read {
        /// Number of bytes to read
        count: u8,
    },

    /// Frame a write command
    Write {
        /// Payload as hex, e.g. "DE AD BE EF"
        data: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageFormat {
    /// Raw binary bytes
    #[default]
    Raw,
    /// Hex text, whitespace ignored
    Hex,
}

/// Parse `0x2000`, `2000h` style hex or plain decimal.
pub fn parse_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_suffix('h') {
        u16::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

/// Parse hex bytes, tolerating whitespace, commas and `0x` prefixes.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, CliError> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .map(|token| {
            if token.len() == 1 {
                format!("0{token}")
            } else {
                token.to_string()
            }
        })
        .collect();
    hex::decode(&digits).map_err(|e| CliError::InvalidInput(format!("bad hex '{s}': {e}")))
}

pub fn load_dialect_file(path: &Path) -> Result<ProtocolConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading dialect file {}", path.display()))?;
    let config = if has_extension(path, "json") {
        ProtocolConfig::from_json_str(&text)
    } else {
        ProtocolConfig::from_yaml_str(&text)
    };
    Ok(config.map_err(CliError::from)?)
}

pub fn load_settings(path: &Path) -> Result<SettingsRecord> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    let record = if has_extension(path, "json") {
        serde_json::from_str(&text).map_err(CliError::from)?
    } else {
        serde_yaml::from_str(&text).map_err(CliError::from)?
    };
    Ok(record)
}

pub fn read_image(path: &Path, format: ImageFormat, region_length: usize) -> Result<MemoryImage> {
    let bytes = match format {
        ImageFormat::Raw => {
            fs::read(path).with_context(|| format!("reading image {}", path.display()))?
        }
        ImageFormat::Hex => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading image {}", path.display()))?;
            parse_hex_bytes(&text)?
        }
    };
    Ok(MemoryImage::from_bytes(bytes, region_length).map_err(CliError::from)?)
}

pub fn write_image(path: &Path, image: &MemoryImage, format: ImageFormat) -> Result<()> {
    let written = match format {
        ImageFormat::Raw => fs::write(path, image.as_bytes()),
        ImageFormat::Hex => fs::write(path, format!("{}\n", hex::encode_upper(image))),
    };
    written.with_context(|| format!("writing image {}", path.display()))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
