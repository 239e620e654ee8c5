//! Image decode/encode commands

use std::path::Path;

use anyhow::Result;
use colored::*;
use esc_config_protocol::{MemoryImage, OffsetMap, ProtocolConfig, decode_settings, encode_settings};
use serde_json::json;
use tracing::info;

use crate::commands::{ImageFormat, load_settings, read_image, write_image};
use crate::error::CliError;
use crate::output;

pub fn decode(config: &ProtocolConfig, path: &Path, format: ImageFormat, json: bool) -> Result<()> {
    let map = OffsetMap::standard();
    let image = read_image(path, format, config.region_length)?;
    let record = decode_settings(&image, &map).map_err(CliError::from)?;

    if json {
        output::print_success(json!({ "settings": record }));
    } else {
        output::print_settings_human(&record, &map);
    }
    Ok(())
}

pub fn encode(
    config: &ProtocolConfig,
    settings: &Path,
    base: Option<&Path>,
    out: Option<&Path>,
    format: ImageFormat,
    json: bool,
) -> Result<()> {
    let map = OffsetMap::standard();
    let record = load_settings(settings)?;
    let base = match base {
        Some(path) => read_image(path, format, config.region_length)?,
        None => {
            info!("no base image given; starting from safe defaults");
            MemoryImage::safe_default(&map, config.region_length).map_err(CliError::from)?
        }
    };
    let previous = decode_settings(&base, &map).map_err(CliError::from)?;
    let image = encode_settings(&base, &record, &map).map_err(CliError::from)?;

    emit_image(&image, out, format, json, || {
        output::print_changes(&previous, &record);
    })
}

pub fn defaults(
    config: &ProtocolConfig,
    out: Option<&Path>,
    format: ImageFormat,
    json: bool,
) -> Result<()> {
    let map = OffsetMap::standard();
    let image = MemoryImage::safe_default(&map, config.region_length).map_err(CliError::from)?;
    let record = decode_settings(&image, &map).map_err(CliError::from)?;

    if json && out.is_none() {
        output::print_success(json!({
            "image": hex::encode_upper(&image),
            "settings": record,
        }));
        return Ok(());
    }
    emit_image(&image, out, format, json, || {
        output::print_settings_human(&record, &map);
    })
}

/// Write `image` to `out`, or print it when no path is given.
fn emit_image(
    image: &MemoryImage,
    out: Option<&Path>,
    format: ImageFormat,
    json: bool,
    summary: impl FnOnce(),
) -> Result<()> {
    match out {
        Some(path) => {
            write_image(path, image, format)?;
            if json {
                output::print_success(json!({
                    "path": path.display().to_string(),
                    "len": image.len(),
                }));
            } else {
                summary();
                println!(
                    "{} {} ({} bytes)",
                    "Wrote".green(),
                    path.display(),
                    image.len()
                );
            }
        }
        None if json => {
            output::print_success(json!({ "image": hex::encode_upper(image) }));
        }
        None => {
            summary();
            println!("{}", "Image:".bold());
            output::print_hex_dump(image.as_bytes());
        }
    }
    Ok(())
}
