//! Dry-run transfers against the simulated bootloader

use std::path::Path;

use anyhow::Result;
use colored::*;
use esc_config_engine::mock::{Fault, SimulatedBootloader};
use esc_config_engine::{Session, TransferProgress};
use esc_config_protocol::{MemoryImage, OffsetMap, ProtocolConfig};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::commands::{ImageFormat, load_settings, read_image};
use crate::error::CliError;
use crate::output;

pub struct SimulateOptions<'a> {
    pub image: Option<&'a Path>,
    pub format: ImageFormat,
    pub write: Option<&'a Path>,
    pub faults: &'a [String],
    pub fragment: Option<usize>,
}

/// Parse `INDEX:KIND`, e.g. `5:silent` or `3:nack=C1`.
pub fn parse_fault(spec: &str) -> Result<(usize, Fault), CliError> {
    let invalid = || CliError::InvalidInput(format!("bad fault '{spec}', expected INDEX:KIND"));
    let (index, kind) = spec.split_once(':').ok_or_else(invalid)?;
    let index = index.trim().parse().map_err(|_| invalid())?;
    let (kind, arg) = match kind.split_once('=') {
        Some((kind, arg)) => (kind, Some(arg)),
        None => (kind, None),
    };
    let byte = |arg: Option<&str>| -> Result<u8, CliError> {
        let arg = arg.ok_or_else(invalid)?;
        let arg = arg.strip_prefix("0x").unwrap_or(arg);
        u8::from_str_radix(arg, 16).map_err(|_| invalid())
    };
    let fault = match kind {
        "silent" => Fault::Silent,
        "nack" => Fault::Nack(byte(arg)?),
        "corrupt" => Fault::CorruptChecksum,
        "truncate" => Fault::Truncate(
            arg.ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())?,
        ),
        "garbage" => Fault::Garbage(byte(arg)?),
        _ => return Err(invalid()),
    };
    Ok((index, fault))
}

/// Execute simulate command
pub async fn execute(
    config: ProtocolConfig,
    options: SimulateOptions<'_>,
    json: bool,
) -> Result<()> {
    let map = OffsetMap::standard();
    let region = match options.image {
        Some(path) => read_image(path, options.format, config.region_length)?,
        None => MemoryImage::safe_default(&map, config.region_length).map_err(CliError::from)?,
    };
    let faults = options
        .faults
        .iter()
        .map(|spec| parse_fault(spec))
        .collect::<Result<Vec<_>, _>>()?;
    let update = options.write.map(load_settings).transpose()?;

    let mut device = SimulatedBootloader::new(config.clone()).with_region(region.as_bytes());
    if let Some(size) = options.fragment {
        device = device.with_fragment_size(size);
    }
    let handle = device.handle();
    for (index, fault) in faults {
        handle.inject(index, fault);
    }

    let (tx, mut rx) = mpsc::channel::<TransferProgress>(64);
    let reporter = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            info!(
                direction = ?progress.direction,
                chunk = progress.chunks_completed,
                of = progress.chunks_total,
                percent = progress.percent(),
                "transfer progress"
            );
        }
    });

    let mut session = Session::new(device, config.clone())
        .map_err(CliError::from)?
        .with_progress(tx);
    let before = session.read_all().await.map_err(CliError::from)?;
    if let Some(record) = &update {
        session.write_all(record).await.map_err(CliError::from)?;
    }
    let commands = handle.command_count();
    drop(session);
    reporter.await?;

    let memory = handle.memory(config.base_address, config.region_length);
    if json {
        output::print_success(json!({
            "dialect": config.name,
            "read": before,
            "written": update,
            "commands": commands,
            "device-image": hex::encode_upper(&memory),
        }));
        return Ok(());
    }

    println!("{} {}", "Dialect:".bold(), config.name);
    output::print_settings_human(&before, &map);
    if let Some(record) = &update {
        output::print_changes(&before, record);
    }
    println!("{} {commands}", "Commands exchanged:".bold());
    println!("{}", "Device image:".bold());
    output::print_hex_dump(&memory);
    Ok(())
}
