//! Packet framing commands

use anyhow::Result;
use esc_config_protocol::{Packet, PacketCodec, ProtocolConfig};
use serde_json::json;

use crate::commands::{PacketCommands, parse_hex_bytes};
use crate::error::CliError;
use crate::output;

/// Execute packet command
pub fn execute(cmd: &PacketCommands, config: &ProtocolConfig, json: bool) -> Result<()> {
    let commands = &config.commands;
    let (packet, payload_len) = match cmd {
        PacketCommands::SetAddress { address } => {
            (Packet::new(commands.set_address).with_address(*address), 0)
        }
        PacketCommands::Read { count } => (
            Packet::new(commands.read).with_params([*count]),
            usize::from(*count),
        ),
        PacketCommands::Write { data } => (
            Packet::new(commands.write)
                .with_params(parse_hex_bytes(data)?)
                .counted(config.length_prefix),
            0,
        ),
    };

    let codec = PacketCodec::new(config);
    let request = codec.encode(&packet).map_err(CliError::from)?;
    let response_len = codec.expected_response_len(request.len(), payload_len);

    if json {
        output::print_success(json!({
            "dialect": config.name,
            "request": hex::encode_upper(&request),
            "expected-response-len": response_len,
        }));
    } else {
        println!("{}", spaced_hex(&request));
        println!("expects {response_len} response bytes");
    }
    Ok(())
}

pub fn checksum(config: &ProtocolConfig, data: &str, json: bool) -> Result<()> {
    let bytes = parse_hex_bytes(data)?;
    let value = config.checksum().compute(&bytes);
    let wire = config.checksum_order.to_bytes(value);

    if json {
        output::print_success(json!({
            "variant": config.checksum,
            "value": format!("0x{value:04X}"),
            "wire": hex::encode_upper(wire),
        }));
    } else {
        println!("0x{value:04X} (wire: {})", spaced_hex(&wire));
    }
    Ok(())
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
