//! Dialect inspection commands

use anyhow::Result;
use colored::*;
use esc_config_protocol::load_builtin_dialects;
use serde_json::json;

use crate::Cli;
use crate::commands::DialectCommands;
use crate::error::CliError;
use crate::output;

/// Execute dialect command
pub fn execute(cmd: &DialectCommands, cli: &Cli, json: bool) -> Result<()> {
    match cmd {
        DialectCommands::List => list_dialects(json),
        DialectCommands::Show => {
            let config = cli.protocol_config()?;
            if json {
                output::print_success(json!({ "dialect": config }));
            } else {
                print!("{}", serde_yaml::to_string(&config).map_err(CliError::from)?);
            }
            Ok(())
        }
    }
}

fn list_dialects(json: bool) -> Result<()> {
    let catalog = load_builtin_dialects().map_err(CliError::from)?;
    if json {
        let dialects: Vec<_> = catalog
            .dialects
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "checksum": d.checksum,
                    "response-shape": d.response_shape,
                    "baud-rate": d.baud_rate,
                })
            })
            .collect();
        output::print_success(json!({ "dialects": dialects }));
        return Ok(());
    }

    println!("{}", "Built-in dialects:".bold());
    for d in &catalog.dialects {
        println!(
            "  {:<18} {}",
            d.name.bold(),
            d.description.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(())
}
