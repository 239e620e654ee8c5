//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use esc_config_protocol::{Field, FieldValue, OffsetMap, SettingsRecord};
use serde_json::{Value, json};

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "chain": error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        }
    });
    print_json(&error_json);
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print a JSON document wrapped with `"success": true`.
pub fn print_success(mut body: Value) {
    if let Value::Object(map) = &mut body {
        map.insert("success".to_string(), Value::Bool(true));
    }
    print_json(&body);
}

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

fn format_value(value: FieldValue) -> ColoredString {
    match value {
        FieldValue::Number(n) => n.to_string().normal(),
        FieldValue::Flag(true) => "on".green(),
        FieldValue::Flag(false) => "off".dimmed(),
        FieldValue::Unset => "-".dimmed(),
    }
}

/// Print settings as a field table with the byte offset backing each field.
pub fn print_settings_human(record: &SettingsRecord, map: &OffsetMap) {
    println!("{}", "Settings:".bold());
    for field in Field::ALL {
        let offset = map
            .offset_of(field)
            .map_or_else(|| "-".to_string(), |o| format!("@{o}"));
        println!(
            "  {:<24} {:>6}  {}",
            field.name(),
            format_value(record.get(field)),
            offset.dimmed()
        );
    }
}

/// Print bytes as rows of 16 hex pairs with a leading offset.
pub fn print_hex_dump(bytes: &[u8]) {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let line: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        println!("  {:04X}  {}", row * 16, line.join(" "));
    }
}

pub fn print_changes(before: &SettingsRecord, after: &SettingsRecord) {
    let changed = before.changed_fields(after);
    if changed.is_empty() {
        println!("{}", "No settings changed".yellow());
        return;
    }
    println!("{}", "Changed:".bold());
    for field in changed {
        println!(
            "  {:<24} {} -> {}",
            field.name(),
            format_value(before.get(field)),
            format_value(after.get(field))
        );
    }
}
