//! Integration tests for the escctl CLI
//!
//! Covers every subcommand in human and JSON modes along with the exit codes
//! scripts rely on.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Custom predicate to check if output is valid JSON
fn is_json() -> impl predicates::Predicate<[u8]> {
    predicates::function::function(|s: &[u8]| {
        std::str::from_utf8(s).is_ok_and(|text| serde_json::from_str::<Value>(text).is_ok())
    })
}

/// Test helper to create an escctl command
fn escctl() -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("escctl")?;
    cmd.env("NO_COLOR", "1").env_remove("ESCCTL_DIALECT");
    Ok(cmd)
}

fn json_output(args: &[&str]) -> Result<Value, Box<dyn std::error::Error>> {
    let output = escctl()?.args(args).output()?;
    assert!(output.status.success(), "escctl {args:?} failed");
    Ok(serde_json::from_slice(&output.stdout)?)
}

const SETTINGS_YAML: &str = "\
power: 200
range: 100
stop-power: 60
timing: 16
beep: 80
kv: 1980
poles: 14
brake-on-stop: true
reverse: false
compensated-pwm: true
variable-pwm: false
stall-protection: true
anti-stuck-protection: true
";

fn write_settings(dir: &TempDir) -> Result<std::path::PathBuf, std::io::Error> {
    let path = dir.path().join("settings.yaml");
    fs::write(&path, SETTINGS_YAML)?;
    Ok(path)
}

#[test]
fn test_cli_help() -> TestResult {
    escctl()?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ESC bootloader"));
    Ok(())
}

#[test]
fn test_cli_version() -> TestResult {
    escctl()?
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("escctl"));
    Ok(())
}

#[test]
fn test_completion_generation() -> TestResult {
    escctl()?
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_escctl"));
    Ok(())
}

// Dialects

#[test]
fn test_dialect_list_human() -> TestResult {
    escctl()?
        .args(["dialect", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bootloader-echo"))
        .stdout(predicate::str::contains("xmodem"));
    Ok(())
}

#[test]
fn test_dialect_list_json() -> TestResult {
    let json = json_output(&["--json", "dialect", "list"])?;
    assert_eq!(json["success"], true);
    let names: Vec<&str> = json["dialects"]
        .as_array()
        .ok_or("dialects should be an array")?
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert_eq!(names, ["bootloader", "bootloader-echo", "xmodem"]);
    Ok(())
}

#[test]
fn test_dialect_show_yaml() -> TestResult {
    escctl()?
        .args(["dialect", "show", "--dialect", "xmodem"])
        .assert()
        .success()
        .stdout(predicate::str::contains("preamble: 47"))
        .stdout(predicate::str::contains("checksum-order: msb-first"));
    Ok(())
}

#[test]
fn test_unknown_dialect_exit_code() -> TestResult {
    escctl()?
        .args(["--dialect", "nope", "dialect", "show"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown dialect: nope"));
    Ok(())
}

#[test]
fn test_dialect_from_env() -> TestResult {
    escctl()?
        .env("ESCCTL_DIALECT", "xmodem")
        .args(["packet", "read", "32"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2F 03 20 71 31"));
    Ok(())
}

#[test]
fn test_dialect_file() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("custom.yaml");
    fs::write(
        &path,
        "\
name: custom
checksum: xmodem
checksum-order: msb-first
response-shape: ack-plus-payload
commands: { set-address: 0x10, read: 0x11, write: 0x12 }
ack-byte: 0x06
nack-bytes: [0x15]
base-address: 0x0000
region-length: 64
chunk-size: 16
",
    )?;
    let json = json_output(&[
        "--json",
        "--dialect-file",
        path.to_str().ok_or("path")?,
        "packet",
        "read",
        "16",
    ])?;
    assert_eq!(json["dialect"], "custom");
    assert_eq!(json["expected-response-len"], 19);
    Ok(())
}

// Packets and checksums

#[test]
fn test_packet_set_address() -> TestResult {
    escctl()?
        .args(["packet", "set-address", "0x2000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("FF 20 00 29 F0"))
        .stdout(predicate::str::contains("expects 1 response bytes"));
    Ok(())
}

#[test]
fn test_packet_read_and_write() -> TestResult {
    escctl()?
        .args(["packet", "read", "32"])
        .assert()
        .success()
        .stdout(predicate::str::contains("03 20 01 28"))
        .stdout(predicate::str::contains("expects 35 response bytes"));
    escctl()?
        .args(["packet", "write", "DE AD BE EF"])
        .assert()
        .success()
        .stdout(predicate::str::contains("01 04 DE AD BE EF 6B F4"));
    Ok(())
}

#[test]
fn test_packet_json() -> TestResult {
    let json = json_output(&["--json", "-d", "xmodem", "packet", "set-address", "0x2040"])?;
    assert_eq!(json["request"], "2FFF20408141");
    Ok(())
}

#[test]
fn test_packet_bad_hex_exit_code() -> TestResult {
    escctl()?
        .args(["packet", "write", "xyz"])
        .assert()
        .code(4);
    Ok(())
}

#[test]
fn test_checksum_variants() -> TestResult {
    escctl()?
        .args(["checksum", "30 00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0x0014 (wire: 14 00)"));
    let json = json_output(&["--json", "-d", "xmodem", "checksum", "2F 30 00 00 01 00"])?;
    assert_eq!(json["value"], "0xCFD4");
    assert_eq!(json["wire"], "CFD4");
    Ok(())
}

// Images

#[test]
fn test_defaults_json() -> TestResult {
    let json = json_output(&["--json", "defaults"])?;
    let image = json["image"].as_str().ok_or("image should be a string")?;
    assert_eq!(image.len(), 176 * 2);
    assert_eq!(image.get(40..42), Some("01"));
    assert_eq!(image.get(44..46), Some("01"));
    assert_eq!(image.get(58..60), Some("01"));
    assert_eq!(json["settings"]["compensated-pwm"], true);
    assert_eq!(json["settings"]["brake-on-stop"], false);
    Ok(())
}

#[test]
fn test_encode_then_decode() -> TestResult {
    let dir = TempDir::new()?;
    let settings = write_settings(&dir)?;
    let image = dir.path().join("image.bin");

    escctl()?
        .args(["encode", settings.to_str().ok_or("path")?, "-o", image.to_str().ok_or("path")?])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let bytes = fs::read(&image)?;
    assert_eq!(bytes.len(), 176);
    assert_eq!(bytes.get(25), Some(&200));
    assert_eq!(bytes.get(26), Some(&49));

    let json = json_output(&["--json", "decode", image.to_str().ok_or("path")?])?;
    assert_eq!(json["settings"]["power"], 200);
    assert_eq!(json["settings"]["kv"], 1980);
    assert_eq!(json["settings"]["stall-protection"], true);
    Ok(())
}

#[test]
fn test_encode_preserves_base_bytes() -> TestResult {
    let dir = TempDir::new()?;
    let settings = write_settings(&dir)?;
    let base = dir.path().join("base.hex");
    fs::write(&base, "AB ".repeat(176))?;
    let out = dir.path().join("out.hex");

    escctl()?
        .args([
            "encode",
            settings.to_str().ok_or("path")?,
            "--base",
            base.to_str().ok_or("path")?,
            "-o",
            out.to_str().ok_or("path")?,
            "--format",
            "hex",
        ])
        .assert()
        .success();

    let text = fs::read_to_string(&out)?;
    let text = text.trim();
    assert_eq!(text.len(), 352);
    assert_eq!(text.get(0..2), Some("AB"));
    assert_eq!(text.get(50..52), Some("C8"));
    Ok(())
}

#[test]
fn test_decode_wrong_length_exit_code() -> TestResult {
    let dir = TempDir::new()?;
    let image = dir.path().join("short.bin");
    fs::write(&image, [0u8; 100])?;

    escctl()?
        .args(["decode", image.to_str().ok_or("path")?])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("incomplete transfer"));
    Ok(())
}

#[test]
fn test_error_json_output() -> TestResult {
    let dir = TempDir::new()?;
    let image = dir.path().join("short.bin");
    fs::write(&image, [0u8; 10])?;

    escctl()?
        .args(["--json", "decode", image.to_str().ok_or("path")?])
        .assert()
        .code(3)
        .stdout(is_json())
        .stdout(predicate::str::contains("\"success\": false"));
    Ok(())
}

// Simulated transfers

#[test]
fn test_simulate_read() -> TestResult {
    let json = json_output(&["--json", "simulate"])?;
    assert_eq!(json["commands"], 12);
    assert_eq!(json["read"]["anti-stuck-protection"], true);
    Ok(())
}

#[test]
fn test_simulate_write_with_verify() -> TestResult {
    let dir = TempDir::new()?;
    let settings = write_settings(&dir)?;
    let json = json_output(&[
        "--json",
        "-d",
        "bootloader-echo",
        "simulate",
        "--write",
        settings.to_str().ok_or("path")?,
        "--verify",
        "--fragment",
        "4",
    ])?;
    assert_eq!(json["commands"], 36);
    assert_eq!(json["written"]["power"], 200);
    let image = json["device-image"].as_str().ok_or("device image")?;
    assert_eq!(image.get(50..52), Some("C8"));
    Ok(())
}

#[test]
fn test_simulate_fault_exit_code() -> TestResult {
    escctl()?
        .args(["simulate", "--fault", "3:nack=C1"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("NACK 0xC1"));
    Ok(())
}
