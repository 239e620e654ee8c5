//! Protocol dialect configuration.
//!
//! A dialect pins down everything that differs between bootloader
//! generations: checksum algorithm and byte order, response framing, command
//! codes, status bytes, the configuration region and pacing. The engine is
//! written once against [`ProtocolConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checksum::{ByteOrder, Checksum, ChecksumVariant};
use crate::error::{ProtocolError, ProtocolResult};

pub const DIALECTS_YAML: &str = include_str!("dialects.yaml");

/// Layout of the device's reply to a command.
///
/// | shape | layout (`N` payload bytes) |
/// |---|---|
/// | `AckOnly` | `[payload:N][checksum:2][status]`, or `[status]` when `N == 0` |
/// | `AckPlusPayload` | `[status][payload:N][checksum:2]`, or `[status]` when `N == 0` |
/// | `EchoPlusPayload` | `[request echo][payload:N][checksum:2][status]`, or `[echo][status]` when `N == 0` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseShape {
    AckOnly,
    AckPlusPayload,
    EchoPlusPayload,
}

/// Where a NACK byte is recognised before a response is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NackScan {
    /// Any NACK byte in the pending (incomplete) buffer ends the wait.
    #[default]
    AnyPendingByte,
    /// Only a NACK in the first byte after the echo ends the wait.
    LeadingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandSet {
    pub set_address: u8,
    pub read: u8,
    pub write: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Timing {
    /// Wait budget for one complete response.
    pub response_timeout_ms: u64,
    /// Pause after every command.
    #[serde(default)]
    pub command_delay_ms: u64,
    /// Extra pause after a write chunk.
    #[serde(default)]
    pub write_delay_ms: u64,
}

impl Timing {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            response_timeout_ms: 500,
            command_delay_ms: 20,
            write_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProtocolConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub checksum: ChecksumVariant,
    pub checksum_order: ByteOrder,
    pub response_shape: ResponseShape,
    /// Start byte sent ahead of every request; not covered by the checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<u8>,
    /// Prefix write payloads with a 1-byte parameter count.
    #[serde(default)]
    pub length_prefix: bool,
    pub commands: CommandSet,
    pub ack_byte: u8,
    pub nack_bytes: Vec<u8>,
    #[serde(default)]
    pub nack_scan: NackScan,
    pub base_address: u16,
    pub region_length: usize,
    pub chunk_size: usize,
    /// Bit rate the caller is expected to open the link at. Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub timing: Timing,
    /// Read the region back after a write and compare.
    #[serde(default)]
    pub verify_writes: bool,
}

impl ProtocolConfig {
    pub fn checksum(&self) -> Checksum {
        Checksum::new(self.checksum, self.checksum_order)
    }

    pub fn is_nack(&self, byte: u8) -> bool {
        self.nack_bytes.contains(&byte)
    }

    /// Number of chunks a full-region transfer takes.
    pub fn chunk_count(&self) -> usize {
        self.region_length.div_ceil(self.chunk_size.max(1))
    }

    pub fn validate(&self) -> ProtocolResult<()> {
        if self.chunk_size == 0 || self.chunk_size > usize::from(u8::MAX) {
            return Err(ProtocolError::InvalidConfig(format!(
                "chunk size {} must be within 1..=255",
                self.chunk_size
            )));
        }
        if self.region_length == 0 {
            return Err(ProtocolError::InvalidConfig(
                "region length must be non-zero".to_string(),
            ));
        }
        let end = usize::from(self.base_address).saturating_add(self.region_length);
        if end > usize::from(u16::MAX) + 1 {
            return Err(ProtocolError::InvalidConfig(format!(
                "region 0x{:04X}+{} exceeds the 16-bit address space",
                self.base_address, self.region_length
            )));
        }
        if self.is_nack(self.ack_byte) {
            return Err(ProtocolError::InvalidConfig(format!(
                "ACK byte 0x{:02X} is also listed as a NACK byte",
                self.ack_byte
            )));
        }
        if self.timing.response_timeout_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "response timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_yaml_str(s: &str) -> ProtocolResult<Self> {
        let config: Self =
            serde_yaml::from_str(s).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> ProtocolResult<Self> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// The set of dialects shipped with the crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectCatalog {
    pub dialects: Vec<ProtocolConfig>,
}

impl DialectCatalog {
    pub fn get(&self, name: &str) -> Option<&ProtocolConfig> {
        self.dialects.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.dialects.iter().map(|d| d.name.as_str()).collect()
    }
}

pub fn load_builtin_dialects() -> ProtocolResult<DialectCatalog> {
    let catalog: DialectCatalog = serde_yaml::from_str(DIALECTS_YAML)
        .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
    for dialect in &catalog.dialects {
        dialect.validate()?;
    }
    Ok(catalog)
}

/// Look up one of the built-in dialects by name.
pub fn builtin_dialect(name: &str) -> ProtocolResult<ProtocolConfig> {
    let catalog = load_builtin_dialects()?;
    catalog
        .get(name)
        .cloned()
        .ok_or_else(|| ProtocolError::InvalidConfig(format!("unknown dialect '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn embedded_yaml_is_present() {
        assert!(DIALECTS_YAML.contains("dialects:"));
    }

    #[test]
    fn builtin_dialects_load_and_validate() -> TestResult {
        let catalog = load_builtin_dialects()?;
        assert_eq!(catalog.names(), ["bootloader", "bootloader-echo", "xmodem"]);
        Ok(())
    }

    #[test]
    fn bootloader_dialect_values() -> TestResult {
        let config = builtin_dialect("bootloader")?;
        assert_eq!(config.checksum, ChecksumVariant::Arc);
        assert_eq!(config.checksum_order, ByteOrder::LsbFirst);
        assert_eq!(config.response_shape, ResponseShape::AckOnly);
        assert_eq!(config.base_address, 0x2000);
        assert_eq!(config.region_length, 176);
        assert_eq!(config.chunk_size, 32);
        assert_eq!(config.ack_byte, 0x30);
        assert!(config.is_nack(0xC1));
        assert_eq!(config.nack_scan, NackScan::AnyPendingByte);
        assert_eq!(config.chunk_count(), 6);
        assert_eq!(config.baud_rate, Some(19200));
        Ok(())
    }

    #[test]
    fn xmodem_dialect_has_preamble() -> TestResult {
        let config = builtin_dialect("xmodem")?;
        assert_eq!(config.preamble, Some(0x2F));
        assert_eq!(config.checksum_order, ByteOrder::MsbFirst);
        Ok(())
    }

    #[test]
    fn unknown_dialect_is_an_error() {
        assert!(matches!(
            builtin_dialect("nope"),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_chunk_size() -> TestResult {
        let mut config = builtin_dialect("bootloader")?;
        config.chunk_size = 0;
        assert!(config.validate().is_err());
        config.chunk_size = 256;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn validate_rejects_region_past_address_space() -> TestResult {
        let mut config = builtin_dialect("bootloader")?;
        config.base_address = 0xFFF0;
        assert!(config.validate().is_err());
        config.region_length = 16;
        config.validate()?;
        Ok(())
    }

    #[test]
    fn validate_rejects_ack_in_nack_set() -> TestResult {
        let mut config = builtin_dialect("bootloader")?;
        config.nack_bytes.push(config.ack_byte);
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn json_round_trip() -> TestResult {
        let config = builtin_dialect("bootloader-echo")?;
        let json = serde_json::to_string(&config)?;
        assert!(json.contains("\"response-shape\":\"echo-plus-payload\""));
        let back = ProtocolConfig::from_json_str(&json)?;
        assert_eq!(back, config);
        Ok(())
    }

    #[test]
    fn yaml_defaults_apply() -> TestResult {
        let yaml = r"
name: minimal
checksum: xmodem
checksum-order: msb-first
response-shape: ack-plus-payload
commands: { set-address: 0x10, read: 0x11, write: 0x12 }
ack-byte: 0x06
nack-bytes: [0x15]
base-address: 0x0000
region-length: 64
chunk-size: 16
";
        let config = ProtocolConfig::from_yaml_str(yaml)?;
        assert_eq!(config.preamble, None);
        assert!(!config.length_prefix);
        assert!(!config.verify_writes);
        assert_eq!(config.timing, Timing::default());
        assert_eq!(config.chunk_count(), 4);
        Ok(())
    }
}
