//! Fuzzes dialect configuration parsing from YAML and JSON.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_dialect_parse
#![no_main]
use esc_config_protocol::ProtocolConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = ProtocolConfig::from_yaml_str(text) {
        assert!(config.validate().is_ok());
    }
    if let Ok(config) = ProtocolConfig::from_json_str(text) {
        assert!(config.validate().is_ok());
    }
});
