//! Fuzzes the settings codec over arbitrary images.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_settings_decode
#![no_main]
use esc_config_protocol::{MemoryImage, OffsetMap, decode_settings, encode_settings};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let map = OffsetMap::standard();
    let Ok(image) = MemoryImage::from_bytes(data.to_vec(), data.len()) else {
        return;
    };
    let Ok(record) = decode_settings(&image, &map) else {
        return;
    };
    let Ok(encoded) = encode_settings(&image, &record, &map) else {
        return;
    };
    // Re-encoding a decoded image must decode to the same record.
    if let Ok(again) = decode_settings(&encoded, &map) {
        assert_eq!(again, record);
    }
});
