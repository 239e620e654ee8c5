//! Fuzzes incremental response decoding for every built-in dialect.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_response_decode
#![no_main]
use esc_config_protocol::{Packet, PacketCodec, load_builtin_dialects};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&payload_len, raw)) = data.split_first() else {
        return;
    };
    let Ok(catalog) = load_builtin_dialects() else {
        return;
    };
    for config in &catalog.dialects {
        let codec = PacketCodec::new(config);
        let Ok(request) = codec.encode(&Packet::new(config.commands.read).with_params([payload_len]))
        else {
            continue;
        };
        let payload_len = usize::from(payload_len);
        // Must never panic on arbitrary bytes; errors are expected, panics are not.
        for cut in 0..=raw.len() {
            if let Some(prefix) = raw.get(..cut) {
                if let Ok(Some(payload)) = codec.poll(&request, prefix, payload_len) {
                    assert_eq!(payload.len(), payload_len);
                }
                let _stalled = codec.stalled(&request, prefix, payload_len);
            }
        }
    }
});
