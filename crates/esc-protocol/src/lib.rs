//! Configuration protocol for ESC bootloaders.
//!
//! This crate is intentionally I/O-free. It provides pure functions and types
//! that can be tested and fuzzed without hardware or serial plumbing:
//!
//! - [`checksum`]: CRC-16/ARC and CRC-16/XMODEM with explicit wire byte order
//! - [`packet`]: request framing and shape-aware response decoding
//! - [`dialect`]: per-generation protocol configuration and built-in presets
//! - [`image`]: the fixed-length configuration memory image
//! - [`settings`]: offset table and the settings record codec
//!
//! The async transfer engine that drives a serial link lives in
//! `esc-config-engine`.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(static_mut_refs)]

pub mod checksum;
pub mod dialect;
pub mod error;
pub mod image;
pub mod packet;
pub mod settings;

pub use checksum::{ByteOrder, Checksum, ChecksumVariant, crc16_arc, crc16_xmodem};
pub use dialect::{
    CommandSet, DIALECTS_YAML, DialectCatalog, NackScan, ProtocolConfig, ResponseShape, Timing,
    builtin_dialect, load_builtin_dialects,
};
pub use error::{ProtocolError, ProtocolResult};
pub use image::MemoryImage;
pub use packet::{CHECKSUM_LEN, Packet, PacketCodec, STATUS_LEN};
pub use settings::{
    Encoding, Field, FieldOffset, FieldValue, KV_BASE, KV_STEP, OffsetMap, SettingsRecord,
    decode_kv, decode_settings, encode_kv, encode_settings,
};
