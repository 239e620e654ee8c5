//! Protocol-level error types.

use thiserror::Error;

/// Failures detected while framing, decoding or mapping configuration data.
///
/// None of these are transport failures; those live in the engine crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("response timed out: expected {expected} bytes, received {received}")]
    Timeout { expected: usize, received: usize },

    #[error("device rejected command (NACK 0x{byte:02X})")]
    Nack { byte: u8 },

    #[error("checksum mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    #[error("unexpected status byte 0x{actual:02X} (ACK is 0x{expected:02X})")]
    UnexpectedStatus { expected: u8, actual: u8 },

    #[error("echoed request differs at byte {offset}")]
    EchoMismatch { offset: usize },

    #[error("truncated response: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("incomplete transfer: received {bytes_received} of {expected} bytes")]
    IncompleteTransfer {
        bytes_received: usize,
        expected: usize,
    },

    #[error("offset {offset} is outside the {len}-byte image")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("parameter block of {len} bytes does not fit a 1-byte count")]
    ParamsTooLong { len: usize },

    #[error("invalid protocol configuration: {0}")]
    InvalidConfig(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

impl ProtocolError {
    /// True for errors the caller may reasonably retry (the device never
    /// answered, as opposed to answering wrongly).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
