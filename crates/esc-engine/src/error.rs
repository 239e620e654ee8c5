//! Engine error types.

use esc_config_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the transfer engine.
///
/// Chunk-level failures are wrapped with the progress made before the
/// failure; [`EngineError::root_cause`] walks back to the original error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport write/read failure. Fatal to the session.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A read-all stopped before the whole region arrived.
    #[error(
        "incomplete transfer: received {bytes_received} of {expected} bytes, aborted at chunk {chunk_index}: {source}"
    )]
    IncompleteTransfer {
        bytes_received: usize,
        expected: usize,
        chunk_index: usize,
        #[source]
        source: Box<EngineError>,
    },

    /// A write-all stopped part way; the device holds a partial update.
    #[error(
        "write aborted at chunk {chunk_index} after {bytes_written} of {expected} bytes: {source}"
    )]
    WriteAborted {
        bytes_written: usize,
        expected: usize,
        chunk_index: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("transfer cancelled after {chunks_completed} chunks ({bytes_transferred} bytes)")]
    Cancelled {
        bytes_transferred: usize,
        chunks_completed: usize,
    },

    #[error("read-back differs at offset {offset}: wrote 0x{expected:02X}, read 0x{actual:02X}")]
    VerifyMismatch { offset: usize, expected: u8, actual: u8 },

    /// A write was requested with no image to merge the settings into.
    #[error("no base image: read the device or adopt an image before writing")]
    NoBaseImage,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// The innermost error, past any transfer progress wrappers.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            Self::IncompleteTransfer { source, .. } | Self::WriteAborted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self.root_cause() {
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.protocol_error(), Some(ProtocolError::Timeout { .. }))
    }

    pub fn is_nack(&self) -> bool {
        matches!(self.protocol_error(), Some(ProtocolError::Nack { .. }))
    }

    pub fn is_io(&self) -> bool {
        matches!(self.root_cause(), Self::Io(_))
    }

    /// Index of the chunk a transfer failed on, if this is a transfer error.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::IncompleteTransfer { chunk_index, .. } | Self::WriteAborted { chunk_index, .. } => {
                Some(*chunk_index)
            }
            _ => None,
        }
    }
}
