//! Fixed-length configuration memory image.

use crate::error::{ProtocolError, ProtocolResult};

/// The full configuration region as last read from (or written to) the
/// device. Its length always equals the region length it was built for; a
/// short read never becomes an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: Box<[u8]>,
}

impl MemoryImage {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, region_length: usize) -> ProtocolResult<Self> {
        let bytes = bytes.into();
        if bytes.len() != region_length {
            return Err(ProtocolError::IncompleteTransfer {
                bytes_received: bytes.len(),
                expected: region_length,
            });
        }
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    pub fn zeroed(region_length: usize) -> Self {
        Self {
            bytes: vec![0u8; region_length].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, offset: usize) -> ProtocolResult<u8> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(ProtocolError::OffsetOutOfRange {
                offset,
                len: self.bytes.len(),
            })
    }

    pub(crate) fn set(&mut self, offset: usize, value: u8) -> ProtocolResult<()> {
        let len = self.bytes.len();
        let slot = self
            .bytes
            .get_mut(offset)
            .ok_or(ProtocolError::OffsetOutOfRange { offset, len })?;
        *slot = value;
        Ok(())
    }

    /// Offset of the first byte that differs from `other`, or of the first
    /// byte past the shorter image when the lengths differ.
    pub fn first_difference(&self, other: &MemoryImage) -> Option<usize> {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .position(|(a, b)| a != b)
            .or_else(|| (self.len() != other.len()).then(|| self.len().min(other.len())))
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }
}

impl AsRef<[u8]> for MemoryImage {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
