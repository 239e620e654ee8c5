//! 16-bit packet checksums.
//!
//! Two polynomial families are seen across bootloader generations:
//! - CRC-16/ARC: reflected, polynomial 0xA001, consumed LSB first.
//! - CRC-16/XMODEM: polynomial 0x1021, consumed MSB first.
//!
//! Both start from zero and apply no final XOR. The order in which the
//! resulting word is written to the wire is a separate, explicit choice.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// CRC-16/ARC over `data`, computed bit by bit.
pub fn crc16_arc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            if (u16::from(b) ^ crc) & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
            b >>= 1;
        }
    }
    crc
}

/// CRC-16/XMODEM over `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumVariant {
    /// Variant A: CRC-16/ARC.
    Arc,
    /// Variant B: CRC-16/XMODEM.
    Xmodem,
}

impl ChecksumVariant {
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            Self::Arc => crc16_arc(data),
            Self::Xmodem => crc16_xmodem(data),
        }
    }
}

/// Wire order of the two checksum bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    LsbFirst,
    MsbFirst,
}

impl ByteOrder {
    pub fn to_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Self::LsbFirst => value.to_le_bytes(),
            Self::MsbFirst => value.to_be_bytes(),
        }
    }

    pub fn from_bytes(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::LsbFirst => u16::from_le_bytes(bytes),
            Self::MsbFirst => u16::from_be_bytes(bytes),
        }
    }
}

/// A checksum algorithm paired with its wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    pub variant: ChecksumVariant,
    pub order: ByteOrder,
}

impl Checksum {
    pub const fn new(variant: ChecksumVariant, order: ByteOrder) -> Self {
        Self { variant, order }
    }

    pub fn compute(&self, data: &[u8]) -> u16 {
        self.variant.compute(data)
    }

    /// Append the checksum of `covered` to `out` in wire order.
    pub fn append(&self, out: &mut Vec<u8>, covered: &[u8]) {
        out.extend_from_slice(&self.order.to_bytes(self.compute(covered)));
    }

    /// Check a received trailer against a locally recomputed checksum.
    pub fn verify(&self, covered: &[u8], trailer: [u8; 2]) -> ProtocolResult<()> {
        let computed = self.compute(covered);
        let received = self.order.from_bytes(trailer);
        if computed != received {
            return Err(ProtocolError::ChecksumMismatch { computed, received });
        }
        Ok(())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(500))]

        #[test]
        fn prop_checksum_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(crc16_arc(&data), crc16_arc(&data));
            prop_assert_eq!(crc16_xmodem(&data), crc16_xmodem(&data));
        }

        #[test]
        fn prop_single_bit_flip_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut flipped = data.clone();
            let i = index.index(flipped.len());
            if let Some(byte) = flipped.get_mut(i) {
                *byte ^= 1 << bit;
            }
            prop_assert_ne!(crc16_arc(&data), crc16_arc(&flipped));
            prop_assert_ne!(crc16_xmodem(&data), crc16_xmodem(&flipped));
        }

        #[test]
        fn prop_byte_order_inverts(value: u16) {
            for order in [ByteOrder::LsbFirst, ByteOrder::MsbFirst] {
                prop_assert_eq!(order.from_bytes(order.to_bytes(value)), value);
            }
        }
    }
}
