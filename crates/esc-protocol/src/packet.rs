//! Request encoding and response decoding.
//!
//! Request layout:
//! - Byte 0: Preamble (only when the dialect defines one)
//! - Next byte: Command code
//! - Next 2 bytes: Target address, big-endian (optional)
//! - Next byte: Parameter count (only for counted packets)
//! - Next N bytes: Parameters
//! - Last 2 bytes: Checksum over everything after the preamble
//!
//! Response layouts are described on [`ResponseShape`]. The caller always
//! states the payload length it expects; the shape is never guessed from
//! content.

use tracing::trace;

use crate::checksum::Checksum;
use crate::dialect::{NackScan, ProtocolConfig, ResponseShape};
use crate::error::{ProtocolError, ProtocolResult};

pub const CHECKSUM_LEN: usize = 2;
pub const STATUS_LEN: usize = 1;

/// An outbound command before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub address: Option<u16>,
    pub params: Vec<u8>,
    pub counted: bool,
}

impl Packet {
    pub fn new(command: u8) -> Self {
        Self {
            command,
            address: None,
            params: Vec::new(),
            counted: false,
        }
    }

    pub fn with_address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_params(mut self, params: impl Into<Vec<u8>>) -> Self {
        self.params = params.into();
        self
    }

    /// Emit a 1-byte parameter count ahead of the parameters.
    pub fn counted(mut self, counted: bool) -> Self {
        self.counted = counted;
        self
    }
}

/// Frames requests and parses replies for one dialect.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    checksum: Checksum,
    shape: ResponseShape,
    preamble: Option<u8>,
    ack_byte: u8,
    nack_bytes: Vec<u8>,
    nack_scan: NackScan,
}

/// Byte positions of the parts of a complete response.
struct FrameLayout {
    payload_start: usize,
    status_index: usize,
    len: usize,
}

impl PacketCodec {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            checksum: config.checksum(),
            shape: config.response_shape,
            preamble: config.preamble,
            ack_byte: config.ack_byte,
            nack_bytes: config.nack_bytes.clone(),
            nack_scan: config.nack_scan,
        }
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub fn encode(&self, packet: &Packet) -> ProtocolResult<Vec<u8>> {
        let mut body = Vec::with_capacity(4 + packet.params.len());
        body.push(packet.command);
        if let Some(address) = packet.address {
            body.extend_from_slice(&address.to_be_bytes());
        }
        if packet.counted {
            let count = u8::try_from(packet.params.len()).map_err(|_| {
                ProtocolError::ParamsTooLong {
                    len: packet.params.len(),
                }
            })?;
            body.push(count);
        }
        body.extend_from_slice(&packet.params);

        let mut out = Vec::with_capacity(body.len() + CHECKSUM_LEN + 1);
        if let Some(preamble) = self.preamble {
            out.push(preamble);
        }
        out.extend_from_slice(&body);
        self.checksum.append(&mut out, &body);
        Ok(out)
    }

    /// Total length of a complete reply to a `request_len`-byte request.
    pub fn expected_response_len(&self, request_len: usize, payload_len: usize) -> usize {
        self.layout(request_len, payload_len).len
    }

    fn echo_len(&self, request_len: usize) -> usize {
        match self.shape {
            ResponseShape::EchoPlusPayload => request_len,
            ResponseShape::AckOnly | ResponseShape::AckPlusPayload => 0,
        }
    }

    fn layout(&self, request_len: usize, payload_len: usize) -> FrameLayout {
        let trailer = if payload_len > 0 {
            payload_len + CHECKSUM_LEN
        } else {
            0
        };
        let echo = self.echo_len(request_len);
        match self.shape {
            ResponseShape::AckPlusPayload => FrameLayout {
                payload_start: STATUS_LEN,
                status_index: 0,
                len: STATUS_LEN + trailer,
            },
            ResponseShape::AckOnly | ResponseShape::EchoPlusPayload => FrameLayout {
                payload_start: echo,
                status_index: echo + trailer,
                len: echo + trailer + STATUS_LEN,
            },
        }
    }

    fn is_nack(&self, byte: u8) -> bool {
        self.nack_bytes.contains(&byte)
    }

    /// Incremental decode of `buf`, the bytes received so far in reply to
    /// `request`.
    ///
    /// Returns `Ok(None)` while more bytes are needed and `Ok(Some(payload))`
    /// once a complete, verified frame is present. Bytes past the end of the
    /// frame are ignored.
    pub fn poll(
        &self,
        request: &[u8],
        buf: &[u8],
        payload_len: usize,
    ) -> ProtocolResult<Option<Vec<u8>>> {
        let echo_len = self.echo_len(request.len());
        let echo_seen = buf.len().min(echo_len);
        if let Some(offset) = buf
            .iter()
            .zip(request)
            .take(echo_seen)
            .position(|(got, sent)| got != sent)
        {
            return Err(ProtocolError::EchoMismatch { offset });
        }

        let layout = self.layout(request.len(), payload_len);
        if buf.len() < layout.len {
            // Checksum bytes may take any value, so only the status and
            // payload positions are scanned.
            let window = layout.payload_start.saturating_sub(echo_len) + payload_len.max(1);
            let pending = buf.get(echo_seen..).unwrap_or_default();
            let scanned = pending.get(..window).unwrap_or(pending);
            self.scan_pending(scanned, payload_len)?;
            return Ok(None);
        }
        if buf.len() > layout.len {
            trace!(extra = buf.len() - layout.len, "ignoring bytes past end of frame");
        }
        self.parse_frame(buf, &layout, payload_len).map(Some)
    }

    /// Decode a buffer that is expected to hold the whole reply.
    pub fn decode(&self, raw: &[u8], request: &[u8], payload_len: usize) -> ProtocolResult<Vec<u8>> {
        match self.poll(request, raw, payload_len)? {
            Some(payload) => Ok(payload),
            None => Err(ProtocolError::Truncated {
                expected: self.expected_response_len(request.len(), payload_len),
                actual: raw.len(),
            }),
        }
    }

    /// The error to report when the wait budget ran out with `buf` received.
    ///
    /// A lone NACK is still reported as a rejection even when the scan policy
    /// could not tell it apart from payload while waiting.
    pub fn stalled(&self, request: &[u8], buf: &[u8], payload_len: usize) -> ProtocolError {
        let echo_len = self.echo_len(request.len());
        if let Some(&[byte]) = buf.get(echo_len..)
            && self.is_nack(byte)
        {
            return ProtocolError::Nack { byte };
        }
        ProtocolError::Timeout {
            expected: self.expected_response_len(request.len(), payload_len),
            received: buf.len(),
        }
    }

    fn scan_pending(&self, pending: &[u8], payload_len: usize) -> ProtocolResult<()> {
        let hit = match self.nack_scan {
            NackScan::AnyPendingByte => pending.iter().copied().find(|&b| self.is_nack(b)),
            NackScan::LeadingStatus => {
                let status_leads =
                    payload_len == 0 || self.shape == ResponseShape::AckPlusPayload;
                pending
                    .first()
                    .copied()
                    .filter(|&b| status_leads && self.is_nack(b))
            }
        };
        match hit {
            Some(byte) => Err(ProtocolError::Nack { byte }),
            None => Ok(()),
        }
    }

    fn parse_frame(
        &self,
        frame: &[u8],
        layout: &FrameLayout,
        payload_len: usize,
    ) -> ProtocolResult<Vec<u8>> {
        let truncated = || ProtocolError::Truncated {
            expected: layout.len,
            actual: frame.len(),
        };

        let status = *frame.get(layout.status_index).ok_or_else(truncated)?;
        if self.is_nack(status) {
            return Err(ProtocolError::Nack { byte: status });
        }
        if status != self.ack_byte {
            return Err(ProtocolError::UnexpectedStatus {
                expected: self.ack_byte,
                actual: status,
            });
        }

        if payload_len == 0 {
            return Ok(Vec::new());
        }
        let payload_end = layout.payload_start + payload_len;
        let payload = frame
            .get(layout.payload_start..payload_end)
            .ok_or_else(truncated)?;
        let trailer = frame
            .get(payload_end..payload_end + CHECKSUM_LEN)
            .and_then(|t| <[u8; 2]>::try_from(t).ok())
            .ok_or_else(truncated)?;
        self.checksum.verify(payload, trailer)?;
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::builtin_dialect;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn codec(name: &str) -> Result<PacketCodec, ProtocolError> {
        Ok(PacketCodec::new(&builtin_dialect(name)?))
    }

    /// Build a well-formed reply the way the device would.
    fn reply(codec: &PacketCodec, request: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut trailer = payload.to_vec();
        if !payload.is_empty() {
            codec.checksum.append(&mut trailer, payload);
        }
        let mut out = Vec::new();
        match codec.shape {
            ResponseShape::AckOnly => {
                out.extend_from_slice(&trailer);
                out.push(codec.ack_byte);
            }
            ResponseShape::AckPlusPayload => {
                out.push(codec.ack_byte);
                out.extend_from_slice(&trailer);
            }
            ResponseShape::EchoPlusPayload => {
                out.extend_from_slice(request);
                out.extend_from_slice(&trailer);
                out.push(codec.ack_byte);
            }
        }
        out
    }

    #[test]
    fn test_encode_set_address() -> TestResult {
        let codec = codec("bootloader")?;
        let bytes = codec.encode(&Packet::new(0xFF).with_address(0x2000))?;
        assert_eq!(bytes, [0xFF, 0x20, 0x00, 0x29, 0xF0]);
        Ok(())
    }

    #[test]
    fn test_encode_preamble_not_checksummed() -> TestResult {
        let codec = codec("xmodem")?;
        let bytes = codec.encode(&Packet::new(0x03).with_params([0x20]))?;
        assert_eq!(bytes, [0x2F, 0x03, 0x20, 0x71, 0x31]);
        Ok(())
    }

    #[test]
    fn test_encode_counted_params() -> TestResult {
        let codec = codec("bootloader")?;
        let packet = Packet::new(0x01)
            .with_params([0xDE, 0xAD, 0xBE, 0xEF])
            .counted(true);
        assert_eq!(
            codec.encode(&packet)?,
            [0x01, 0x04, 0xDE, 0xAD, 0xBE, 0xEF, 0x6B, 0xF4]
        );
        Ok(())
    }

    #[test]
    fn test_encode_rejects_oversized_counted_params() -> TestResult {
        let codec = codec("bootloader")?;
        let packet = Packet::new(0x01).with_params(vec![0u8; 256]).counted(true);
        assert_eq!(
            codec.encode(&packet),
            Err(ProtocolError::ParamsTooLong { len: 256 })
        );
        Ok(())
    }

    #[test]
    fn test_expected_lengths() -> TestResult {
        assert_eq!(codec("bootloader")?.expected_response_len(4, 0), 1);
        assert_eq!(codec("bootloader")?.expected_response_len(4, 32), 35);
        assert_eq!(codec("xmodem")?.expected_response_len(5, 16), 19);
        assert_eq!(codec("bootloader-echo")?.expected_response_len(4, 0), 5);
        assert_eq!(codec("bootloader-echo")?.expected_response_len(4, 32), 39);
        Ok(())
    }

    #[test]
    fn test_decode_every_shape() -> TestResult {
        let payload = [0x10, 0x20, 0x30, 0xC1];
        for name in ["bootloader", "bootloader-echo", "xmodem"] {
            let codec = codec(name)?;
            let request = codec.encode(&Packet::new(0x03).with_params([4]))?;
            let raw = reply(&codec, &request, &payload);
            assert_eq!(codec.decode(&raw, &request, 4)?, payload, "dialect {name}");
        }
        Ok(())
    }

    #[test]
    fn test_decode_bare_ack() -> TestResult {
        let codec = codec("bootloader")?;
        assert!(codec.decode(&[0x30], &[0xFF, 0x20, 0x00, 0x29, 0xF0], 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_echo_is_stripped_exactly() -> TestResult {
        let codec = codec("bootloader-echo")?;
        let request = codec.encode(&Packet::new(0xFF).with_address(0x2020))?;
        let mut raw = request.clone();
        raw.push(0x30);
        assert_eq!(codec.poll(&request, &raw, 0)?, Some(Vec::new()));
        // An echo alone is not an acknowledgement.
        assert_eq!(codec.poll(&request, &request, 0)?, None);
        Ok(())
    }

    #[test]
    fn test_echo_mismatch() -> TestResult {
        let codec = codec("bootloader-echo")?;
        let request = codec.encode(&Packet::new(0xFF).with_address(0x2000))?;
        let mut raw = request.clone();
        if let Some(b) = raw.get_mut(2) {
            *b ^= 0x01;
        }
        assert_eq!(
            codec.poll(&request, &raw, 0),
            Err(ProtocolError::EchoMismatch { offset: 2 })
        );
        Ok(())
    }

    #[test]
    fn test_checksum_mismatch_is_reported() -> TestResult {
        let codec = codec("bootloader")?;
        let request = codec.encode(&Packet::new(0x03).with_params([2]))?;
        let raw = [0x01, 0x02, 0x00, 0x00, 0x30];
        assert!(matches!(
            codec.decode(&raw, &request, 2),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_nack_short_circuits_pending_buffer() -> TestResult {
        let codec = codec("bootloader")?;
        let request = codec.encode(&Packet::new(0x03).with_params([32]))?;
        assert_eq!(
            codec.poll(&request, &[0x00, 0x01, 0xC1], 32),
            Err(ProtocolError::Nack { byte: 0xC1 })
        );
        Ok(())
    }

    #[test]
    fn test_nack_in_status_position() -> TestResult {
        let codec = codec("xmodem")?;
        let request = codec.encode(&Packet::new(0xFF).with_address(0x2000))?;
        assert_eq!(
            codec.decode(&[0xC2], &request, 0),
            Err(ProtocolError::Nack { byte: 0xC2 })
        );
        Ok(())
    }

    #[test]
    fn test_nack_in_echo_reply_short_circuits() -> TestResult {
        let codec = codec("bootloader-echo")?;
        let request = codec.encode(&Packet::new(0x03).with_params([32]))?;
        let mut partial = request.clone();
        partial.push(0xC1);
        assert_eq!(
            codec.poll(&request, &partial, 32),
            Err(ProtocolError::Nack { byte: 0xC1 })
        );
        Ok(())
    }

    #[test]
    fn test_nack_valued_checksum_is_not_a_rejection() -> TestResult {
        let codec = codec("bootloader")?;
        let request = codec.encode(&Packet::new(0x03).with_params([2]))?;
        let partial = [0x01, 0x02, 0xC1];
        assert_eq!(codec.poll(&request, &partial, 2)?, None);
        Ok(())
    }

    #[test]
    fn test_leading_status_scan_tolerates_nack_valued_payload() -> TestResult {
        let codec = PacketCodec::new(&ProtocolConfig {
            nack_scan: NackScan::LeadingStatus,
            ..builtin_dialect("bootloader-echo")?
        });
        let request = codec.encode(&Packet::new(0x03).with_params([4]))?;
        let mut partial = request.clone();
        partial.extend_from_slice(&[0x00, 0xC1]);
        assert_eq!(codec.poll(&request, &partial, 4)?, None);

        let full = reply(&codec, &request, &[0x00, 0xC1, 0xC2, 0x00]);
        assert_eq!(codec.poll(&request, &full, 4)?, Some(vec![0x00, 0xC1, 0xC2, 0x00]));
        Ok(())
    }

    #[test]
    fn test_unexpected_status() -> TestResult {
        let codec = codec("bootloader")?;
        assert_eq!(
            codec.decode(&[0x55], &[0xFF], 0),
            Err(ProtocolError::UnexpectedStatus {
                expected: 0x30,
                actual: 0x55
            })
        );
        Ok(())
    }

    #[test]
    fn test_truncated_decode() -> TestResult {
        let codec = codec("bootloader")?;
        assert_eq!(
            codec.decode(&[0x01, 0x02], &[0x03, 0x04], 4),
            Err(ProtocolError::Truncated {
                expected: 7,
                actual: 2
            })
        );
        Ok(())
    }

    #[test]
    fn test_stalled_classification() -> TestResult {
        let codec = codec("bootloader-echo")?;
        let request = codec.encode(&Packet::new(0x03).with_params([4]))?;
        let mut lone_nack = request.clone();
        lone_nack.push(0xC1);
        assert_eq!(
            codec.stalled(&request, &lone_nack, 4),
            ProtocolError::Nack { byte: 0xC1 }
        );
        assert_eq!(
            codec.stalled(&request, &request, 4),
            ProtocolError::Timeout {
                expected: 11,
                received: 4
            }
        );
        Ok(())
    }
}
