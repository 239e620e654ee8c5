//! One request/response exchange over a [`Transport`].

use std::time::Duration;

use esc_config_protocol::{Packet, PacketCodec, ProtocolConfig, Timing};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::EngineResult;
use crate::transport::Transport;

/// Pause between reads when a transport returns early with nothing.
const IDLE_POLL: Duration = Duration::from_millis(2);

/// A transport bound to one dialect's framing and timing.
#[derive(Debug)]
pub struct Link<T> {
    transport: T,
    codec: PacketCodec,
    timing: Timing,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, config: &ProtocolConfig) -> Self {
        Self {
            transport,
            codec: PacketCodec::new(config),
            timing: config.timing,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send `packet` and wait for a reply carrying `payload_len` bytes.
    ///
    /// Stale input is discarded before the request goes out so a late reply
    /// from an earlier exchange cannot be mistaken for this one. The wait is
    /// bounded by the dialect's response timeout.
    pub async fn transact(&mut self, packet: &Packet, payload_len: usize) -> EngineResult<Vec<u8>> {
        let request = self.codec.encode(packet)?;
        self.drain().await?;

        debug!(
            request = %hex::encode_upper(&request),
            payload_len,
            "sending command"
        );
        self.transport.write(&request).await?;

        let deadline = Instant::now() + self.timing.response_timeout();
        let mut buf = Vec::new();
        loop {
            match self.codec.poll(&request, &buf, payload_len) {
                Ok(Some(payload)) => {
                    trace!(response = %hex::encode_upper(&buf), "response complete");
                    return Ok(payload);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        response = %hex::encode_upper(&buf),
                        error = %err,
                        "response rejected"
                    );
                    return Err(err.into());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let err = self.codec.stalled(&request, &buf, payload_len);
                warn!(
                    received = %hex::encode_upper(&buf),
                    error = %err,
                    "no complete response before deadline"
                );
                return Err(err.into());
            }

            let chunk = self.transport.read(deadline).await?;
            if chunk.is_empty() {
                let idle_until = (now + IDLE_POLL).min(deadline);
                if idle_until > Instant::now() {
                    tokio::time::sleep_until(idle_until).await;
                }
            } else {
                trace!(bytes = %hex::encode_upper(&chunk), "received");
                buf.extend_from_slice(&chunk);
            }
        }
    }

    /// Discard anything already buffered on the link.
    async fn drain(&mut self) -> EngineResult<()> {
        let stale = self.transport.read(Instant::now()).await?;
        if !stale.is_empty() {
            debug!(
                discarded = %hex::encode_upper(&stale),
                "discarded stale input before request"
            );
        }
        Ok(())
    }

    pub async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
