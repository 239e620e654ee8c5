//! In-memory bootloader for tests and dry runs.
//!
//! [`SimulatedBootloader`] speaks any dialect described by a
//! [`ProtocolConfig`]: it checks request framing, executes set-address, read
//! and write against a 64 KiB address space and frames replies in the
//! dialect's response shape. Faults can be armed per command index to
//! exercise the engine's failure paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use esc_config_protocol::{CHECKSUM_LEN, ProtocolConfig, ResponseShape};
use tokio::time::Instant;
use tracing::trace;

use crate::transport::Transport;

const ADDRESS_SPACE: usize = 0x1_0000;

/// Misbehaviour to apply to the reply of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Drop the command without replying.
    Silent,
    /// Reject the command with this status byte without executing it.
    Nack(u8),
    /// Execute, then flip a bit in the reply checksum.
    CorruptChecksum,
    /// Execute, then send only the first `n` bytes of the reply.
    Truncate(usize),
    /// Execute, then replace the status byte.
    Garbage(u8),
}

#[derive(Debug)]
struct DeviceState {
    memory: Vec<u8>,
    address: u16,
    requests: Vec<Vec<u8>>,
    faults: HashMap<usize, Fault>,
    pending: VecDeque<u8>,
    ready_at: Option<Instant>,
    connected: bool,
    write_protected: bool,
}

/// Inspection and control handle shared with a [`SimulatedBootloader`].
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    state: Arc<Mutex<DeviceState>>,
}

impl DeviceHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy `len` bytes of device memory starting at `address`.
    pub fn memory(&self, address: u16, len: usize) -> Vec<u8> {
        let state = self.lock();
        let start = usize::from(address);
        state
            .memory
            .get(start..start.saturating_add(len).min(ADDRESS_SPACE))
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    pub fn poke(&self, address: u16, bytes: &[u8]) {
        let mut state = self.lock();
        let start = usize::from(address);
        let end = start.saturating_add(bytes.len()).min(ADDRESS_SPACE);
        if let Some(slot) = state.memory.get_mut(start..end) {
            let n = slot.len();
            slot.copy_from_slice(bytes.get(..n).unwrap_or_default());
        }
    }

    /// Every request written so far, in order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.lock().requests.clone()
    }

    pub fn command_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Arm a fault for the command with zero-based index `index`.
    pub fn inject(&self, index: usize, fault: Fault) {
        self.lock().faults.insert(index, fault);
    }

    /// Queue unsolicited bytes, as if left over from an earlier exchange.
    pub fn inject_noise(&self, bytes: &[u8]) {
        self.lock().pending.extend(bytes.iter().copied());
    }

    /// Acknowledge writes without storing them.
    pub fn set_write_protected(&self, protected: bool) {
        self.lock().write_protected = protected;
    }

    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn reconnect(&self) {
        self.lock().connected = true;
    }
}

/// A [`Transport`] backed by a simulated device.
#[derive(Debug)]
pub struct SimulatedBootloader {
    config: ProtocolConfig,
    handle: DeviceHandle,
    fragment_size: Option<usize>,
    latency: Duration,
}

impl SimulatedBootloader {
    pub fn new(config: ProtocolConfig) -> Self {
        let state = DeviceState {
            memory: vec![0u8; ADDRESS_SPACE],
            address: 0,
            requests: Vec::new(),
            faults: HashMap::new(),
            pending: VecDeque::new(),
            ready_at: None,
            connected: true,
            write_protected: false,
        };
        Self {
            config,
            handle: DeviceHandle {
                state: Arc::new(Mutex::new(state)),
            },
            fragment_size: None,
            latency: Duration::ZERO,
        }
    }

    /// Preload the configuration region at the dialect's base address.
    pub fn with_region(self, bytes: &[u8]) -> Self {
        self.handle.poke(self.config.base_address, bytes);
        self
    }

    /// Deliver replies at most `size` bytes per read.
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size.max(1));
        self
    }

    /// Hold each reply back for `latency` after the request is written.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }

    fn reject_byte(&self) -> u8 {
        self.config.nack_bytes.first().copied().unwrap_or(0xC1)
    }

    /// Run one request against device memory, returning the reply payload
    /// or the NACK byte to send.
    fn execute(&self, state: &mut DeviceState, request: &[u8]) -> Result<Vec<u8>, u8> {
        let reject = self.reject_byte();
        let body = match self.config.preamble {
            Some(preamble) => match request.split_first() {
                Some((&first, rest)) if first == preamble => rest,
                _ => return Err(reject),
            },
            None => request,
        };
        let split = body.len().checked_sub(CHECKSUM_LEN).ok_or(reject)?;
        let (covered, trailer) = body.split_at(split);
        let trailer = <[u8; 2]>::try_from(trailer).map_err(|_| reject)?;
        if self.config.checksum().verify(covered, trailer).is_err() {
            return Err(reject);
        }

        let (&command, args) = covered.split_first().ok_or(reject)?;
        let commands = &self.config.commands;
        if command == commands.set_address {
            let address = <[u8; 2]>::try_from(args).map_err(|_| reject)?;
            state.address = u16::from_be_bytes(address);
            Ok(Vec::new())
        } else if command == commands.read {
            let [count] = <[u8; 1]>::try_from(args).map_err(|_| reject)?;
            let start = usize::from(state.address);
            state
                .memory
                .get(start..start + usize::from(count))
                .map(<[u8]>::to_vec)
                .ok_or(reject)
        } else if command == commands.write {
            let data = if self.config.length_prefix {
                let (&count, data) = args.split_first().ok_or(reject)?;
                if usize::from(count) != data.len() {
                    return Err(reject);
                }
                data
            } else {
                args
            };
            if state.write_protected {
                return Ok(Vec::new());
            }
            let start = usize::from(state.address);
            let slot = state
                .memory
                .get_mut(start..start + data.len())
                .ok_or(reject)?;
            slot.copy_from_slice(data);
            Ok(Vec::new())
        } else {
            Err(reject)
        }
    }

    fn frame(&self, request: &[u8], payload: &[u8], status: u8, corrupt: bool) -> Vec<u8> {
        let mut trailer = payload.to_vec();
        if !payload.is_empty() {
            let mut sum = self.config.checksum().compute(payload);
            if corrupt {
                sum ^= 0x0001;
            }
            trailer.extend_from_slice(&self.config.checksum_order.to_bytes(sum));
        }

        let mut out = Vec::with_capacity(request.len() + trailer.len() + 1);
        match self.config.response_shape {
            ResponseShape::AckOnly => {
                out.extend_from_slice(&trailer);
                out.push(status);
            }
            ResponseShape::AckPlusPayload => {
                out.push(status);
                out.extend_from_slice(&trailer);
            }
            ResponseShape::EchoPlusPayload => {
                out.extend_from_slice(request);
                out.extend_from_slice(&trailer);
                out.push(status);
            }
        }
        out
    }

    fn respond(&self, state: &mut DeviceState, request: &[u8]) -> Vec<u8> {
        let index = state.requests.len();
        state.requests.push(request.to_vec());
        let fault = state.faults.remove(&index);

        let echo = || match self.config.response_shape {
            ResponseShape::EchoPlusPayload => request.to_vec(),
            ResponseShape::AckOnly | ResponseShape::AckPlusPayload => Vec::new(),
        };

        match fault {
            Some(Fault::Silent) => return Vec::new(),
            Some(Fault::Nack(byte)) => {
                let mut out = echo();
                out.push(byte);
                return out;
            }
            _ => {}
        }

        let payload = match self.execute(state, request) {
            Ok(payload) => payload,
            Err(nack) => {
                let mut out = echo();
                out.push(nack);
                return out;
            }
        };

        let status = match fault {
            Some(Fault::Garbage(byte)) => byte,
            _ => self.config.ack_byte,
        };
        let corrupt = fault == Some(Fault::CorruptChecksum);
        let mut out = self.frame(request, &payload, status, corrupt);
        if let Some(Fault::Truncate(n)) = fault {
            out.truncate(n);
        }
        out
    }
}

fn disconnected() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "simulated device disconnected")
}

#[async_trait]
impl Transport for SimulatedBootloader {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let mut state = self.handle.lock();
        if !state.connected {
            return Err(disconnected());
        }
        let reply = self.respond(&mut state, bytes);
        trace!(
            request = %hex::encode_upper(bytes),
            reply = %hex::encode_upper(&reply),
            "simulated device exchange"
        );
        state.pending.extend(reply);
        state.ready_at = Some(Instant::now() + self.latency);
        Ok(())
    }

    async fn read(&mut self, deadline: Instant) -> std::io::Result<Vec<u8>> {
        let wake_at = {
            let state = self.handle.lock();
            if !state.connected {
                return Err(disconnected());
            }
            if state.pending.is_empty() {
                deadline
            } else {
                state.ready_at.map_or(deadline, |ready| ready.min(deadline))
            }
        };
        if wake_at > Instant::now() {
            tokio::time::sleep_until(wake_at).await;
        }

        let mut state = self.handle.lock();
        if !state.connected {
            return Err(disconnected());
        }
        if state.ready_at.is_some_and(|ready| ready > Instant::now()) {
            return Ok(Vec::new());
        }
        let take = self
            .fragment_size
            .unwrap_or(usize::MAX)
            .min(state.pending.len());
        Ok(state.pending.drain(..take).collect())
    }
}
