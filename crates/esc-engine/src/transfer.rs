//! Chunked transfer of the configuration region.
//!
//! Every chunk is two exchanges: set-address to the chunk start, then a read
//! or write of up to `chunk_size` bytes. The first failure stops the
//! transfer; nothing is retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use esc_config_protocol::{MemoryImage, Packet, ProtocolConfig, ProtocolError, ProtocolResult};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{EngineError, EngineResult};
use crate::link::Link;
use crate::transport::Transport;

/// Cooperative cancellation shared between a session and its owner.
///
/// Checked between chunks; an exchange already on the wire runs to
/// completion or timeout. Stays set until [`CancelToken::reset`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    AddressSet,
    TransferChunk,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Read,
    Write,
}

/// Emitted after each completed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub direction: TransferDirection,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub bytes_transferred: usize,
    pub total_bytes: usize,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.bytes_transferred.saturating_mul(100) / self.total_bytes;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// Per-transfer hooks: cancellation and optional progress reporting.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub cancel: CancelToken,
    pub progress: Option<mpsc::Sender<TransferProgress>>,
}

impl TransferOptions {
    fn report(&self, progress: TransferProgress) {
        if let Some(tx) = &self.progress
            && let Err(err) = tx.try_send(progress)
        {
            trace!(error = %err, "progress update dropped");
        }
    }
}

/// One slice of the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub address: u16,
    pub offset: usize,
    pub len: usize,
}

/// The ordered chunks covering `region_length` bytes from `base_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn new(base_address: u16, region_length: usize, chunk_size: usize) -> ProtocolResult<Self> {
        if chunk_size == 0 || chunk_size > usize::from(u8::MAX) {
            return Err(ProtocolError::InvalidConfig(format!(
                "chunk size {chunk_size} must be between 1 and 255"
            )));
        }
        let mut chunks = Vec::with_capacity(region_length.div_ceil(chunk_size));
        let mut offset = 0;
        while offset < region_length {
            let address = usize::from(base_address)
                .checked_add(offset)
                .and_then(|a| u16::try_from(a).ok())
                .ok_or_else(|| {
                    ProtocolError::InvalidConfig(format!(
                        "region of {region_length} bytes at 0x{base_address:04X} exceeds the 16-bit address space"
                    ))
                })?;
            let len = chunk_size.min(region_length - offset);
            chunks.push(Chunk {
                index: chunks.len(),
                address,
                offset,
                len,
            });
            offset += len;
        }
        Ok(Self { chunks })
    }

    pub fn from_config(config: &ProtocolConfig) -> ProtocolResult<Self> {
        Self::new(config.base_address, config.region_length, config.chunk_size)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}

/// Book-keeping for one transfer in flight.
#[derive(Debug)]
pub struct TransferSession {
    direction: TransferDirection,
    state: TransferState,
    expected: usize,
    chunks_total: usize,
    bytes_transferred: usize,
    chunks_completed: usize,
}

impl TransferSession {
    pub fn new(direction: TransferDirection, plan: &ChunkPlan, expected: usize) -> Self {
        Self {
            direction,
            state: TransferState::Idle,
            expected,
            chunks_total: plan.len(),
            bytes_transferred: 0,
            chunks_completed: 0,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    pub fn chunks_completed(&self) -> usize {
        self.chunks_completed
    }

    fn transition(&mut self, next: TransferState) {
        trace!(from = ?self.state, to = ?next, "transfer state");
        self.state = next;
    }

    fn complete_chunk(&mut self, len: usize) -> TransferProgress {
        self.bytes_transferred += len;
        self.chunks_completed += 1;
        self.transition(TransferState::TransferChunk);
        TransferProgress {
            direction: self.direction,
            chunks_completed: self.chunks_completed,
            chunks_total: self.chunks_total,
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.expected,
        }
    }

    fn cancelled(&mut self) -> EngineError {
        self.transition(TransferState::Aborted);
        warn!(
            direction = ?self.direction,
            chunks_completed = self.chunks_completed,
            bytes_transferred = self.bytes_transferred,
            "transfer cancelled"
        );
        EngineError::Cancelled {
            bytes_transferred: self.bytes_transferred,
            chunks_completed: self.chunks_completed,
        }
    }

    fn failed(&mut self, chunk: &Chunk, source: EngineError) -> EngineError {
        self.transition(TransferState::Aborted);
        warn!(
            direction = ?self.direction,
            chunk = chunk.index,
            address = format_args!("0x{:04X}", chunk.address),
            bytes_transferred = self.bytes_transferred,
            error = %source,
            "transfer aborted"
        );
        let source = Box::new(source);
        match self.direction {
            TransferDirection::Read => EngineError::IncompleteTransfer {
                bytes_received: self.bytes_transferred,
                expected: self.expected,
                chunk_index: chunk.index,
                source,
            },
            TransferDirection::Write => EngineError::WriteAborted {
                bytes_written: self.bytes_transferred,
                expected: self.expected,
                chunk_index: chunk.index,
                source,
            },
        }
    }
}

async fn set_address<T: Transport>(
    link: &mut Link<T>,
    config: &ProtocolConfig,
    address: u16,
) -> EngineResult<()> {
    link.transact(&Packet::new(config.commands.set_address).with_address(address), 0)
        .await?;
    link.settle(config.timing.command_delay()).await;
    Ok(())
}

async fn read_chunk<T: Transport>(
    link: &mut Link<T>,
    config: &ProtocolConfig,
    session: &mut TransferSession,
    chunk: &Chunk,
) -> EngineResult<Vec<u8>> {
    set_address(link, config, chunk.address).await?;
    session.transition(TransferState::AddressSet);

    let count = u8::try_from(chunk.len)
        .map_err(|_| ProtocolError::ParamsTooLong { len: chunk.len })?;
    let bytes = link
        .transact(&Packet::new(config.commands.read).with_params([count]), chunk.len)
        .await?;
    link.settle(config.timing.command_delay()).await;
    Ok(bytes)
}

async fn write_chunk<T: Transport>(
    link: &mut Link<T>,
    config: &ProtocolConfig,
    session: &mut TransferSession,
    chunk: &Chunk,
    data: &[u8],
) -> EngineResult<()> {
    set_address(link, config, chunk.address).await?;
    session.transition(TransferState::AddressSet);

    let packet = Packet::new(config.commands.write)
        .with_params(data)
        .counted(config.length_prefix);
    link.transact(&packet, 0).await?;
    link.settle(config.timing.command_delay() + config.timing.write_delay())
        .await;
    Ok(())
}

/// Read the whole configuration region, chunk by chunk.
///
/// The image is only returned when every chunk arrived; otherwise the
/// error carries how far the transfer got.
pub async fn read_region<T: Transport>(
    link: &mut Link<T>,
    config: &ProtocolConfig,
    options: &TransferOptions,
) -> EngineResult<MemoryImage> {
    let plan = ChunkPlan::from_config(config)?;
    let mut session = TransferSession::new(TransferDirection::Read, &plan, config.region_length);
    let mut bytes = Vec::with_capacity(config.region_length);

    info!(
        dialect = %config.name,
        base = format_args!("0x{:04X}", config.base_address),
        len = config.region_length,
        chunks = plan.len(),
        "reading configuration region"
    );

    for chunk in plan.iter() {
        if options.cancel.is_cancelled() {
            return Err(session.cancelled());
        }
        match read_chunk(link, config, &mut session, chunk).await {
            Ok(data) => {
                debug!(
                    chunk = chunk.index,
                    address = format_args!("0x{:04X}", chunk.address),
                    data = %hex::encode_upper(&data),
                    "chunk read"
                );
                bytes.extend_from_slice(&data);
                options.report(session.complete_chunk(data.len()));
            }
            Err(err) => return Err(session.failed(chunk, err)),
        }
    }

    let image = MemoryImage::from_bytes(bytes, config.region_length)?;
    session.transition(TransferState::Done);
    info!(len = image.len(), "configuration region read");
    Ok(image)
}

/// Write `image` over the whole configuration region, chunk by chunk.
///
/// A failure part way leaves the device holding a mix of old and new
/// bytes; the returned error says how many were written.
pub async fn write_region<T: Transport>(
    link: &mut Link<T>,
    config: &ProtocolConfig,
    image: &MemoryImage,
    options: &TransferOptions,
) -> EngineResult<()> {
    if image.len() != config.region_length {
        return Err(ProtocolError::IncompleteTransfer {
            bytes_received: image.len(),
            expected: config.region_length,
        }
        .into());
    }
    let plan = ChunkPlan::from_config(config)?;
    let mut session = TransferSession::new(TransferDirection::Write, &plan, config.region_length);

    info!(
        dialect = %config.name,
        base = format_args!("0x{:04X}", config.base_address),
        len = config.region_length,
        chunks = plan.len(),
        "writing configuration region"
    );

    for chunk in plan.iter() {
        if options.cancel.is_cancelled() {
            return Err(session.cancelled());
        }
        let data = image
            .as_bytes()
            .get(chunk.offset..chunk.offset + chunk.len)
            .ok_or(ProtocolError::OffsetOutOfRange {
                offset: chunk.offset + chunk.len,
                len: image.len(),
            })?;
        match write_chunk(link, config, &mut session, chunk, data).await {
            Ok(()) => {
                debug!(
                    chunk = chunk.index,
                    address = format_args!("0x{:04X}", chunk.address),
                    data = %hex::encode_upper(data),
                    "chunk written"
                );
                options.report(session.complete_chunk(data.len()));
            }
            Err(err) => return Err(session.failed(chunk, err)),
        }
    }

    session.transition(TransferState::Done);
    info!(len = image.len(), "configuration region written");
    Ok(())
}
