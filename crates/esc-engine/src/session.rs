//! Consumer-facing session over one connected device.

use esc_config_protocol::{
    MemoryImage, OffsetMap, ProtocolConfig, ProtocolError, SettingsRecord, decode_settings,
    encode_settings,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::link::Link;
use crate::transfer::{CancelToken, TransferOptions, TransferProgress, read_region, write_region};
use crate::transport::Transport;

/// Reads and writes the settings of one device for the lifetime of a
/// connection.
///
/// The last image read or written successfully is kept so a write only
/// changes the bytes the settings map covers. Nothing is kept across
/// sessions: dropping the session or calling [`Session::forget`] discards it.
///
/// The session never invents device contents. Writing without a prior read
/// needs an explicit [`Session::adopt_image`] or
/// [`Session::adopt_safe_defaults`] from the caller.
#[derive(Debug)]
pub struct Session<T> {
    link: Link<T>,
    config: ProtocolConfig,
    map: OffsetMap,
    image: Option<MemoryImage>,
    options: TransferOptions,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: ProtocolConfig) -> EngineResult<Self> {
        Self::with_offset_map(transport, config, OffsetMap::standard())
    }

    pub fn with_offset_map(
        transport: T,
        config: ProtocolConfig,
        map: OffsetMap,
    ) -> EngineResult<Self> {
        config.validate()?;
        map.check_fits(config.region_length)?;
        Ok(Self {
            link: Link::new(transport, &config),
            config,
            map,
            image: None,
            options: TransferOptions::default(),
        })
    }

    /// Send a [`TransferProgress`] after every chunk. Updates are dropped
    /// rather than awaited when the channel is full.
    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.options.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn offset_map(&self) -> &OffsetMap {
        &self.map
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.options.cancel.clone()
    }

    /// The last image read from or written to the device.
    pub fn image(&self) -> Option<&MemoryImage> {
        self.image.as_ref()
    }

    pub fn last_settings(&self) -> Option<SettingsRecord> {
        self.image
            .as_ref()
            .and_then(|image| decode_settings(image, &self.map).ok())
    }

    /// Drop the last-known image.
    pub fn forget(&mut self) {
        self.image = None;
    }

    /// Use `image` as the base for the next write.
    pub fn adopt_image(&mut self, image: MemoryImage) -> EngineResult<()> {
        if image.len() != self.config.region_length {
            return Err(ProtocolError::IncompleteTransfer {
                bytes_received: image.len(),
                expected: self.config.region_length,
            }
            .into());
        }
        self.image = Some(image);
        Ok(())
    }

    /// Base the next write on [`MemoryImage::safe_default`].
    pub fn adopt_safe_defaults(&mut self) -> EngineResult<()> {
        warn!("adopting safe default image; uncovered bytes will be written as zero");
        let image = MemoryImage::safe_default(&self.map, self.config.region_length)?;
        self.image = Some(image);
        Ok(())
    }

    pub fn into_transport(self) -> T {
        self.link.into_transport()
    }

    /// Read the whole region and decode it.
    ///
    /// On failure the previously known image is left untouched and no
    /// default data is substituted.
    pub async fn read_all(&mut self) -> EngineResult<SettingsRecord> {
        let image = read_region(&mut self.link, &self.config, &self.options).await?;
        let record = decode_settings(&image, &self.map)?;
        self.image = Some(image);
        Ok(record)
    }

    /// Encode `record` over the last-known image and write the region.
    ///
    /// Fails with [`EngineError::NoBaseImage`] before any traffic when there
    /// is no image to merge into. Once every chunk is acknowledged the written
    /// image becomes the last-known image, even if a verify read-back then
    /// fails. On a verify mismatch the bytes read back are kept instead.
    pub async fn write_all(&mut self, record: &SettingsRecord) -> EngineResult<()> {
        let base = self.image.as_ref().ok_or(EngineError::NoBaseImage)?;
        let next = encode_settings(base, record, &self.map)?;
        if let Some(previous) = self.last_settings() {
            info!(changed = ?previous.changed_fields(record), "writing settings");
        }

        write_region(&mut self.link, &self.config, &next, &self.options).await?;
        self.image = Some(next.clone());

        if self.config.verify_writes {
            let readback = read_region(&mut self.link, &self.config, &self.options).await?;
            if let Some(offset) = next.first_difference(&readback) {
                let err = EngineError::VerifyMismatch {
                    offset,
                    expected: next.get(offset)?,
                    actual: readback.get(offset)?,
                };
                warn!(error = %err, "write verification failed");
                self.image = Some(readback);
                return Err(err);
            }
            info!("write verified");
        }
        Ok(())
    }
}
