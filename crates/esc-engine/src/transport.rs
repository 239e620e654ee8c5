//! Byte-stream transport contract.
//!
//! The engine never opens, configures or closes a link. Callers hand it
//! something that can write bytes and read whatever has arrived.

use async_trait::async_trait;
use tokio::time::Instant;

#[async_trait]
pub trait Transport: Send {
    /// Write all of `bytes` to the link.
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Return bytes that arrive before `deadline`.
    ///
    /// May return an empty vector without error when nothing arrived. A
    /// deadline in the past asks for whatever is already buffered without
    /// waiting.
    async fn read(&mut self, deadline: Instant) -> std::io::Result<Vec<u8>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        (**self).write(bytes).await
    }

    async fn read(&mut self, deadline: Instant) -> std::io::Result<Vec<u8>> {
        (**self).read(deadline).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for &mut T {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        (**self).write(bytes).await
    }

    async fn read(&mut self, deadline: Instant) -> std::io::Result<Vec<u8>> {
        (**self).read(deadline).await
    }
}
