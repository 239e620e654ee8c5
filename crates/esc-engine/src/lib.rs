//! Async transfer engine for ESC bootloader configuration.
//!
//! Drives the request/response protocol from `esc-config-protocol` over any
//! [`Transport`]:
//!
//! - [`link`]: one bounded exchange with stale-input drain and pacing
//! - [`transfer`]: chunked region read/write with cancellation and progress
//! - [`session`]: the read-all / write-all surface with last-known image
//! - [`mock`]: a simulated bootloader with fault injection
//!
//! Opening and configuring the physical link is left to the caller.

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(static_mut_refs)]

pub mod error;
pub mod link;
pub mod mock;
pub mod prelude;
pub mod session;
pub mod transfer;
pub mod transport;

pub use error::{EngineError, EngineResult};
pub use link::Link;
pub use session::Session;
pub use transfer::{
    CancelToken, Chunk, ChunkPlan, TransferDirection, TransferOptions, TransferProgress,
    TransferSession, TransferState, read_region, write_region,
};
pub use transport::Transport;
