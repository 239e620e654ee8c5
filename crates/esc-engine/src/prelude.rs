//! Common imports for driving a device session.

pub use crate::error::{EngineError, EngineResult};
pub use crate::session::Session;
pub use crate::transfer::{CancelToken, TransferProgress};
pub use crate::transport::Transport;
pub use esc_config_protocol::{ProtocolConfig, ProtocolError, SettingsRecord, builtin_dialect};
