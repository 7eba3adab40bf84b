//! Shared protocol types for revtun: the control-frame wire format, the
//! error type used across the relay, and data-channel id generation.

pub mod error;
pub mod frame;
pub mod id;

pub use error::{TunnelError, TunnelResult};
pub use frame::{ChannelMode, ControlFrame};
pub use id::generate_channel_id;
