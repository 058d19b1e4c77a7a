//! Inter-process communication for the solver portfolio
//!
//! This crate provides the newline-delimited framing used on every byte
//! stream of the dispatcher (client sockets, session/worker pipes and
//! worker/solver pipes) together with the client-facing line protocol.

pub mod channel;
pub mod error;
pub mod protocol;

// Re-export commonly used types
pub use channel::{FramedChannel, DEFAULT_MAX_FRAME_BYTES};
pub use error::ChannelError;
pub use protocol::{
    format_catalogue, CommandLine, FailReason, Reply, SelectionLine, DEFAULT_RACE_COMMAND,
    EXIT_COMMAND,
};
