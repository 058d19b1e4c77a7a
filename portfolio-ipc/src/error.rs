//! Channel error types

use thiserror::Error;

/// Errors raised while reading or writing framed lines
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The stream ended before a complete line arrived. `discarded` counts the
    /// bytes of a partial final line that were dropped.
    #[error("Channel closed ({discarded} bytes of partial line discarded)")]
    Closed { discarded: usize },

    /// The write half has already been shut down
    #[error("Channel write half closed")]
    WriteClosed,

    /// A frame exceeded the configured size limit
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    /// A frame was not valid UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// The caller tried to write a line that contains a newline
    #[error("Line contains an embedded newline")]
    EmbeddedNewline,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// The peer is gone; no further frames can be exchanged
    pub fn is_closed(&self) -> bool {
        match self {
            ChannelError::Closed { .. } | ChannelError::WriteClosed => true,
            ChannelError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// A single bad frame; the stream itself is still usable
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            ChannelError::FrameTooLong { .. }
                | ChannelError::InvalidUtf8
                | ChannelError::EmbeddedNewline
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_closed() {
        assert!(ChannelError::Closed { discarded: 0 }.is_closed());
        assert!(ChannelError::WriteClosed.is_closed());
        assert!(ChannelError::Io(std::io::ErrorKind::BrokenPipe.into()).is_closed());
        assert!(!ChannelError::Io(std::io::ErrorKind::PermissionDenied.into()).is_closed());
        assert!(!ChannelError::InvalidUtf8.is_closed());
    }

    #[test]
    fn test_error_frame() {
        assert!(ChannelError::FrameTooLong { limit: 8 }.is_frame_error());
        assert!(ChannelError::InvalidUtf8.is_frame_error());
        assert!(!ChannelError::Closed { discarded: 3 }.is_frame_error());
    }

    #[test]
    fn test_closed_message_reports_discarded_bytes() {
        let err = ChannelError::Closed { discarded: 5 };
        assert_eq!(err.to_string(), "Channel closed (5 bytes of partial line discarded)");
    }
}
