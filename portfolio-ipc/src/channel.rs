//! Newline-delimited framing over an async reader/writer pair

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::ChannelError;

/// Default upper bound for a single frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Bidirectional line channel.
///
/// The same type frames client sockets, the session side of a worker's pipes
/// and the worker side of its solver's pipes. Bytes that have been read but do
/// not yet form a complete line stay in the channel, so a non-blocking
/// [`peek_available`](Self::peek_available) never loses data that a later
/// [`read_line`](Self::read_line) needs.
pub struct FramedChannel<R, W> {
    reader: R,
    writer: Option<W>,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to contain no newline
    scanned: usize,
    /// Dropping the remainder of an over-long frame
    discarding: bool,
    eof: bool,
    max_frame_bytes: usize,
}

impl<R, W> FramedChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a new channel with the default frame limit
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer: Some(writer),
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            eof: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Override the frame size limit
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes.max(1);
        self
    }

    /// Wait for the next complete line.
    ///
    /// Trailing spaces, tabs, CR and LF are stripped. Cancel-safe: dropping
    /// the future keeps every byte read so far.
    pub async fn read_line(&mut self) -> Result<String, ChannelError> {
        loop {
            if let Some(line) = self.take_line()? {
                return Ok(line);
            }
            if self.eof {
                return Err(self.closed());
            }
            self.fill().await?;
        }
    }

    /// Report whether a complete line can be read without waiting.
    ///
    /// Never suspends: whatever bytes are ready right now are moved into the
    /// buffer and the buffer is checked for a terminating newline.
    pub fn peek_available(&mut self) -> Result<bool, ChannelError> {
        loop {
            if self.frame_end()?.is_some() {
                return Ok(true);
            }
            if self.eof {
                return Err(self.closed());
            }
            match self.fill().now_or_never() {
                None => return Ok(false),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e),
            }
        }
    }

    /// Suspend until more bytes arrive or the stream ends.
    ///
    /// Returns immediately if a line is already buffered. Cancel-safe.
    pub async fn wait_readable(&mut self) -> Result<(), ChannelError> {
        if self.eof || self.frame_end()?.is_some() {
            return Ok(());
        }
        self.fill().await.map(|_| ())
    }

    /// Write one line followed by a single newline and flush it
    pub async fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        if line.contains('\n') {
            return Err(ChannelError::EmbeddedNewline);
        }
        let writer = self.writer.as_mut().ok_or(ChannelError::WriteClosed)?;

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down and release the write half; the peer observes end of stream
    pub async fn close_writer(&mut self) -> Result<(), ChannelError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }

    /// Number of bytes read but not yet returned as a line
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    async fn fill(&mut self) -> Result<usize, ChannelError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk).await?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buffer.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    fn take_line(&mut self) -> Result<Option<String>, ChannelError> {
        let Some(end) = self.frame_end()? else {
            return Ok(None);
        };

        let mut raw: Vec<u8> = self.buffer.drain(..=end).collect();
        self.scanned = 0;

        let keep = raw
            .iter()
            .rposition(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .map_or(0, |i| i + 1);
        raw.truncate(keep);

        String::from_utf8(raw)
            .map(Some)
            .map_err(|_| ChannelError::InvalidUtf8)
    }

    /// Position of the newline ending the next frame, enforcing the frame limit
    fn frame_end(&mut self) -> Result<Option<usize>, ChannelError> {
        loop {
            let found = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| self.scanned + i);

            match found {
                Some(end) if self.discarding => {
                    trace!("Dropping {} bytes of over-long frame", end + 1);
                    self.buffer.drain(..=end);
                    self.scanned = 0;
                    self.discarding = false;
                }
                Some(end) if end > self.max_frame_bytes => {
                    self.buffer.drain(..=end);
                    self.scanned = 0;
                    return Err(ChannelError::FrameTooLong {
                        limit: self.max_frame_bytes,
                    });
                }
                Some(end) => return Ok(Some(end)),
                None if self.discarding => {
                    self.buffer.clear();
                    self.scanned = 0;
                    return Ok(None);
                }
                None if self.buffer.len() > self.max_frame_bytes => {
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Err(ChannelError::FrameTooLong {
                        limit: self.max_frame_bytes,
                    });
                }
                None => {
                    self.scanned = self.buffer.len();
                    return Ok(None);
                }
            }
        }
    }

    fn closed(&self) -> ChannelError {
        ChannelError::Closed {
            discarded: self.buffer.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type TestChannel = FramedChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn channel_pair() -> (TestChannel, DuplexStream) {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        (FramedChannel::new(reader, writer), remote)
    }

    #[tokio::test]
    async fn test_read_line_strips_trailing_whitespace() {
        let (mut channel, mut remote) = channel_pair();
        remote.write_all(b"(check-sat) \t\r\nnext\n").await.unwrap();

        assert_eq!(channel.read_line().await.unwrap(), "(check-sat)");
        assert_eq!(channel.read_line().await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_leading_whitespace_is_kept() {
        let (mut channel, mut remote) = channel_pair();
        remote.write_all(b"  indented\n").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), "  indented");
    }

    #[tokio::test]
    async fn test_peek_on_empty_stream_does_not_block() {
        let (mut channel, _remote) = channel_pair();
        assert!(!channel.peek_available().unwrap());
    }

    #[tokio::test]
    async fn test_partial_line_survives_peek() {
        let (mut channel, mut remote) = channel_pair();

        remote.write_all(b"SA").await.unwrap();
        assert!(!channel.peek_available().unwrap());
        assert_eq!(channel.buffered_len(), 2);

        remote.write_all(b"T\n").await.unwrap();
        assert!(channel.peek_available().unwrap());
        assert_eq!(channel.read_line().await.unwrap(), "SAT");
        assert_eq!(channel.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_partial_final_line_is_reported_lost() {
        let (mut channel, mut remote) = channel_pair();
        remote.write_all(b"done\nabc").await.unwrap();
        drop(remote);

        assert_eq!(channel.read_line().await.unwrap(), "done");
        match channel.read_line().await {
            Err(ChannelError::Closed { discarded }) => assert_eq!(discarded, 3),
            other => panic!("expected closed channel, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peek_reports_closed_stream() {
        let (mut channel, remote) = channel_pair();
        drop(remote);

        // Give the peek a chance to observe EOF
        tokio::task::yield_now().await;
        match channel.peek_available() {
            Err(ChannelError::Closed { discarded }) => assert_eq!(discarded, 0),
            other => panic!("expected closed channel, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_line_is_cancel_safe() {
        let (mut channel, mut remote) = channel_pair();
        remote.write_all(b"uns").await.unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), channel.read_line()).await;
        assert!(timed_out.is_err());

        remote.write_all(b"at\n").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), "unsat");
    }

    #[tokio::test]
    async fn test_wait_readable_buffers_bytes() {
        let (mut channel, mut remote) = channel_pair();
        remote.write_all(b"sat\n").await.unwrap();

        channel.wait_readable().await.unwrap();
        assert!(channel.buffered_len() > 0);
        assert!(channel.peek_available().unwrap());
    }

    #[tokio::test]
    async fn test_write_line_appends_single_newline() {
        let (mut channel, mut remote) = channel_pair();
        channel.write_line("(push 1)").await.unwrap();

        let mut received = [0u8; 9];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"(push 1)\n");
    }

    #[tokio::test]
    async fn test_write_line_rejects_embedded_newline() {
        let (mut channel, _remote) = channel_pair();
        assert!(matches!(
            channel.write_line("a\nb").await,
            Err(ChannelError::EmbeddedNewline)
        ));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut channel, _remote) = channel_pair();
        channel.close_writer().await.unwrap();
        assert!(matches!(
            channel.write_line("ping").await,
            Err(ChannelError::WriteClosed)
        ));
    }

    #[tokio::test]
    async fn test_over_long_frame_is_rejected_and_skipped() {
        let (channel, mut remote) = channel_pair();
        let mut channel = channel.with_max_frame_bytes(8);

        remote.write_all(b"0123456789abcdef\nok\n").await.unwrap();
        assert!(matches!(
            channel.read_line().await,
            Err(ChannelError::FrameTooLong { limit: 8 })
        ));
        assert_eq!(channel.read_line().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_over_long_unterminated_frame_is_skipped_to_next_newline() {
        let (channel, mut remote) = channel_pair();
        let mut channel = channel.with_max_frame_bytes(4);

        remote.write_all(b"abcdefgh").await.unwrap();
        assert!(matches!(
            channel.read_line().await,
            Err(ChannelError::FrameTooLong { limit: 4 })
        ));

        remote.write_all(b"ij\nnext\n").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap(), "next");
    }

    #[tokio::test]
    async fn test_invalid_utf8_frame() {
        let (mut channel, mut remote) = channel_pair();
        remote.write_all(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n']).await.unwrap();

        assert!(matches!(
            channel.read_line().await,
            Err(ChannelError::InvalidUtf8)
        ));
        assert_eq!(channel.read_line().await.unwrap(), "ok");
    }
}
