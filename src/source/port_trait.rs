//! Trait abstraction for line-oriented serial input to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::fix::FixSource;

/// Trait for reading one NMEA line at a time
#[async_trait]
pub trait SentenceStream: Send {
    /// Next complete line without its terminator, `None` at end of stream
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Longest line kept; NMEA 0183 allows 82 characters
pub const MAX_LINE_LENGTH: usize = 128;

/// Splits a byte stream into lines of at most [`MAX_LINE_LENGTH`] bytes
///
/// Partial lines survive a cancelled read, so a read cut short by a timeout
/// resumes the same line next time. A line that outgrows the cap is dropped
/// up to its newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(MAX_LINE_LENGTH),
            discarding: false,
        }
    }

    /// Bytes of the line still being received
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next line without its terminator, `None` at end of stream
    pub async fn next_line<R>(&mut self, reader: &mut R) -> io::Result<Option<String>>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                self.discarding = false;
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let (chunk, used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..end], end + 1, true),
                None => (available, available.len(), false),
            };

            if !self.discarding {
                if self.pending.len() + chunk.len() > MAX_LINE_LENGTH {
                    debug!("Dropping line longer than {} bytes", MAX_LINE_LENGTH);
                    self.pending.clear();
                    self.discarding = true;
                } else {
                    self.pending.extend_from_slice(chunk);
                }
            }
            reader.consume(used);

            if complete {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        line
    }
}

/// Wrapper around tokio_serial::SerialStream that implements SentenceStream
pub struct SerialLineStream {
    reader: BufReader<tokio_serial::SerialStream>,
    lines: LineBuffer,
}

impl std::fmt::Debug for SerialLineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLineStream")
            .field("pending", &self.lines.pending_len())
            .finish_non_exhaustive()
    }
}

impl SerialLineStream {
    /// Open a serial device 8N1 without flow control
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                BridgeError::unreachable(FixSource::Primary, format!("failed to open {}: {}", path, e))
            })?;

        Ok(Self {
            reader: BufReader::new(port),
            lines: LineBuffer::new(),
        })
    }
}

#[async_trait]
impl SentenceStream for SerialLineStream {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.lines.next_line(&mut self.reader).await
    }
}
