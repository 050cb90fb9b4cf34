//! Line source contract and the stream-backed implementation.

use std::future::Future;
use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DecoderConfig;

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// Errors surfaced by a [`LineSource`] read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport-level failure. The decoder reports it as an unexpected
    /// disconnection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The read was interrupted by the cancellation token.
    #[error("Read cancelled")]
    Cancelled,

    /// The source was closed and can no longer be read.
    #[error("Line source closed")]
    Closed,
}

/// Supplies one raw line per call.
///
/// `Ok(None)` is the explicit end-of-stream indicator. Implementations must
/// return promptly with [`SourceError::Cancelled`] once `cancel` fires.
pub trait LineSource: Send {
    fn read_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, SourceError>> + Send;

    /// Release the underlying transport. The owning decoder calls this when
    /// it is disposed, possibly more than once. Later reads should report
    /// [`SourceError::Closed`].
    fn close(&mut self) {}
}

/// [`LineSource`] over any tokio reader.
///
/// Lines are split on LF with an optional preceding CR stripped. A final
/// unterminated fragment is returned as a line before end-of-stream is
/// reported.
pub struct StreamLineSource<R> {
    reader: Option<BufReader<R>>,
    buf: Vec<u8>,
    max_line_bytes: usize,
    eof: bool,
}

impl<R> StreamLineSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap a reader using the default line length limit.
    pub fn new(reader: R) -> Self {
        Self::with_max_line_bytes(reader, DecoderConfig::default().max_line_bytes)
    }

    /// Wrap a reader, rejecting lines longer than `max_line_bytes`
    /// (terminator excluded).
    pub fn with_max_line_bytes(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            buf: Vec::new(),
            max_line_bytes,
            eof: false,
        }
    }

    /// Wrap a reader using the limits from `config`.
    pub fn from_config(reader: R, config: &DecoderConfig) -> Self {
        Self::with_max_line_bytes(reader, config.max_line_bytes)
    }

    /// Whether the reader has been dropped by [`LineSource::close`].
    pub const fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

impl<R> LineSource for StreamLineSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(SourceError::Closed);
        };
        if self.eof {
            return Ok(None);
        }

        let limit = self.max_line_bytes;
        let terminated = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SourceError::Cancelled),
            res = read_until_lf(reader, &mut self.buf, limit) => res?,
        };

        if terminated {
            self.buf.pop();
            if self.buf.last() == Some(&CR) {
                self.buf.pop();
            }
            if self.buf.len() > limit {
                self.buf.clear();
                return Err(line_too_long(limit).into());
            }
            return Ok(Some(std::mem::take(&mut self.buf)));
        }

        self.eof = true;
        if self.buf.is_empty() {
            Ok(None)
        } else {
            debug!(len = self.buf.len(), "Returning unterminated final line");
            Ok(Some(std::mem::take(&mut self.buf)))
        }
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Stream line source closed");
        }
        self.buf.clear();
    }
}

/// Append bytes up to and including the next LF to `buf`.
///
/// Returns `false` when the reader hit end-of-stream first. Partial data
/// stays in `buf` if the future is dropped between reads.
async fn read_until_lf<R>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(false);
        }
        let (found, used) = match available.iter().position(|&b| b == LF) {
            Some(i) => (true, i + 1),
            None => (false, available.len()),
        };
        buf.extend_from_slice(&available[..used]);
        reader.consume(used);

        if found {
            return Ok(true);
        }
        // One spare byte for a CR that may precede the LF.
        if buf.len() > limit.saturating_add(1) {
            buf.clear();
            return Err(line_too_long(limit));
        }
    }
}

fn line_too_long(limit: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line exceeds {limit} bytes"),
    )
}
