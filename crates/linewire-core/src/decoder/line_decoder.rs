//! The decode loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{DisconnectReason, EventSink};
use super::source::{LineSource, SourceError};
use crate::config::DecoderConfig;
use crate::escape;

/// How a call to [`LineDecoder::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderOutcome {
    /// The stream ended; the matching notice was delivered to the sinks.
    Disconnected(DisconnectReason),
    /// Stopped by [`LineDecoder::cancel`] or [`LineDecoder::dispose`].
    Cancelled,
    /// Another call to `run` owns the loop.
    AlreadyRunning,
    /// The loop already ended with a disconnection; nothing was read.
    Finished,
}

/// Pulls lines from a [`LineSource`], resolves escapes and notifies sinks.
///
/// Share it behind an `Arc` to call [`cancel`](Self::cancel) or
/// [`dispose`](Self::dispose) from another task while [`run`](Self::run) is
/// suspended in a read.
pub struct LineDecoder<S: LineSource> {
    source: Mutex<S>,
    cancel: CancellationToken,
    sinks: Vec<Arc<dyn EventSink>>,
    process_escapes: bool,
    disposed: AtomicBool,
    finished: AtomicBool,
    lines_decoded: AtomicU64,
}

impl<S: LineSource> LineDecoder<S> {
    /// Create a decoder with a fresh cancellation token.
    pub fn new(source: S) -> Self {
        Self::with_config(source, &DecoderConfig::default())
    }

    pub fn with_config(source: S, config: &DecoderConfig) -> Self {
        Self {
            source: Mutex::new(source),
            cancel: CancellationToken::new(),
            sinks: Vec::new(),
            process_escapes: config.process_escapes,
            disposed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            lines_decoded: AtomicU64::new(0),
        }
    }

    /// Register a sink. Sinks are notified in registration order.
    pub fn subscribe<E: EventSink + 'static>(&mut self, sink: E) -> &mut Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Run the decode loop until the stream ends or the decoder is
    /// cancelled.
    ///
    /// Never fails: end-of-stream and transport errors become a
    /// disconnection notice, cancellation ends silently.
    pub async fn run(&self) -> DecoderOutcome {
        if self.is_disposed() || self.cancel.is_cancelled() {
            debug!("Decode loop not started, decoder cancelled");
            return DecoderOutcome::Cancelled;
        }
        let Ok(mut source) = self.source.try_lock() else {
            warn!("Decode loop already running");
            return DecoderOutcome::AlreadyRunning;
        };
        if self.finished.load(Ordering::Acquire) {
            return DecoderOutcome::Finished;
        }

        debug!(process_escapes = self.process_escapes, "Decode loop started");
        let outcome = self.decode_loop(&mut *source).await;
        if self.is_disposed() {
            source.close();
        }
        info!(
            ?outcome,
            lines = self.lines_decoded(),
            "Decode loop finished"
        );
        outcome
    }

    async fn decode_loop(&self, source: &mut S) -> DecoderOutcome {
        while !self.cancel.is_cancelled() {
            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(SourceError::Cancelled),
                read = source.read_line(&self.cancel) => read,
            };

            let raw = match read {
                Ok(Some(raw)) => raw,
                Ok(None) => return self.disconnect(DisconnectReason::Expected),
                Err(SourceError::Io(e)) => {
                    warn!(error = %e, kind = ?e.kind(), "Line source failed");
                    return self.disconnect(DisconnectReason::Unexpected);
                }
                Err(e @ (SourceError::Cancelled | SourceError::Closed)) => {
                    debug!(reason = %e, "Line read interrupted");
                    break;
                }
            };

            // A line that raced with cancellation is dropped.
            if self.cancel.is_cancelled() {
                break;
            }

            for sink in &self.sinks {
                sink.on_activity();
            }
            let line = if self.process_escapes {
                escape::unescape(raw)
            } else {
                raw
            };
            self.lines_decoded.fetch_add(1, Ordering::Relaxed);
            for sink in &self.sinks {
                sink.on_line(&line);
            }
        }
        debug!("Decode loop cancelled");
        DecoderOutcome::Cancelled
    }

    fn disconnect(&self, reason: DisconnectReason) -> DecoderOutcome {
        if self.finished.swap(true, Ordering::AcqRel) {
            return DecoderOutcome::Finished;
        }
        match reason {
            DisconnectReason::Expected => info!(%reason, "Line source reached end of stream"),
            DisconnectReason::Unexpected => warn!(%reason, "Line source disconnected"),
        }
        for sink in &self.sinks {
            sink.on_disconnect(reason);
        }
        DecoderOutcome::Disconnected(reason)
    }
}

impl<S: LineSource> LineDecoder<S> {
    /// Request termination. Idempotent and non-blocking; the loop stops at
    /// its next check or pending read.
    pub fn cancel(&self) {
        if self.is_disposed() || self.cancel.is_cancelled() {
            return;
        }
        debug!("Decoder cancellation requested");
        self.cancel.cancel();
    }

    /// Cancel any pending read and close the source. Only the first call
    /// has an effect; it also runs on drop.
    ///
    /// If a loop holds the source, it closes the source itself once the
    /// loop has unwound.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Ok(mut source) = self.source.try_lock() {
            source.close();
        }
        debug!("Line decoder disposed");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// A clone of the decoder's cancellation token, for wiring into timers
    /// or signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of lines delivered to sinks so far.
    pub fn lines_decoded(&self) -> u64 {
        self.lines_decoded.load(Ordering::Relaxed)
    }
}

impl<S: LineSource> Drop for LineDecoder<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decoder::{ChannelSink, DecoderEvent, StreamLineSource};

    #[tokio::test]
    async fn decodes_stream_until_eof() {
        let input: &[u8] = b"HELO there\r\nDATA\\nMORE\r\n";
        let mut decoder = LineDecoder::new(StreamLineSource::new(input));
        let (sink, mut rx) = ChannelSink::channel();
        decoder.subscribe(sink);

        let outcome = decoder.run().await;
        assert_eq!(outcome, DecoderOutcome::Disconnected(DisconnectReason::Expected));
        assert_eq!(decoder.lines_decoded(), 2);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                DecoderEvent::Activity,
                DecoderEvent::Line(b"HELO there".to_vec()),
                DecoderEvent::Activity,
                DecoderEvent::Line(b"DATA\nMORE".to_vec()),
                DecoderEvent::Disconnected(DisconnectReason::Expected),
            ]
        );
    }

    #[tokio::test]
    async fn raw_mode_skips_escapes() {
        let input: &[u8] = b"a\\nb\n";
        let config = DecoderConfig {
            process_escapes: false,
            ..DecoderConfig::default()
        };
        let mut decoder = LineDecoder::with_config(StreamLineSource::new(input), &config);
        let (sink, mut rx) = ChannelSink::channel();
        decoder.subscribe(sink);
        decoder.run().await;

        assert_eq!(rx.try_recv().unwrap(), DecoderEvent::Activity);
        assert_eq!(rx.try_recv().unwrap(), DecoderEvent::Line(b"a\\nb".to_vec()));
    }

    #[tokio::test]
    async fn second_run_after_disconnect_is_finished() {
        let input: &[u8] = b"one\n";
        let mut decoder = LineDecoder::new(StreamLineSource::new(input));
        let (sink, mut rx) = ChannelSink::channel();
        decoder.subscribe(sink);

        decoder.run().await;
        assert_eq!(decoder.run().await, DecoderOutcome::Finished);

        let disconnects = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, DecoderEvent::Disconnected(_)))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn run_after_dispose_is_silent() {
        let input: &[u8] = b"never read\n";
        let mut decoder = LineDecoder::new(StreamLineSource::new(input));
        let (sink, mut rx) = ChannelSink::channel();
        decoder.subscribe(sink);

        decoder.dispose();
        decoder.cancel();
        assert!(decoder.is_disposed());
        assert_eq!(decoder.run().await, DecoderOutcome::Cancelled);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispose_closes_stream_source() {
        let input: &[u8] = b"x\n";
        let decoder = LineDecoder::new(StreamLineSource::new(input));
        decoder.cancel();
        assert!(!decoder.source.try_lock().unwrap().is_closed());

        decoder.dispose();
        assert!(decoder.source.try_lock().unwrap().is_closed());
    }

    #[tokio::test]
    async fn cancellation_token_clone_stops_decoder() {
        let input: &[u8] = b"x\n";
        let decoder = LineDecoder::new(StreamLineSource::new(input));
        decoder.cancellation_token().cancel();
        assert!(decoder.is_cancelled());
        assert_eq!(decoder.run().await, DecoderOutcome::Cancelled);
        assert_eq!(decoder.lines_decoded(), 0);
    }
}
