//! Decoder notifications and the sinks that receive them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Why the read loop stopped because of the underlying stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The peer closed the stream cleanly.
    Expected,
    /// The transport failed while reading.
    Unexpected,
}

impl DisconnectReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expected => "expected",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification, as delivered by [`ChannelSink`] and [`FnSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// A line was read. Always precedes the matching [`DecoderEvent::Line`].
    Activity,
    /// A decoded line.
    Line(Vec<u8>),
    /// Terminal notice; nothing follows it.
    Disconnected(DisconnectReason),
}

/// Consumer of decoder notifications.
///
/// Every method defaults to a no-op so a sink only implements the channels
/// it cares about. Calls happen on the task running the decode loop and
/// must not block.
pub trait EventSink: Send + Sync {
    /// Liveness ping, once per line read.
    fn on_activity(&self) {}

    /// A decoded line.
    fn on_line(&self, _line: &[u8]) {}

    /// The stream ended. Called at most once per decoder.
    fn on_disconnect(&self, _reason: DisconnectReason) {}
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn on_activity(&self) {
        (**self).on_activity();
    }

    fn on_line(&self, line: &[u8]) {
        (**self).on_line(line);
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        (**self).on_disconnect(reason);
    }
}

/// Forwards every notification into an unbounded mpsc channel.
///
/// Sends never block; once the receiver is dropped notifications are
/// discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DecoderEvent>,
}

impl ChannelSink {
    pub const fn new(tx: mpsc::UnboundedSender<DecoderEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DecoderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: DecoderEvent) {
        if self.tx.send(event).is_err() {
            trace!("Decoder event receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_activity(&self) {
        self.forward(DecoderEvent::Activity);
    }

    fn on_line(&self, line: &[u8]) {
        self.forward(DecoderEvent::Line(line.to_vec()));
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.forward(DecoderEvent::Disconnected(reason));
    }
}

/// Adapts a closure over [`DecoderEvent`] into an [`EventSink`].
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: Fn(DecoderEvent) + Send + Sync,
{
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(DecoderEvent) + Send + Sync,
{
    fn on_activity(&self) {
        (self.0)(DecoderEvent::Activity);
    }

    fn on_line(&self, line: &[u8]) {
        (self.0)(DecoderEvent::Line(line.to_vec()));
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        (self.0)(DecoderEvent::Disconnected(reason));
    }
}
