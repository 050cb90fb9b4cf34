//! Cancellable line decoder.
//!
//! A [`LineDecoder`] pulls raw lines from a [`LineSource`], resolves escapes
//! and fans the result out to registered [`EventSink`]s. It tells apart a
//! clean end-of-stream, a transport failure and a caller-initiated stop.

mod events;
mod line_decoder;
mod source;

pub use events::{ChannelSink, DecoderEvent, DisconnectReason, EventSink, FnSink};
pub use line_decoder::{DecoderOutcome, LineDecoder};
pub use source::{LineSource, SourceError, StreamLineSource};
