//! `linewire` Core Library
//!
//! Shared functionality for `linewire` components:
//! - Cancellable line decoder driving a line source and event sinks
//! - Versioned backslash escape grammar
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod decoder;
pub mod error;
pub mod escape;
pub mod tracing_init;

pub use config::Config;
pub use decoder::{
    ChannelSink, DecoderEvent, DecoderOutcome, DisconnectReason, EventSink, FnSink, LineDecoder,
    LineSource, SourceError, StreamLineSource,
};
pub use error::{Error, Result};
