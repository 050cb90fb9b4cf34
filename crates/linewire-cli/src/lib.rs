//! linewire CLI Library
//!
//! Taps a line-oriented byte stream (TCP peer or stdin), decodes it with
//! `linewire-core` and writes the decoded lines to an output.

pub mod tap;
