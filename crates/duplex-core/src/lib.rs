//! duplex-core — Pure types and text processing for the duplex voice assistant.
//!
//! No async runtime, no I/O, no platform dependencies. Everything here is a
//! plain value type or a pure function so it can be shared between the
//! engine, the server, and any test double without pulling in tokio.

pub mod history;
pub mod text_prep;
pub mod types;
pub mod wav;
