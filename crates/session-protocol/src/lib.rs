//! # Session Protocol
//!
//! Type-safe state machine and event definitions for the USB serial session
//! engine.
//!
//! This crate holds the pure protocol layer: the session state machine, the
//! user-facing commands and event feed entries, and the error type shared by
//! the actors. It has no I/O and no channel types, making it fully testable
//! on its own.
//!
//! ## Message Flow
//!
//! ```text
//! UI → SessionCommand ─┐
//! Host events ─────────┼─► SessionActor ─► PortActor
//!                      │        │
//!                      │   Event feed ─► UI
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod errors;
pub mod messages;
pub mod state;

pub use errors::SessionError;
pub use messages::{Event, EventKind, SessionCommand};
pub use state::SessionState;
