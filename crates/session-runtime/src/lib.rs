//! # Session Runtime
//!
//! Runtime infrastructure for the USB serial session engine.
//!
//! This crate defines:
//! - **Actor trait**: Base trait for all actors with lifecycle methods
//! - **Channel management**: Type-safe message routing between actors
//! - **Event sink**: The append-only, insertion-ordered session feed
//! - **Supervision**: Cancellable timeouts for in-flight operations
//!
//! ## Architecture
//!
//! The runtime follows these principles:
//! - **Zero shared state**: Each actor owns its data
//! - **Message passing**: Actors communicate via typed messages
//! - **Sequential processing**: Messages are handled one at a time
//! - **Failure isolation**: Handler errors become feed entries, not crashes
//!
//! ## Example
//!
//! ```ignore
//! use session_runtime::{Actor, spawn_actor, ChannelManager};
//!
//! // Create channel infrastructure
//! let (manager, handles) = ChannelManager::new();
//!
//! // Create and spawn actors
//! let session_actor = SessionActor::new(/* ... */);
//! spawn_actor(session_actor, handles.session_rx, handles.events.clone());
//!
//! // Send commands from UI
//! manager.send_command(SessionCommand::Scan);
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod actor;
pub mod channels;
pub mod sink;
pub mod supervision;

pub use actor::{spawn_actor, Actor};
pub use channels::{ActorHandles, ChannelManager, PortMessage, SessionMessage};
pub use sink::{EventFeed, EventSink};
pub use supervision::{spawn_timeout, SupervisionConfig, TimeoutHandle};
