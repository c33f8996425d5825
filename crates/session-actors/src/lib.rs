//! Session actors for USB serial device lifecycle management
//!
//! This crate contains the two actors that drive a serial session from
//! discovery to teardown, plus the helpers they are built from:
//!
//! - **SessionActor**: the single dispatch point. Owns the session state
//!   machine and decides, for every stimulus (UI command, host notification,
//!   transport completion), whether it is live or stale and what transition
//!   it causes.
//! - **PortActor**: the transport owner. Opens and configures the port,
//!   runs the blocking read loop on a background task, serializes writes,
//!   and reports completions back to the SessionActor.
//! - **PermissionBroker**: per-device permission ledger over the `UsbHost`.
//! - **DeviceRegistry**: device/driver matching over the `UsbHost` and
//!   `SerialDriver`.
//! - **Host watcher**: forwards host notifications into the session mailbox.
//! - **SessionEngine**: wiring facade used by apps and integration tests.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod constants;
pub mod engine;
pub mod permission;
pub mod port_actor;
pub mod registry;
pub mod session_actor;
pub mod watcher;

pub use engine::{EngineConfig, SessionEngine};
pub use permission::{PermissionBroker, PermissionRequirement};
pub use port_actor::{IdleReadPolicy, PortActor};
pub use registry::DeviceRegistry;
pub use session_actor::SessionActor;
pub use watcher::{WatcherHandle, spawn_host_watcher};
