//! In-memory transport for tests and the demo console
//!
//! [`LoopbackHost`] plays the OS: it attaches and detaches synthetic
//! devices, resolves permission dialogs when told to (or immediately, with
//! auto-grant), and broadcasts hotplug notifications to subscribers.
//! [`LoopbackDriver`] claims every attached device and opens a
//! [`LoopbackPort`] wired TX-to-RX, so everything written to the port is
//! read back from it.
//!
//! Reads genuinely block the calling thread, with the same timeout and
//! close semantics a hardware transport has. Engine code exercised against
//! the loopback therefore sees realistic read-loop timing.

pub mod host;
pub mod port;

pub use host::LoopbackHost;
pub use port::{LoopbackDriver, LoopbackPort};
