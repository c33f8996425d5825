//! Native transport over the `serialport` crate
//!
//! [`NativeHost`] derives hotplug notifications by polling the OS port
//! listing and auto-resolves permission requests, since desktop access
//! control happens at the device node. [`NativeDriver`] opens the device's
//! port path and hands out a [`NativePort`] split into independent reader
//! and writer handles.

pub mod host;
pub mod port;

pub use host::NativeHost;
pub use port::{NativeDriver, NativePort};
