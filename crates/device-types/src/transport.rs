use crate::{DeviceDescriptor, DriverBinding, SerialSettings};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Open failed: {0}")]
    Open(String),
    #[error("Configuration failed: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Port not open")]
    NotOpen,
}

/// A configured serial channel to one port of a claimed device.
///
/// Handles are shared (`Arc`) between the writer side and the blocking
/// reader thread, so all I/O takes `&self`.
pub trait SerialPort: Send + Sync {
    /// Apply line settings. Called once, before the first read or write.
    fn configure(&self, settings: &SerialSettings) -> Result<(), TransportError>;

    /// Blocking read with a timeout.
    ///
    /// A timeout with no data is `Ok(0)` ("try again"), not an error.
    /// `Err` means the channel failed or ended: device gone, handle closed.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Blocking write with a timeout. Returns the number of bytes written.
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Close the channel. Idempotent. A reader blocked in `read` either
    /// wakes immediately or observes the closure at its next timeout
    /// boundary; from then on every call returns `TransportError::NotOpen`.
    fn close(&self);
}

/// Recognizes devices and opens serial channels to them.
pub trait SerialDriver: Send + Sync {
    /// Check whether this driver claims the device. Pure query, no side
    /// effects on device or session state.
    fn probe(&self, device: &DeviceDescriptor) -> Option<DriverBinding>;

    /// Claim the device and open the first port of the binding.
    ///
    /// Fails when the device is busy, already removed, or the binding
    /// exposes no ports.
    fn open(&self, binding: &DriverBinding) -> Result<Box<dyn SerialPort>, TransportError>;
}
