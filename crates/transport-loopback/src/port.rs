//! Echo port and the driver that opens it
//!
//! `LoopbackPort` behaves like hardware wired TX-to-RX: every write lands
//! in its own read buffer. Reads park the calling thread on a condvar until
//! data arrives, the timeout elapses (`Ok(0)`), or the port is closed
//! (`NotOpen`). That gives the engine's blocking read loop the same timing
//! behavior it sees on a real serial device.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use device_types::{
    DeviceDescriptor, DriverBinding, SerialDriver, SerialPort, SerialSettings, TransportError,
};
use tracing::debug;

use crate::host::LoopbackHost;

struct PortState {
    buffer: VecDeque<u8>,
    open: bool,
    settings: SerialSettings,
}

pub(crate) struct PortShared {
    state: Mutex<PortState>,
    /// Signalled on new data and on close
    wakeup: Condvar,
}

impl PortShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(PortState {
                buffer: VecDeque::new(),
                open: true,
                settings: SerialSettings::default(),
            }),
            wakeup: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append device-to-host bytes; dropped once the port is closed
    pub(crate) fn push(&self, data: &[u8]) {
        let mut state = self.lock();
        if !state.open {
            return;
        }
        state.buffer.extend(data.iter().copied());
        self.wakeup.notify_all();
    }
}

/// One endpoint of the synthetic wire
pub struct LoopbackPort {
    shared: Arc<PortShared>,
}

impl SerialPort for LoopbackPort {
    fn configure(&self, settings: &SerialSettings) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.settings = *settings;
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            if !state.buffer.is_empty() {
                let n = state.buffer.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buffer.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(0);
            }
            let (guard, _) = self
                .shared
                .wakeup
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn write(&self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.buffer.extend(data.iter().copied());
        self.shared.wakeup.notify_all();
        Ok(data.len())
    }

    fn close(&self) {
        let mut state = self.shared.lock();
        state.open = false;
        self.shared.wakeup.notify_all();
    }
}

/// Driver that claims every device the host reports
pub struct LoopbackDriver {
    host: LoopbackHost,
}

impl LoopbackDriver {
    pub fn new(host: &LoopbackHost) -> Self {
        Self { host: host.clone() }
    }
}

impl SerialDriver for LoopbackDriver {
    fn probe(&self, device: &DeviceDescriptor) -> Option<DriverBinding> {
        let ports = self.host.device_ports(device.id)?;
        Some(DriverBinding {
            device_id: device.id,
            driver: "loopback".to_string(),
            ports,
        })
    }

    fn open(&self, binding: &DriverBinding) -> Result<Box<dyn SerialPort>, TransportError> {
        if self.host.device_ports(binding.device_id).is_none() {
            return Err(TransportError::Open(format!(
                "Device {} is not attached",
                binding.device_id
            )));
        }
        if binding.primary_port().is_none() {
            return Err(TransportError::Open(
                "No ports available on device".to_string(),
            ));
        }

        let shared = Arc::new(PortShared::new());
        self.host.register_port(binding.device_id, shared.clone());
        debug!("loopback: opened port on {}", binding.device_id);
        Ok(Box::new(LoopbackPort { shared }))
    }
}
