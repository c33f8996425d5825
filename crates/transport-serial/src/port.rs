//! Serial port over the `serialport` crate
//!
//! One OS handle is opened per session and split with `try_clone`, so the
//! blocking reader and the writer never contend for a lock. The handle
//! cannot be revoked out from under a blocked read; `close` therefore only
//! flips a flag, and the reader observes it within one read timeout.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use device_types::{
    DataBits, DeviceDescriptor, DriverBinding, Parity, SerialSettings, StopBits, TransportError,
};
use serialport::SerialPort as _;
use tracing::debug;

use crate::host::NativeHost;

/// Placeholder rate for the open call; `configure` applies the real one
const OPEN_BAUD: u32 = 115_200;

/// Driver that claims every device the polling host reports
pub struct NativeDriver {
    host: NativeHost,
}

impl NativeDriver {
    pub fn new(host: &NativeHost) -> Self {
        Self { host: host.clone() }
    }
}

impl device_types::SerialDriver for NativeDriver {
    fn probe(&self, device: &DeviceDescriptor) -> Option<DriverBinding> {
        self.host.path_of(device.id).map(|_| DriverBinding {
            device_id: device.id,
            driver: "serialport".to_string(),
            ports: vec![0],
        })
    }

    fn open(
        &self,
        binding: &DriverBinding,
    ) -> Result<Box<dyn device_types::SerialPort>, TransportError> {
        let path = self.host.path_of(binding.device_id).ok_or_else(|| {
            TransportError::Open(format!("Device {} is not attached", binding.device_id))
        })?;
        if binding.primary_port().is_none() {
            return Err(TransportError::Open(
                "No ports available on device".to_string(),
            ));
        }

        let writer = serialport::new(path.as_str(), OPEN_BAUD)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let reader = writer
            .try_clone()
            .map_err(|e| TransportError::Open(format!("Cannot split {}: {}", path, e)))?;

        debug!("native: opened {}", path);
        Ok(Box::new(NativePort {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            open: AtomicBool::new(true),
            path,
        }))
    }
}

/// A split OS serial handle
pub struct NativePort {
    reader: Mutex<Box<dyn serialport::SerialPort>>,
    writer: Mutex<Box<dyn serialport::SerialPort>>,
    open: AtomicBool,
    path: String,
}

impl NativePort {
    fn lock<'a>(
        handle: &'a Mutex<Box<dyn serialport::SerialPort>>,
    ) -> MutexGuard<'a, Box<dyn serialport::SerialPort>> {
        handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl device_types::SerialPort for NativePort {
    fn configure(&self, settings: &SerialSettings) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        // Both handles carry their own settings cache; keep them agreeing
        for handle in [&self.reader, &self.writer] {
            let mut port = Self::lock(handle);
            apply_settings(&mut **port, settings)
                .map_err(|e| TransportError::Config(e.to_string()))?;
        }
        debug!("native: configured {} @ {} baud", self.path, settings.baud_rate);
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let mut port = Self::lock(&self.reader);
        if let Err(e) = port.set_timeout(timeout) {
            return Err(TransportError::Io(e.to_string()));
        }
        match port.read(buf) {
            // EOF means the device side is gone, not "no data yet"
            Ok(0) => Err(TransportError::Io("end of stream".to_string())),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => {
                if !self.open.load(Ordering::Acquire) {
                    return Err(TransportError::NotOpen);
                }
                Err(TransportError::Io(e.to_string()))
            }
        }
    }

    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let mut port = Self::lock(&self.writer);
        if let Err(e) = port.set_timeout(timeout) {
            return Err(TransportError::Io(e.to_string()));
        }
        port.write_all(data)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(data.len())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        debug!("native: closed {}", self.path);
        // The OS handle itself is released when the last Arc drops, after
        // the read loop has exited
    }
}

fn apply_settings(
    port: &mut dyn serialport::SerialPort,
    settings: &SerialSettings,
) -> serialport::Result<()> {
    port.set_baud_rate(settings.baud_rate)?;
    port.set_data_bits(map_data_bits(settings.data_bits))?;
    port.set_stop_bits(map_stop_bits(settings.stop_bits))?;
    port.set_parity(map_parity(settings.parity))?;
    Ok(())
}

fn map_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn map_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}
