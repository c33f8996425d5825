//! Device/driver matching over the host snapshot

use std::sync::Arc;

use device_types::{DeviceDescriptor, DeviceId, DriverBinding, SerialDriver, UsbHost};

/// Pairs attached devices with the driver claiming them
///
/// Pure queries only: enumeration never changes device or session state,
/// and an empty result is a valid outcome, not an error.
pub struct DeviceRegistry {
    host: Arc<dyn UsbHost>,
    driver: Arc<dyn SerialDriver>,
}

impl DeviceRegistry {
    pub fn new(host: Arc<dyn UsbHost>, driver: Arc<dyn SerialDriver>) -> Self {
        Self { host, driver }
    }

    /// All attached devices the driver claims, in host enumeration order
    pub fn enumerate(&self) -> Vec<(DeviceDescriptor, DriverBinding)> {
        self.host
            .devices()
            .into_iter()
            .filter_map(|device| {
                let binding = self.driver.probe(&device)?;
                Some((device, binding))
            })
            .collect()
    }

    /// Probe a single device (used when the host reports an attach)
    pub fn probe(&self, device: &DeviceDescriptor) -> Option<DriverBinding> {
        self.driver.probe(device)
    }

    /// Re-check a device by id against the current host snapshot
    pub fn match_device(&self, device_id: DeviceId) -> Option<(DeviceDescriptor, DriverBinding)> {
        let device = self
            .host
            .devices()
            .into_iter()
            .find(|d| d.id == device_id)?;
        let binding = self.driver.probe(&device)?;
        Some((device, binding))
    }
}
