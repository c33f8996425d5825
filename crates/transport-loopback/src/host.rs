//! Synthetic USB host
//!
//! Test and demo stand-in for the OS side of the engine. Devices attach and
//! detach on method calls, permission dialogs resolve when the test says so
//! (or immediately, with auto-grant), and every mutation is broadcast to
//! subscribers the way a real host pushes hotplug notifications.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use device_types::{DeviceDescriptor, DeviceId, HostEvent, HostEvents, UsbHost};
use futures_channel::mpsc;
use tracing::debug;

use crate::port::PortShared;

struct AttachedDevice {
    descriptor: DeviceDescriptor,
    ports: Vec<u32>,
}

#[derive(Default)]
struct HostInner {
    devices: Vec<AttachedDevice>,
    granted: HashSet<DeviceId>,
    auto_grant: bool,
    next_id: u32,
    subscribers: Vec<mpsc::UnboundedSender<HostEvent>>,
    /// Open port per device, for `inject`
    ports: HashMap<DeviceId, Arc<PortShared>>,
}

/// Scriptable host; cloning yields another handle to the same bus
#[derive(Clone, Default)]
pub struct LoopbackHost {
    inner: Arc<Mutex<HostInner>>,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(inner: &mut HostInner, event: HostEvent) {
        inner
            .subscribers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    /// Attach a synthetic device with one serial port
    pub fn attach(&self, vendor_id: u16, product_id: u16, name: &str) -> DeviceDescriptor {
        self.attach_with_ports(vendor_id, product_id, name, vec![0])
    }

    /// Attach a device that exposes no serial ports
    pub fn attach_portless(
        &self,
        vendor_id: u16,
        product_id: u16,
        name: &str,
    ) -> DeviceDescriptor {
        self.attach_with_ports(vendor_id, product_id, name, Vec::new())
    }

    fn attach_with_ports(
        &self,
        vendor_id: u16,
        product_id: u16,
        name: &str,
        ports: Vec<u32>,
    ) -> DeviceDescriptor {
        let mut inner = self.lock();
        inner.next_id += 1;
        let descriptor = DeviceDescriptor {
            id: DeviceId(inner.next_id),
            vendor_id,
            product_id,
            display_name: name.to_string(),
        };
        inner.devices.push(AttachedDevice {
            descriptor: descriptor.clone(),
            ports,
        });
        debug!("loopback: attached {}", descriptor.label());
        Self::broadcast(&mut inner, HostEvent::Attached(descriptor.clone()));
        descriptor
    }

    /// Detach a device and revoke its grant
    ///
    /// A port opened on the device stays usable for whoever holds it; it
    /// just never sees data again. The session ends through the detach
    /// notification, not through a read failure.
    pub fn detach(&self, device_id: DeviceId) {
        let mut inner = self.lock();
        inner.devices.retain(|d| d.descriptor.id != device_id);
        inner.granted.remove(&device_id);
        inner.ports.remove(&device_id);
        debug!("loopback: detached {}", device_id);
        Self::broadcast(&mut inner, HostEvent::Detached(device_id));
    }

    /// Mark the device granted without a dialog round trip, as if a grant
    /// from an earlier run were still in force
    pub fn pre_grant(&self, device_id: DeviceId) {
        self.lock().granted.insert(device_id);
    }

    /// Resolve a pending permission request in the affirmative
    pub fn grant(&self, device_id: DeviceId) {
        let mut inner = self.lock();
        inner.granted.insert(device_id);
        Self::broadcast(
            &mut inner,
            HostEvent::PermissionDecision {
                device_id,
                granted: true,
            },
        );
    }

    /// Resolve a pending permission request in the negative
    pub fn deny(&self, device_id: DeviceId) {
        let mut inner = self.lock();
        inner.granted.remove(&device_id);
        Self::broadcast(
            &mut inner,
            HostEvent::PermissionDecision {
                device_id,
                granted: false,
            },
        );
    }

    /// Answer future permission requests immediately with a grant
    pub fn set_auto_grant(&self, auto_grant: bool) {
        self.lock().auto_grant = auto_grant;
    }

    /// Push bytes into the device's open port, as if the device sent them
    pub fn inject(&self, device_id: DeviceId, data: &[u8]) {
        let port = self.lock().ports.get(&device_id).cloned();
        match port {
            Some(port) => port.push(data),
            None => debug!("loopback: inject with no open port on {}", device_id),
        }
    }

    pub(crate) fn register_port(&self, device_id: DeviceId, port: Arc<PortShared>) {
        self.lock().ports.insert(device_id, port);
    }

    /// Ports of an attached device, `None` when detached
    pub(crate) fn device_ports(&self, device_id: DeviceId) -> Option<Vec<u32>> {
        self.lock()
            .devices
            .iter()
            .find(|d| d.descriptor.id == device_id)
            .map(|d| d.ports.clone())
    }
}

impl UsbHost for LoopbackHost {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock()
            .devices
            .iter()
            .map(|d| d.descriptor.clone())
            .collect()
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        self.lock().granted.contains(&device.id)
    }

    fn request_permission(&self, device: &DeviceDescriptor) {
        let mut inner = self.lock();
        if inner.auto_grant {
            inner.granted.insert(device.id);
            Self::broadcast(
                &mut inner,
                HostEvent::PermissionDecision {
                    device_id: device.id,
                    granted: true,
                },
            );
        } else {
            debug!(
                "loopback: permission request for {} parked until grant/deny",
                device.label()
            );
        }
    }

    fn subscribe(&self) -> HostEvents {
        let (tx, rx) = mpsc::unbounded();
        self.lock().subscribers.push(tx);
        rx
    }
}
