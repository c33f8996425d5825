//! Native USB host backed by port enumeration
//!
//! Desktop platforms have no attach/detach notifications in the serialport
//! API, so hotplug is derived by polling: a background thread re-enumerates
//! about once a second and diffs the listing against the last one. Device
//! ids are handed out per attach cycle; a replug gets a fresh id.
//!
//! There is no permission dialog either. Access control is the OS user's
//! device-node permissions, so `has_permission` is always true and an
//! explicit request resolves immediately with a grant. That keeps the
//! permission flow of the engine uniform across hosts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use device_types::{DeviceDescriptor, DeviceId, HostEvent, HostEvents, UsbHost};
use futures_channel::mpsc;
use serialport::SerialPortType;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One USB serial port as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortListing {
    pub(crate) path: String,
    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,
    pub(crate) display_name: String,
}

#[derive(Default)]
struct HostInner {
    devices: Vec<DeviceDescriptor>,
    /// Device node path per id, for the driver's open
    paths: HashMap<DeviceId, String>,
    subscribers: Vec<mpsc::UnboundedSender<HostEvent>>,
    next_id: u32,
}

/// Polling host over `serialport::available_ports`
#[derive(Clone)]
pub struct NativeHost {
    inner: Arc<Mutex<HostInner>>,
}

impl NativeHost {
    /// Take an initial snapshot and start the poll thread
    pub fn start() -> Self {
        let host = Self::bare();
        if let Some(listing) = usb_ports() {
            host.ingest(listing);
        }

        let weak = Arc::downgrade(&host.inner);
        let spawned = thread::Builder::new()
            .name("usb-poll".to_string())
            .spawn(move || poll_loop(weak));
        if let Err(e) = spawned {
            warn!("hotplug polling unavailable: {}", e);
        }

        host
    }

    fn bare() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HostInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(inner: &mut HostInner, event: HostEvent) {
        inner
            .subscribers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    /// Fold a fresh listing into the device table, broadcasting the diff
    fn ingest(&self, listing: Vec<PortListing>) {
        let mut inner = self.lock();
        let events = apply_listing(&mut inner, listing);
        for event in events {
            Self::broadcast(&mut inner, event);
        }
    }

    /// Device node path of an attached device
    pub(crate) fn path_of(&self, device_id: DeviceId) -> Option<String> {
        self.lock().paths.get(&device_id).cloned()
    }
}

impl UsbHost for NativeHost {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.lock().devices.clone()
    }

    fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
        true
    }

    fn request_permission(&self, device: &DeviceDescriptor) {
        // No dialog to show; resolve the request on the spot
        let mut inner = self.lock();
        Self::broadcast(
            &mut inner,
            HostEvent::PermissionDecision {
                device_id: device.id,
                granted: true,
            },
        );
    }

    fn subscribe(&self) -> HostEvents {
        let (tx, rx) = mpsc::unbounded();
        self.lock().subscribers.push(tx);
        rx
    }
}

fn poll_loop(inner: Weak<Mutex<HostInner>>) {
    loop {
        thread::sleep(POLL_INTERVAL);
        // The host went away; stop polling
        let Some(inner) = inner.upgrade() else { break };
        if let Some(listing) = usb_ports() {
            NativeHost { inner }.ingest(listing);
        }
    }
    debug!("usb poll thread stopped");
}

/// Current USB serial ports, `None` when enumeration itself failed
///
/// A failed enumeration is not an empty bus; treating it as one would
/// detach every known device on a transient error.
fn usb_ports() -> Option<Vec<PortListing>> {
    match serialport::available_ports() {
        Ok(ports) => Some(
            ports
                .into_iter()
                .filter_map(|port| match port.port_type {
                    SerialPortType::UsbPort(usb) => Some(PortListing {
                        display_name: usb.product.unwrap_or_else(|| port.port_name.clone()),
                        path: port.port_name,
                        vendor_id: usb.vid,
                        product_id: usb.pid,
                    }),
                    _ => None,
                })
                .collect(),
        ),
        Err(e) => {
            debug!("port enumeration failed: {}", e);
            None
        }
    }
}

/// Diff a listing against the table: new paths attach, missing paths detach
fn apply_listing(inner: &mut HostInner, listing: Vec<PortListing>) -> Vec<HostEvent> {
    let mut events = Vec::new();

    let gone: Vec<DeviceId> = inner
        .paths
        .iter()
        .filter(|(_, path)| !listing.iter().any(|l| l.path == **path))
        .map(|(id, _)| *id)
        .collect();
    for id in gone {
        inner.devices.retain(|d| d.id != id);
        inner.paths.remove(&id);
        events.push(HostEvent::Detached(id));
    }

    for port in listing {
        if inner.paths.values().any(|path| *path == port.path) {
            continue;
        }
        inner.next_id += 1;
        let descriptor = DeviceDescriptor {
            id: DeviceId(inner.next_id),
            vendor_id: port.vendor_id,
            product_id: port.product_id,
            display_name: port.display_name,
        };
        inner.paths.insert(descriptor.id, port.path);
        inner.devices.push(descriptor.clone());
        events.push(HostEvent::Attached(descriptor));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(path: &str, vid: u16, pid: u16) -> PortListing {
        PortListing {
            path: path.to_string(),
            vendor_id: vid,
            product_id: pid,
            display_name: format!("dev at {}", path),
        }
    }

    #[test]
    fn test_new_paths_attach() {
        let mut inner = HostInner::default();

        let events = apply_listing(
            &mut inner,
            vec![
                listing("/dev/ttyUSB0", 0x0403, 0x6001),
                listing("/dev/ttyACM0", 0x2341, 0x0043),
            ],
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], HostEvent::Attached(d) if d.id == DeviceId(1)));
        assert!(matches!(&events[1], HostEvent::Attached(d) if d.id == DeviceId(2)));
        assert_eq!(inner.devices.len(), 2);
    }

    #[test]
    fn test_unchanged_listing_is_quiet() {
        let mut inner = HostInner::default();
        apply_listing(&mut inner, vec![listing("/dev/ttyUSB0", 0x0403, 0x6001)]);

        let events = apply_listing(&mut inner, vec![listing("/dev/ttyUSB0", 0x0403, 0x6001)]);
        assert!(events.is_empty());
        assert_eq!(inner.devices.len(), 1);
    }

    #[test]
    fn test_missing_path_detaches() {
        let mut inner = HostInner::default();
        apply_listing(
            &mut inner,
            vec![
                listing("/dev/ttyUSB0", 0x0403, 0x6001),
                listing("/dev/ttyACM0", 0x2341, 0x0043),
            ],
        );

        let events = apply_listing(&mut inner, vec![listing("/dev/ttyACM0", 0x2341, 0x0043)]);

        assert_eq!(events, vec![HostEvent::Detached(DeviceId(1))]);
        assert_eq!(inner.devices.len(), 1);
        assert!(inner.paths.get(&DeviceId(1)).is_none());
    }

    #[test]
    fn test_replug_gets_a_fresh_id() {
        let mut inner = HostInner::default();
        apply_listing(&mut inner, vec![listing("/dev/ttyUSB0", 0x0403, 0x6001)]);
        apply_listing(&mut inner, Vec::new());

        let events = apply_listing(&mut inner, vec![listing("/dev/ttyUSB0", 0x0403, 0x6001)]);

        assert!(matches!(&events[0], HostEvent::Attached(d) if d.id == DeviceId(2)));
    }

    #[test]
    fn test_permission_requests_resolve_immediately() {
        let host = NativeHost::bare();
        let mut events = host.subscribe();
        host.ingest(vec![listing("/dev/ttyUSB0", 0x0403, 0x6001)]);

        let device = match events.try_next() {
            Ok(Some(HostEvent::Attached(d))) => d,
            other => panic!("Expected Attached, got {:?}", other),
        };
        assert!(host.has_permission(&device));

        host.request_permission(&device);
        match events.try_next() {
            Ok(Some(HostEvent::PermissionDecision { device_id, granted })) => {
                assert_eq!(device_id, device.id);
                assert!(granted);
            }
            other => panic!("Expected PermissionDecision, got {:?}", other),
        }
    }
}
