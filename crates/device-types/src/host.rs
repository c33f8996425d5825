use crate::{DeviceDescriptor, DeviceId};
use futures_channel::mpsc;

/// Hotplug and permission notifications from the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Attached(DeviceDescriptor),
    Detached(DeviceId),
    /// Outcome of an earlier `request_permission`. May arrive at any time,
    /// including after the device has detached; consumers must discard
    /// outcomes that no longer apply.
    PermissionDecision { device_id: DeviceId, granted: bool },
}

/// Stream of host events, one per subscriber.
pub type HostEvents = mpsc::UnboundedReceiver<HostEvent>;

/// OS facade: device enumeration and the permission dialog.
pub trait UsbHost: Send + Sync {
    /// Snapshot of attached devices in a deterministic order. Empty is a
    /// valid result, not an error.
    fn devices(&self) -> Vec<DeviceDescriptor>;

    /// Synchronous permission check. A grant from an earlier dialog run may
    /// still be in force.
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask the OS for access to the device. Fire-and-forget: the decision
    /// arrives later as [`HostEvent::PermissionDecision`], after an
    /// arbitrary delay. Must not block.
    fn request_permission(&self, device: &DeviceDescriptor);

    /// Subscribe to hotplug and permission events.
    fn subscribe(&self) -> HostEvents;
}
