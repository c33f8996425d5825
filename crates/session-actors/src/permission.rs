//! Permission ledger over the host's asynchronous grant flow
//!
//! The OS answers permission requests at its own pace (a human may be
//! looking at a dialog), and devices can detach while a request is in
//! flight. The broker keeps one `PermissionState` entry per attached
//! device so that requests are never double-issued, denials stick for the
//! rest of the attach cycle, and outcomes arriving after a detach are
//! recognizably stale.

use std::collections::HashMap;
use std::sync::Arc;

use device_types::{DeviceDescriptor, DeviceId, PermissionState, UsbHost};
use tracing::debug;

/// What the broker decided when asked to secure permission for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionRequirement {
    /// Permission already in force, connect immediately
    AlreadyGranted,
    /// A request was issued; the decision arrives later as a host event
    Requested,
    /// A request is already in flight; nothing was re-issued
    Pending,
    /// Denied earlier in this attach cycle; no new request until re-attach
    Denied,
}

/// Per-device permission ledger
///
/// Entries move forward only (`Unknown → Requested → Granted | Denied`)
/// within one attach cycle; `reset` removes the entry when the device
/// detaches, so a re-attach starts over at `Unknown`.
pub struct PermissionBroker {
    host: Arc<dyn UsbHost>,
    ledger: HashMap<DeviceId, PermissionState>,
}

impl PermissionBroker {
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self {
            host,
            ledger: HashMap::new(),
        }
    }

    /// Make sure permission for `device` is granted or on its way
    ///
    /// Consults the host first: a grant from an earlier run may still be in
    /// force, in which case no request is needed at all.
    pub fn ensure(&mut self, device: &DeviceDescriptor) -> PermissionRequirement {
        if self.host.has_permission(device) {
            self.ledger.insert(device.id, PermissionState::Granted);
            return PermissionRequirement::AlreadyGranted;
        }

        let state = self
            .ledger
            .get(&device.id)
            .copied()
            .unwrap_or(PermissionState::Unknown);

        match state {
            PermissionState::Unknown => {
                self.ledger.insert(device.id, PermissionState::Requested);
                self.host.request_permission(device);
                debug!("PermissionBroker: requested permission for {}", device.id);
                PermissionRequirement::Requested
            }
            PermissionState::Requested => PermissionRequirement::Pending,
            PermissionState::Denied => PermissionRequirement::Denied,
            // Ledger says granted but the host no longer agrees; the entry
            // survives until the device detaches, so report it as granted
            // and let the open surface the failure
            PermissionState::Granted => PermissionRequirement::AlreadyGranted,
        }
    }

    /// Record a permission decision
    ///
    /// Returns `true` when the outcome was live (a request for this device
    /// was actually in flight). A `false` return means the decision is
    /// stale: the device detached in the meantime or no request was ever
    /// issued, and the caller must not act on it.
    pub fn resolve(&mut self, device_id: DeviceId, granted: bool) -> bool {
        match self.ledger.get(&device_id) {
            Some(PermissionState::Requested) => {
                let outcome = if granted {
                    PermissionState::Granted
                } else {
                    PermissionState::Denied
                };
                self.ledger.insert(device_id, outcome);
                true
            }
            other => {
                debug!(
                    "PermissionBroker: stale decision for {} (ledger: {:?})",
                    device_id, other
                );
                false
            }
        }
    }

    /// Forget everything about a device (called on detach)
    ///
    /// The next attach cycle starts over at `Unknown`, which also lifts a
    /// previous denial.
    pub fn reset(&mut self, device_id: DeviceId) {
        self.ledger.remove(&device_id);
    }

    /// Current ledger state for a device
    pub fn state(&self, device_id: DeviceId) -> PermissionState {
        self.ledger
            .get(&device_id)
            .copied()
            .unwrap_or(PermissionState::Unknown)
    }
}
