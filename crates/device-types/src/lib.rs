use serde::{Deserialize, Serialize};
use std::fmt;

pub mod host;
pub mod transport;

pub use host::{HostEvent, HostEvents, UsbHost};
pub use transport::{SerialDriver, SerialPort, TransportError};

/// Opaque OS-assigned device identity.
///
/// Stable while the device stays attached; a detach/re-attach cycle may hand
/// out a fresh id. This is the only key used to correlate permission
/// outcomes, detach notifications and session guards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A USB serial device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Human-readable name for the event feed (product string or port path).
    pub display_name: String,
}

impl DeviceDescriptor {
    /// Label used in event messages: name plus vid/pid in hex.
    pub fn label(&self) -> String {
        format!(
            "{} ({:04x}:{:04x})",
            self.display_name, self.vendor_id, self.product_id
        )
    }
}

/// A device claimed by a serial driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverBinding {
    pub device_id: DeviceId,
    /// Driver label, e.g. "cdc-acm" or "loopback".
    pub driver: String,
    /// Serial ports the claimed device exposes. May be empty; opening an
    /// empty binding fails. The session always uses the first entry.
    pub ports: Vec<u32>,
}

impl DriverBinding {
    pub fn primary_port(&self) -> Option<u32> {
        self.ports.first().copied()
    }
}

/// Line configuration applied right after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for SerialSettings {
    /// 115200 8N1, the fixed line configuration of the engine.
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Per-device permission ledger entry.
///
/// Moves forward only (`Unknown -> Requested -> Granted | Denied`) within a
/// single attach cycle; a detach removes the entry, so a re-attached device
/// starts over at `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Unknown,
    Requested,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        matches!(self, PermissionState::Granted)
    }

    /// Whether a new OS request may be issued in this state.
    pub fn may_request(self) -> bool {
        matches!(self, PermissionState::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serialization() {
        let device = DeviceDescriptor {
            id: DeviceId(7),
            vendor_id: 0x0403,
            product_id: 0x6001,
            display_name: "FT232R".to_string(),
        };
        let json = serde_json::to_string(&device).unwrap();
        let deserialized: DeviceDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(device, deserialized);
    }

    #[test]
    fn test_descriptor_label() {
        let device = DeviceDescriptor {
            id: DeviceId(1),
            vendor_id: 0x0403,
            product_id: 0x6001,
            display_name: "FT232R".to_string(),
        };
        assert_eq!(device.label(), "FT232R (0403:6001)");
    }

    #[test]
    fn test_default_settings_are_115200_8n1() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.parity, Parity::None);
    }

    #[test]
    fn test_primary_port() {
        let binding = DriverBinding {
            device_id: DeviceId(3),
            driver: "cdc-acm".to_string(),
            ports: vec![0, 1],
        };
        assert_eq!(binding.primary_port(), Some(0));

        let empty = DriverBinding {
            device_id: DeviceId(3),
            driver: "cdc-acm".to_string(),
            ports: vec![],
        };
        assert_eq!(empty.primary_port(), None);
    }

    #[test]
    fn test_permission_state_requestable() {
        assert!(PermissionState::Unknown.may_request());
        assert!(!PermissionState::Requested.may_request());
        assert!(!PermissionState::Granted.may_request());
        assert!(!PermissionState::Denied.may_request());
    }
}
