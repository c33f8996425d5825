use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands from UI to the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Enumerate attached devices and start a session with the first match
    Scan,

    /// Write data over the active session
    Send { data: Vec<u8> },

    /// Tear the engine down: stop the reader, close the port, unregister
    /// host observers. Terminal.
    Teardown,
}

/// Category of a feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Neutral progress note
    Info,

    /// A device matched a serial driver
    DeviceFound,

    /// Permission request issued to the OS
    PermissionRequested,

    /// The OS answered a permission request (granted or denied)
    PermissionResult,

    /// Port open and configured, session active
    Connected,

    /// Bytes arrived from the device
    DataReceived,

    /// Bytes were written to the device
    DataSent,

    /// A fault was handled
    Error,

    /// The session ended (read failure, detach)
    Disconnected,
}

impl EventKind {
    /// Short lowercase tag for log lines and the console feed
    pub fn label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::DeviceFound => "found",
            Self::PermissionRequested => "perm-req",
            Self::PermissionResult => "perm",
            Self::Connected => "connected",
            Self::DataReceived => "rx",
            Self::DataSent => "tx",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

/// One entry of the append-only session feed.
///
/// `seq` is assigned by the sink at append time and is strictly increasing
/// in append order; consumers may sort or deduplicate on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub kind: EventKind,
    pub message: String,
}

impl Event {
    pub fn new(seq: u64, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            seq,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.message)
    }
}
