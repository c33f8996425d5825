/// # Session State Machine
///
/// A unified state machine for the lifetime of a USB serial session, from
/// device discovery through permission negotiation to an active channel and
/// teardown. The state machine is the single source of truth for what the
/// engine is doing; every external stimulus is validated against it before
/// anything happens.
///
/// ## State Transition Diagram
///
/// ```text
///  ┌──────┐  device found, driver matched,  ┌────────────────────┐
///  │      │  permission not yet granted     │                    │
///  │ Idle ├────────────────────────────────►│ AwaitingPermission │
///  │      │                                 │                    │
///  └──┬───┘◄──── denied / device detached ──┴─────────┬──────────┘
///     │  ▲                                            │ granted
///     │  │ fault handled                              ▼
///     │  │                                     ┌────────────┐
///     │  └──────────┬──────────────────────────┤ Connecting │◄── found,
///     │         ┌───┴────┐  open/config fail,  └─────┬──────┘    already
///     │         │ Failed │  timeout, detach          │           granted
///     │         └───▲────┘                           │ open + configure ok
///     │             │                                ▼
///     │             │ write fault             ┌────────────┐
///     │◄── read fail / device detached ───────┤   Active   │
///     │    (Disconnected event)               └────────────┘
///     │
///     │ teardown (allowed from every state)
///     ▼
///  ┌────────┐
///  │ Closed │  terminal
///  └────────┘
/// ```
///
/// ## State Invariants
///
/// - **Idle**: No session, no pending permission, ready for discovery
/// - **AwaitingPermission**: Exactly one pending permission target, no port open
/// - **Connecting**: Permission granted for the target, PortActor opening the port
/// - **Active**: Port open and configured, read loop running
/// - **Failed**: Transient bookkeeping after a fault; the fault handler
///   returns to Idle in the same dispatch
/// - **Closed**: Torn down, reader stopped, observers unregistered; terminal
///
/// ## Stale Stimuli
///
/// Completion messages and permission decisions carry the device id or the
/// connection generation they belong to. When the guard fails (state moved
/// on, different device, older generation) the stimulus is discarded without
/// a transition; only the validation below decides what a state may become.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    /// No session, waiting for a device
    Idle,

    /// Permission request issued, waiting for the decision
    AwaitingPermission,

    /// Opening and configuring the port
    Connecting,

    /// Channel established, read loop running
    Active,

    /// Fault being handled, returns to Idle immediately
    Failed,

    /// Session torn down, nothing more will happen
    Closed,
}

impl SessionState {
    /// Does this state accept a new device discovery?
    pub fn accepts_discovery(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Is a connection attempt or an open channel in flight?
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// User-facing status text
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Idle => "Waiting for device...",
            Self::AwaitingPermission => "Waiting for permission...",
            Self::Connecting => "Connecting...",
            Self::Active => "Connected",
            Self::Failed => "Connection failed",
            Self::Closed => "Closed",
        }
    }

    /// Validate if transition to new_state is allowed from current state
    /// This provides compile-time safety via exhaustive match and runtime validation
    pub fn can_transition_to(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        match (self, new_state) {
            // From Idle
            (Idle, AwaitingPermission) => true, // Driver matched, permission needed
            (Idle, Connecting) => true,         // Driver matched, already granted
            (Idle, Idle) => true,               // Idempotent (empty scan, ignored stimulus)
            (Idle, Closed) => true,             // Teardown before any session

            // From AwaitingPermission
            (AwaitingPermission, Connecting) => true, // Decision: granted
            (AwaitingPermission, Idle) => true,       // Decision: denied, or device detached
            (AwaitingPermission, Failed) => true,     // Fault while waiting
            (AwaitingPermission, Closed) => true,     // Teardown

            // From Connecting
            (Connecting, Active) => true, // Open + configure succeeded
            (Connecting, Failed) => true, // Open/configure failed, timeout, detach
            (Connecting, Closed) => true, // Teardown

            // From Active
            (Active, Idle) => true,   // Read failed / ended, or device detached
            (Active, Failed) => true, // Write fault
            (Active, Closed) => true, // Teardown

            // From Failed
            (Failed, Idle) => true,   // Fault handled, ready for a new device
            (Failed, Closed) => true, // Teardown

            // Closed is terminal; all other transitions are invalid
            _ => false,
        }
    }
}
