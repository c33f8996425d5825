//! SessionActor: the single dispatch point for the session state machine
//!
//! Every stimulus that can influence a session arrives here as a message:
//! UI commands, host notifications forwarded by the watcher, transport
//! completions from the PortActor, and supervision timeouts. Each one is
//! processed to completion before the next, so the state machine never
//! observes a half-applied transition.
//!
//! Stale stimuli are the central hazard of this design: a permission
//! decision may arrive after its device detached, a completion after a
//! teardown, a timeout after the state moved on. Handlers therefore
//! double-guard on the current state and, where applicable, the device id
//! or the generation token of the attempt. A stimulus failing its guard is
//! discarded with a debug log and causes no transition and no feed entry.

use device_types::{DeviceDescriptor, DeviceId, DriverBinding, SerialSettings};
use futures_channel::mpsc;
use session_protocol::{EventKind, SessionCommand, SessionError, SessionState};
use session_runtime::{
    Actor, EventSink, PortMessage, SessionMessage, SupervisionConfig, TimeoutHandle, spawn_timeout,
};
use tracing::debug;

use crate::permission::{PermissionBroker, PermissionRequirement};
use crate::registry::DeviceRegistry;
use crate::watcher::WatcherHandle;

/// Target of the session in flight
struct Session {
    device: DeviceDescriptor,
    binding: DriverBinding,
    /// Token stamped on the connection attempt; completions echo it back
    generation: u64,
}

/// Owner of the session state machine
///
/// At most one session exists at a time. While a session is pending or in
/// flight, further discoveries are ignored; on every fault the machine
/// returns to `Idle`, ready for the next discovery.
pub struct SessionActor {
    state: SessionState,
    registry: DeviceRegistry,
    broker: PermissionBroker,
    settings: SerialSettings,
    supervision: SupervisionConfig,
    /// Self-channel for supervision timeouts
    session_tx: mpsc::Sender<SessionMessage>,
    port_tx: mpsc::Sender<PortMessage>,
    events: EventSink,
    connect_timeout: Option<TimeoutHandle>,
    /// Target while a permission request is in flight
    pending: Option<(DeviceDescriptor, DriverBinding)>,
    session: Option<Session>,
    generation: u64,
    watcher: Option<WatcherHandle>,
}

impl SessionActor {
    pub fn new(
        registry: DeviceRegistry,
        broker: PermissionBroker,
        settings: SerialSettings,
        supervision: SupervisionConfig,
        session_tx: mpsc::Sender<SessionMessage>,
        port_tx: mpsc::Sender<PortMessage>,
        events: EventSink,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            registry,
            broker,
            settings,
            supervision,
            session_tx,
            port_tx,
            events,
            connect_timeout: None,
            pending: None,
            session: None,
            generation: 0,
            watcher: None,
        }
    }

    /// Hand over the host watcher so teardown can stop it
    pub fn attach_watcher(&mut self, watcher: WatcherHandle) {
        self.watcher = Some(watcher);
    }

    fn next_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Validated state transition
    ///
    /// Cancels any armed supervision timeout and arms a fresh one when the
    /// new state is supervised (only the connect phase is: permission may
    /// wait on a human indefinitely, and an active session is bounded by
    /// the transport timeouts themselves).
    fn transition(&mut self, new: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(new) {
            return Err(SessionError::InvalidTransition(format!(
                "{:?} → {:?}",
                self.state, new
            )));
        }

        if let Some(timeout) = self.connect_timeout.take() {
            timeout.cancel();
        }

        let old = self.state;
        self.state = new;
        debug!("SessionActor: {:?} → {:?}", old, new);

        if new == SessionState::Connecting {
            self.connect_timeout = Some(spawn_timeout(
                self.session_tx.clone(),
                "Connect",
                new,
                self.supervision.connect_timeout_secs,
            ));
        }

        Ok(())
    }

    fn send_critical_port(&mut self, msg: PortMessage) -> Result<(), SessionError> {
        self.port_tx.try_send(msg).map_err(|e| {
            if e.is_disconnected() {
                SessionError::ChannelClosed("PortActor has shut down".to_string())
            } else {
                SessionError::Other("PortActor mailbox overloaded".to_string())
            }
        })
    }

    /// Best-effort port close for paths that must make progress even when
    /// the PortActor is already gone
    fn close_port(&mut self) {
        if let Err(e) = self.send_critical_port(PortMessage::Close) {
            debug!("SessionActor: port close not delivered: {}", e);
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Result<(), SessionError> {
        match cmd {
            SessionCommand::Scan => self.handle_scan().await,
            SessionCommand::Send { data } => self.handle_send(data).await,
            SessionCommand::Teardown => self.handle_teardown().await,
        }
    }

    async fn handle_scan(&mut self) -> Result<(), SessionError> {
        if !self.state.accepts_discovery() {
            // Single session: discoveries while one is pending or in
            // flight are no-ops
            debug!("SessionActor: scan ignored in {:?}", self.state);
            return Ok(());
        }

        match self.registry.enumerate().into_iter().next() {
            None => {
                self.events
                    .append(EventKind::Info, "No USB serial device found");
                Ok(())
            }
            Some((device, binding)) => {
                self.events.append(
                    EventKind::DeviceFound,
                    format!("Found USB device: {}", device.label()),
                );
                self.begin_session(device, binding).await
            }
        }
    }

    async fn handle_send(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            debug!("SessionActor: write rejected in {:?}", self.state);
            self.events.append(EventKind::Info, "Serial port not opened");
            return Ok(());
        }
        self.send_critical_port(PortMessage::Write { data })
    }

    async fn handle_teardown(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            debug!("SessionActor: teardown of a closed session ignored");
            return Ok(());
        }

        // Stop host notifications first so nothing new arrives mid-teardown
        self.watcher = None;
        self.close_port();
        self.pending = None;
        self.session = None;
        self.transition(SessionState::Closed)
    }

    async fn handle_device_attached(
        &mut self,
        device: DeviceDescriptor,
    ) -> Result<(), SessionError> {
        if !self.state.accepts_discovery() {
            debug!(
                "SessionActor: attach of {} ignored in {:?}",
                device.id, self.state
            );
            return Ok(());
        }

        self.events.append(
            EventKind::Info,
            format!("USB device attached: {}", device.label()),
        );

        match self.registry.probe(&device) {
            None => {
                self.events.append(
                    EventKind::Info,
                    format!("No matching serial driver found for {}", device.label()),
                );
                Ok(())
            }
            Some(binding) => self.begin_session(device, binding).await,
        }
    }

    /// Start the permission/connect flow for a claimed device
    async fn begin_session(
        &mut self,
        device: DeviceDescriptor,
        binding: DriverBinding,
    ) -> Result<(), SessionError> {
        if binding.primary_port().is_none() {
            self.events
                .append(EventKind::Error, "No ports available on device");
            return Ok(());
        }

        match self.broker.ensure(&device) {
            PermissionRequirement::AlreadyGranted => self.start_connecting(device, binding),
            PermissionRequirement::Requested => {
                self.events.append(
                    EventKind::PermissionRequested,
                    format!("Requesting permission for {}", device.label()),
                );
                self.pending = Some((device, binding));
                self.transition(SessionState::AwaitingPermission)
            }
            PermissionRequirement::Pending => {
                debug!("SessionActor: permission for {} already pending", device.id);
                Ok(())
            }
            PermissionRequirement::Denied => {
                self.events.append(
                    EventKind::Info,
                    format!(
                        "Permission denied for {} - replug the device to be asked again",
                        device.label()
                    ),
                );
                Ok(())
            }
        }
    }

    /// Stamp a fresh generation and hand the target to the PortActor
    fn start_connecting(
        &mut self,
        device: DeviceDescriptor,
        binding: DriverBinding,
    ) -> Result<(), SessionError> {
        let generation = self.next_generation();
        self.transition(SessionState::Connecting)?;
        self.pending = None;
        self.session = Some(Session {
            device: device.clone(),
            binding: binding.clone(),
            generation,
        });
        self.send_critical_port(PortMessage::Open {
            device,
            binding,
            settings: self.settings,
            generation,
        })
    }

    async fn handle_permission_resolved(
        &mut self,
        device_id: DeviceId,
        granted: bool,
    ) -> Result<(), SessionError> {
        // Ledger first: a decision for a device that detached in the
        // meantime (or was never asked) is stale regardless of state
        if !self.broker.resolve(device_id, granted) {
            debug!("SessionActor: stale permission decision for {}", device_id);
            return Ok(());
        }

        if self.state != SessionState::AwaitingPermission {
            debug!(
                "SessionActor: permission decision for {} arrived in {:?}",
                device_id, self.state
            );
            return Ok(());
        }

        let Some((device, binding)) = self.pending.take() else {
            debug!("SessionActor: permission decision with no pending target");
            return Ok(());
        };
        if device.id != device_id {
            debug!(
                "SessionActor: permission decision for {} but waiting on {}",
                device_id, device.id
            );
            self.pending = Some((device, binding));
            return Ok(());
        }

        if granted {
            self.events.append(
                EventKind::PermissionResult,
                format!("Permission granted for {}", device.label()),
            );
            self.start_connecting(device, binding)
        } else {
            self.events.append(
                EventKind::PermissionResult,
                format!("Permission denied for {}", device.label()),
            );
            self.transition(SessionState::Idle)
        }
    }

    async fn handle_device_detached(&mut self, device_id: DeviceId) -> Result<(), SessionError> {
        // The ledger entry dies with the attach cycle in every case, even
        // when the detach does not touch the current session
        self.broker.reset(device_id);

        if let Some((device, _)) = self.pending.as_ref() {
            if device.id == device_id {
                let label = device.label();
                self.pending = None;
                self.events
                    .append(EventKind::Info, format!("Device detached: {}", label));
                return self.transition(SessionState::Idle);
            }
        }

        let Some(label) = self
            .session
            .as_ref()
            .filter(|s| s.device.id == device_id)
            .map(|s| s.device.label())
        else {
            debug!("SessionActor: detach of unrelated device {}", device_id);
            return Ok(());
        };

        match self.state {
            SessionState::Connecting => {
                self.close_port();
                self.events
                    .append(EventKind::Error, format!("Device detached: {}", label));
                self.session = None;
                self.transition(SessionState::Failed)?;
                self.transition(SessionState::Idle)
            }
            SessionState::Active => {
                self.close_port();
                self.events
                    .append(EventKind::Disconnected, format!("Device detached: {}", label));
                self.session = None;
                self.transition(SessionState::Idle)
            }
            _ => {
                debug!(
                    "SessionActor: detach of {} in {:?} ignored",
                    device_id, self.state
                );
                Ok(())
            }
        }
    }

    async fn handle_connection_established(
        &mut self,
        generation: u64,
    ) -> Result<(), SessionError> {
        let live = self.state == SessionState::Connecting
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation);
        if !live {
            // The port that reported this belongs to an attempt that no
            // longer exists; close it so nothing leaks
            debug!(
                "SessionActor: stale ConnectionEstablished (generation {}), closing orphan port",
                generation
            );
            self.close_port();
            return Ok(());
        }

        self.transition(SessionState::Active)?;
        if let Some(session) = self.session.as_ref() {
            debug!(
                "SessionActor: session on {} via {}",
                session.device.label(),
                session.binding.driver
            );
            self.events.append(
                EventKind::Connected,
                format!("Connected to {}", session.device.label()),
            );
        }
        Ok(())
    }

    async fn handle_connection_failed(
        &mut self,
        generation: u64,
        reason: String,
    ) -> Result<(), SessionError> {
        let live = self.state == SessionState::Connecting
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation);
        if !live {
            // Nothing to clean up: the open never produced a handle
            debug!(
                "SessionActor: stale ConnectionFailed (generation {}): {}",
                generation, reason
            );
            return Ok(());
        }

        self.events.append(EventKind::Error, reason);
        self.session = None;
        self.transition(SessionState::Failed)?;
        self.transition(SessionState::Idle)
    }

    async fn handle_connection_lost(
        &mut self,
        generation: u64,
        reason: String,
    ) -> Result<(), SessionError> {
        let live = self.state == SessionState::Active
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation);
        if !live {
            debug!(
                "SessionActor: stale ConnectionLost (generation {}): {}",
                generation, reason
            );
            return Ok(());
        }

        self.close_port();
        self.events.append(EventKind::Error, reason);
        let label = self.session.take().map(|s| s.device.label());
        self.transition(SessionState::Idle)?;
        if let Some(label) = label {
            self.events
                .append(EventKind::Disconnected, format!("Disconnected from {}", label));
        }
        Ok(())
    }

    async fn handle_operation_timeout(
        &mut self,
        operation: String,
        state: SessionState,
    ) -> Result<(), SessionError> {
        // Two-level staleness check: the timeout is only meaningful if the
        // machine is still in the state it was armed in
        if self.state != state || state != SessionState::Connecting {
            debug!(
                "SessionActor: {} timeout ignored (armed in {:?}, now {:?})",
                operation, state, self.state
            );
            return Ok(());
        }

        self.events.append(
            EventKind::Error,
            format!("{} operation timed out. Please try again.", operation),
        );
        // The open may be wedged inside the driver; make sure any handle it
        // produced gets released
        self.close_port();
        self.session = None;
        self.transition(SessionState::Failed)?;
        self.transition(SessionState::Idle)
    }
}

impl Actor for SessionActor {
    type Message = SessionMessage;

    fn name(&self) -> &'static str {
        "SessionActor"
    }

    async fn handle(&mut self, msg: SessionMessage) -> Result<(), SessionError> {
        match msg {
            SessionMessage::Command(cmd) => self.handle_command(cmd).await,
            SessionMessage::DeviceAttached { device } => self.handle_device_attached(device).await,
            SessionMessage::DeviceDetached { device_id } => {
                self.handle_device_detached(device_id).await
            }
            SessionMessage::PermissionResolved { device_id, granted } => {
                self.handle_permission_resolved(device_id, granted).await
            }
            SessionMessage::ConnectionEstablished { generation } => {
                self.handle_connection_established(generation).await
            }
            SessionMessage::ConnectionFailed { generation, reason } => {
                self.handle_connection_failed(generation, reason).await
            }
            SessionMessage::ConnectionLost { generation, reason } => {
                self.handle_connection_lost(generation, reason).await
            }
            SessionMessage::ConnectionClosed => {
                // Informational; teardown and faults have already moved on
                debug!("SessionActor: port close confirmed in {:?}", self.state);
                Ok(())
            }
            SessionMessage::OperationTimeout { operation, state } => {
                self.handle_operation_timeout(operation, state).await
            }
        }
    }

    async fn shutdown(&mut self) {
        // Mailbox closed: release anything still open
        self.watcher = None;
        if self.state.has_session() {
            let _ = self.port_tx.try_send(PortMessage::Close);
        }
    }
}
