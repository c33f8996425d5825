//! Engine assembly: channels, actors, watcher
//!
//! `SessionEngine::start` wires a host and a driver into a running pair of
//! actors and seeds the first discovery scan. The embedder keeps the engine
//! value around to send commands and to consume the event feed, and calls
//! [`SessionEngine::shutdown`] to tear the whole thing down.

use std::sync::Arc;
use std::time::Duration;

use device_types::{SerialDriver, SerialSettings, UsbHost};
use session_protocol::SessionCommand;
use session_runtime::{ActorHandles, ChannelManager, EventFeed, SupervisionConfig, spawn_actor};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::engine::SHUTDOWN_GRACE_MS;
use crate::permission::PermissionBroker;
use crate::port_actor::{IdleReadPolicy, PortActor};
use crate::registry::DeviceRegistry;
use crate::session_actor::SessionActor;
use crate::watcher::spawn_host_watcher;

/// Knobs the embedder may turn; the defaults match the reference console
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub settings: SerialSettings,
    pub supervision: SupervisionConfig,
    pub idle_read: IdleReadPolicy,
}

/// A running session engine
pub struct SessionEngine {
    manager: ChannelManager,
    session_task: JoinHandle<()>,
    port_task: JoinHandle<()>,
}

impl SessionEngine {
    /// Spawn the actors against the given host and driver and scan once
    pub fn start(
        host: Arc<dyn UsbHost>,
        driver: Arc<dyn SerialDriver>,
        config: EngineConfig,
    ) -> Self {
        let (manager, handles) = ChannelManager::new();
        let ActorHandles {
            session_rx,
            port_rx,
            events,
        } = handles;

        let registry = DeviceRegistry::new(host.clone(), driver.clone());
        let broker = PermissionBroker::new(host.clone());

        let mut session_actor = SessionActor::new(
            registry,
            broker,
            config.settings,
            config.supervision,
            manager.session_sender(),
            manager.port_sender(),
            events.clone(),
        );
        session_actor.attach_watcher(spawn_host_watcher(
            host.subscribe(),
            manager.session_sender(),
        ));

        let port_actor = PortActor::new(
            driver,
            manager.session_sender(),
            events.clone(),
            config.idle_read,
        );

        let session_task = spawn_actor(session_actor, session_rx, events.clone());
        let port_task = spawn_actor(port_actor, port_rx, events);

        // Devices present before startup produce no attach notification;
        // the seed scan catches them
        if let Err(e) = manager.send_command(SessionCommand::Scan) {
            warn!("SessionEngine: initial scan not delivered: {}", e);
        }

        Self {
            manager,
            session_task,
            port_task,
        }
    }

    pub fn send_command(&self, cmd: SessionCommand) -> Result<(), String> {
        self.manager.send_command(cmd)
    }

    /// Take the event feed; valid once per engine
    pub fn take_event_feed(&mut self) -> EventFeed {
        self.manager.take_event_feed()
    }

    /// Orderly teardown
    ///
    /// Sends `Teardown`, then waits out a grace period sized to cover the
    /// port cleanup handshake so the blocking read task has exited before
    /// the runtime itself goes away. The actor tasks are aborted at the end;
    /// by then both mailboxes are quiet.
    pub async fn shutdown(self) {
        if let Err(e) = self.manager.send_command(SessionCommand::Teardown) {
            debug!("SessionEngine: teardown not delivered: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;
        self.session_task.abort();
        self.port_task.abort();
    }
}
