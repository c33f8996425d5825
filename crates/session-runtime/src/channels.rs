use crate::sink::{EventFeed, EventSink};
use device_types::{DeviceDescriptor, DeviceId, DriverBinding, SerialSettings};
use futures_channel::mpsc;
use session_protocol::{SessionCommand, SessionState};

/// Messages handled by the SessionActor, the single dispatch point.
///
/// Everything that can influence the state machine arrives here: UI
/// commands, host notifications forwarded by the watcher, and completion
/// reports from the PortActor. Completions carry the generation token of
/// the attempt they belong to so stale ones can be discarded.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// Commands from UI
    Command(SessionCommand),

    /// Host notifications (forwarded by the host watcher)
    DeviceAttached {
        device: DeviceDescriptor,
    },
    DeviceDetached {
        device_id: DeviceId,
    },
    PermissionResolved {
        device_id: DeviceId,
        granted: bool,
    },

    /// Internal messages from the PortActor
    ConnectionEstablished {
        /// Generation token to match against the expected attempt
        generation: u64,
    },
    ConnectionFailed {
        generation: u64,
        reason: String,
    },
    /// The read loop ended with an error while the session was active
    ConnectionLost {
        generation: u64,
        reason: String,
    },
    /// Port has been fully closed (sent by PortActor after close completes)
    ConnectionClosed,

    /// Operation timeout (supervision)
    /// Sent when an operation doesn't complete within expected time
    OperationTimeout {
        operation: String,
        state: SessionState,
    },
}

/// Messages handled by the PortActor, the transport owner.
#[derive(Debug, Clone)]
pub enum PortMessage {
    Open {
        device: DeviceDescriptor,
        binding: DriverBinding,
        settings: SerialSettings,
        /// Generation token echoed back in the completion
        generation: u64,
    },
    Close,
    Write {
        data: Vec<u8>,
    },
}

/// Handles for spawning actors
pub struct ActorHandles {
    pub session_rx: mpsc::Receiver<SessionMessage>,
    pub port_rx: mpsc::Receiver<PortMessage>,
    pub events: EventSink,
}

/// Channel manager for actor communication
///
/// This manages all communication channels between actors and provides
/// a unified interface for sending commands from the UI.
pub struct ChannelManager {
    // Senders for each actor (all Clone)
    // Bounded channels prevent memory exhaustion under load
    session_tx: mpsc::Sender<SessionMessage>,
    port_tx: mpsc::Sender<PortMessage>,

    // Feed consumer (NOT cloned, replaced with dummy in Clone impl)
    // Take it with take_event_feed() before cloning
    feed: EventFeed,
}

impl Clone for ChannelManager {
    fn clone(&self) -> Self {
        // The clone gets a disconnected feed that never yields entries; the
        // real one should be taken with take_event_feed() before cloning
        let (_dummy_sink, dummy_feed) = EventSink::new();
        Self {
            session_tx: self.session_tx.clone(),
            port_tx: self.port_tx.clone(),
            feed: dummy_feed,
        }
    }
}

impl ChannelManager {
    /// Create a new channel manager and actor handles
    ///
    /// Returns (ChannelManager for UI, ActorHandles for spawning actors)
    ///
    /// Channel capacities:
    /// - session_tx: 256 - State coordination messages (low frequency)
    /// - port_tx: 512 - Port I/O control messages (moderate frequency)
    /// - feed: unbounded - appending an entry must never block or fail, so
    ///   the feed cannot apply backpressure to producers
    pub fn new() -> (Self, ActorHandles) {
        let (session_tx, session_rx) = mpsc::channel(256);
        let (port_tx, port_rx) = mpsc::channel(512);
        let (events, feed) = EventSink::new();

        let handles = ActorHandles {
            session_rx,
            port_rx,
            events,
        };

        let manager = Self {
            session_tx,
            port_tx,
            feed,
        };

        (manager, handles)
    }

    /// Send a UI command to the SessionActor
    ///
    /// All commands go through the state machine, writes included: whether a
    /// write is allowed depends on the session state, and only the
    /// SessionActor knows it.
    pub fn send_command(&self, cmd: SessionCommand) -> Result<(), String> {
        self.session_tx
            .clone()
            .try_send(SessionMessage::Command(cmd))
            .map_err(|e| {
                if e.is_full() {
                    "System overloaded: Too many pending commands. Please slow down.".to_string()
                } else {
                    "System error: Session engine unavailable.".to_string()
                }
            })
    }

    /// Take ownership of the event feed
    ///
    /// The feed should only be taken once; entries appended after a second
    /// take would be lost on the replacement dummy.
    pub fn take_event_feed(&mut self) -> EventFeed {
        let (_dummy_sink, dummy_feed) = EventSink::new();
        std::mem::replace(&mut self.feed, dummy_feed)
    }

    /// Clone senders for direct actor-to-actor communication
    ///
    /// These clones can be passed to actors for internal messaging
    pub fn session_sender(&self) -> mpsc::Sender<SessionMessage> {
        self.session_tx.clone()
    }

    pub fn port_sender(&self) -> mpsc::Sender<PortMessage> {
        self.port_tx.clone()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use futures::stream::StreamExt;
    use session_protocol::EventKind;

    #[tokio::test]
    async fn test_channel_manager_creation() {
        let (_manager, _handles) = ChannelManager::new();
        // Just verify it can be created
    }

    #[tokio::test]
    async fn test_send_scan_command() {
        let (manager, mut handles) = ChannelManager::new();

        manager.send_command(SessionCommand::Scan).unwrap();

        // Verify message was routed to the SessionActor
        let msg = handles.session_rx.next().await.unwrap();
        match msg {
            SessionMessage::Command(SessionCommand::Scan) => {}
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writes_go_through_the_state_machine() {
        let (manager, mut handles) = ChannelManager::new();

        manager
            .send_command(SessionCommand::Send {
                data: vec![1, 2, 3],
            })
            .unwrap();

        // Writes are routed to the SessionActor, not straight to the port;
        // the Active-state guard lives in the state machine
        let msg = handles.session_rx.next().await.unwrap();
        match msg {
            SessionMessage::Command(SessionCommand::Send { data }) => {
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_actor_to_actor_messaging() {
        let (manager, mut handles) = ChannelManager::new();

        // Get a clone of the port sender (as the SessionActor would)
        let mut port_tx = manager.port_sender();

        port_tx.try_send(PortMessage::Close).ok();

        // Verify the PortActor receives it
        let msg = handles.port_rx.next().await.unwrap();
        match msg {
            PortMessage::Close => {}
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_feed_round_trip() {
        let (mut manager, handles) = ChannelManager::new();

        handles.events.append(EventKind::Info, "Test");
        drop(handles);

        let mut feed = manager.take_event_feed();
        let event = feed.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Info);
        assert_eq!(event.message, "Test");
    }
}
