//! Bridge from host notifications to the SessionActor mailbox
//!
//! The host pushes attach/detach/permission events on its own schedule.
//! This task rewrites them into `SessionMessage`s so the SessionActor sees
//! one ordered stream of stimuli. Forwarding uses an awaited send, so a
//! busy session mailbox backpressures the watcher instead of dropping
//! notifications.

use device_types::{HostEvent, HostEvents};
use futures::{SinkExt, StreamExt};
use futures_channel::{mpsc, oneshot};
use session_runtime::SessionMessage;
use tracing::debug;

/// Keeps the watcher task alive; dropping it stops the task even while the
/// task is parked waiting for a host event
pub struct WatcherHandle {
    _stop: oneshot::Sender<()>,
}

impl WatcherHandle {
    /// Explicit form of dropping the handle
    pub fn stop(self) {}
}

pub fn spawn_host_watcher(
    mut events: HostEvents,
    mut session_tx: mpsc::Sender<SessionMessage>,
) -> WatcherHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = events.next() => event,
                _ = &mut stop_rx => break,
            };
            // None: the host dropped its sender, no more notifications
            let Some(event) = event else { break };

            let msg = match event {
                HostEvent::Attached(device) => SessionMessage::DeviceAttached { device },
                HostEvent::Detached(device_id) => SessionMessage::DeviceDetached { device_id },
                HostEvent::PermissionDecision { device_id, granted } => {
                    SessionMessage::PermissionResolved { device_id, granted }
                }
            };
            if session_tx.send(msg).await.is_err() {
                // SessionActor mailbox closed, nothing left to notify
                break;
            }
        }
        debug!("host watcher stopped");
    });

    WatcherHandle { _stop: stop_tx }
}
