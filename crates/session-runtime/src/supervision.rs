/// Supervision utilities for actor operations
///
/// Provides timeout-based supervision to prevent the state machine from
/// getting stuck in long-running operations.
use crate::channels::SessionMessage;
use futures_channel::mpsc;
use session_protocol::SessionState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle to cancel a timeout operation
///
/// When dropped or explicitly cancelled, the timeout task will not send
/// the timeout message, preventing spurious timeouts after operations
/// complete.
#[derive(Clone)]
pub struct TimeoutHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimeoutHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the timeout, preventing it from firing
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        // Auto-cancel when handle is dropped
        self.cancel();
    }
}

/// Timeout configuration for supervised operations
#[derive(Debug, Clone)]
pub struct SupervisionConfig {
    /// Timeout for connection operations (port opening + configuration)
    pub connect_timeout_secs: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10, // 10s for port opening
        }
    }
}

/// Spawn a timeout task that sends a timeout message after the specified duration
///
/// Returns a TimeoutHandle that can be used to cancel the timeout. If the
/// handle is dropped or explicitly cancelled before the timeout fires, no
/// message will be sent. This prevents spurious timeout messages after
/// operations complete.
pub fn spawn_timeout(
    session_tx: mpsc::Sender<SessionMessage>,
    operation: &str,
    current_state: SessionState,
    timeout_secs: u64,
) -> TimeoutHandle {
    let operation = operation.to_string();
    let handle = TimeoutHandle::new();
    let cancel_flag = handle.cancelled.clone();

    tokio::spawn(async move {
        // Wait for timeout duration with periodic cancellation checks, so a
        // cancelled timeout task exits early instead of sleeping out the
        // full duration
        let check_interval_ms = 500;
        let total_ms = timeout_secs * 1000;
        let mut elapsed_ms = 0;
        let mut session_tx = session_tx;

        while elapsed_ms < total_ms {
            // Check if cancelled (fast exit path)
            if cancel_flag.load(Ordering::Acquire) {
                return;
            }

            // Sleep for up to check_interval_ms
            let remaining_ms = total_ms - elapsed_ms;
            let sleep_ms = remaining_ms.min(check_interval_ms);
            tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
            elapsed_ms += sleep_ms;
        }

        // Final check before sending timeout message
        if !cancel_flag.load(Ordering::Acquire) {
            let _ = session_tx.try_send(SessionMessage::OperationTimeout {
                operation,
                state: current_state,
            });
        }
    });

    handle
}
