//! PortActor: owner of the transport handle and its read loop

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use device_types::{DeviceDescriptor, DriverBinding, SerialDriver, SerialPort, SerialSettings};
use futures_channel::{mpsc, oneshot};
use session_protocol::{EventKind, SessionError};
use session_runtime::{Actor, EventSink, PortMessage, SessionMessage};
use tracing::{debug, warn};

use crate::constants;

/// What the read loop does with consecutive read timeouts
///
/// A timed-out read (`Ok(0)`) means the device is connected but silent,
/// which is a normal condition for most serial devices. By default the
/// loop runs until it is stopped or the transport fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleReadPolicy {
    /// Keep reading forever; silence is not an error
    #[default]
    RunForever,
    /// End the session after this many consecutive timed-out reads
    DisconnectAfter(u32),
}

/// PortActor manages serial port I/O
///
/// Responsibilities:
/// - Open and configure the port for a connection attempt
/// - Spawn the blocking read loop and coordinate its shutdown
/// - Serialize write requests
/// - Report completions to the SessionActor, stamped with the generation
///   of the attempt they belong to
pub struct PortActor {
    driver: Arc<dyn SerialDriver>,
    transport: Option<Arc<dyn SerialPort>>,
    session_tx: mpsc::Sender<SessionMessage>,
    events: EventSink,
    idle_policy: IdleReadPolicy,
    /// Generation of the current attempt (assigned by the SessionActor,
    /// echoed back in every completion)
    generation: u64,
    reader_stop: Option<Arc<AtomicBool>>,
    reader_done: Option<oneshot::Receiver<()>>,
}

impl PortActor {
    pub fn new(
        driver: Arc<dyn SerialDriver>,
        session_tx: mpsc::Sender<SessionMessage>,
        events: EventSink,
        idle_policy: IdleReadPolicy,
    ) -> Self {
        Self {
            driver,
            transport: None,
            session_tx,
            events,
            idle_policy,
            generation: 0,
            reader_stop: None,
            reader_done: None,
        }
    }

    async fn handle_open(
        &mut self,
        device: DeviceDescriptor,
        binding: DriverBinding,
        settings: SerialSettings,
        generation: u64,
    ) -> Result<(), SessionError> {
        if self.transport.is_some() {
            return Err(SessionError::InvalidTransition(
                "Port already open".to_string(),
            ));
        }

        self.generation = generation;

        let port = match self.driver.open(&binding) {
            Ok(port) => port,
            Err(e) => {
                debug!("PortActor: open failed for {}: {}", device.label(), e);
                return self.send_critical_session(SessionMessage::ConnectionFailed {
                    generation,
                    reason: format!("Cannot open device: {}", e),
                });
            }
        };
        let port: Arc<dyn SerialPort> = Arc::from(port);

        if let Err(e) = port.configure(&settings) {
            port.close();
            return self.send_critical_session(SessionMessage::ConnectionFailed {
                generation,
                reason: format!("Cannot configure port: {}", e),
            });
        }

        // Reader started before the completion is reported, so data arriving
        // immediately after the open is not lost
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();
        spawn_read_loop(
            port.clone(),
            self.events.clone(),
            self.session_tx.clone(),
            generation,
            stop.clone(),
            done_tx,
            self.idle_policy,
        );

        self.transport = Some(port);
        self.reader_stop = Some(stop);
        self.reader_done = Some(done_rx);

        debug!(
            "PortActor: opened {} via {} @ {} baud",
            device.label(),
            binding.driver,
            settings.baud_rate
        );

        // CRITICAL coordination message - must reach the SessionActor,
        // otherwise the state machine never leaves Connecting
        self.send_critical_session(SessionMessage::ConnectionEstablished { generation })
    }

    async fn handle_write(&mut self, data: Vec<u8>) -> Result<(), SessionError> {
        let Some(port) = self.transport.as_ref() else {
            // Expected state, not an error: the session may have ended
            // between the command and its processing
            debug!("PortActor: ignoring write, port not open");
            self.events.append(EventKind::Info, "Serial port not opened");
            return Ok(());
        };

        let port = port.clone();
        let text = String::from_utf8_lossy(&data).into_owned();
        let timeout = Duration::from_millis(constants::port::WRITE_TIMEOUT_MS);
        let result = tokio::task::spawn_blocking(move || port.write(&data, timeout)).await;

        match result {
            Ok(Ok(_written)) => {
                self.events
                    .append(EventKind::DataSent, format!("Sent: {}", text));
                Ok(())
            }
            Ok(Err(e)) => {
                debug!("PortActor: write failed: {}", e);
                self.send_critical_session(SessionMessage::ConnectionLost {
                    generation: self.generation,
                    reason: format!("Write error: {}", e),
                })
            }
            Err(_) => self.send_critical_session(SessionMessage::ConnectionLost {
                generation: self.generation,
                reason: "Write error: worker task failed".to_string(),
            }),
        }
    }

    /// Close the port and wait for the read loop to wind down
    ///
    /// Idempotent: closing an already-closed port still reports
    /// `ConnectionClosed` and succeeds.
    async fn handle_close(&mut self) -> Result<(), SessionError> {
        if let Some(stop) = self.reader_stop.take() {
            stop.store(true, Ordering::Release);
        }
        if let Some(port) = self.transport.take() {
            // close() wakes a blocked reader where the transport supports
            // it; otherwise the loop notices the stop flag within one read
            // timeout
            port.close();
            debug!("PortActor: port closed");
        }

        if let Some(done_rx) = self.reader_done.take() {
            let cleanup = Duration::from_millis(constants::port::CLEANUP_TIMEOUT_MS);
            match tokio::time::timeout(cleanup, done_rx).await {
                Ok(Ok(())) => debug!("PortActor: read loop cleanup confirmed"),
                Ok(Err(_)) => debug!("PortActor: read loop ended without signal"),
                Err(_) => warn!(
                    "PortActor: read loop cleanup not confirmed within {}ms",
                    constants::port::CLEANUP_TIMEOUT_MS
                ),
            }
        }

        // Close completion is informational; the state machine has already
        // moved on by the time it arrives
        if self
            .session_tx
            .try_send(SessionMessage::ConnectionClosed)
            .is_err()
        {
            debug!("PortActor: session mailbox gone, close notification dropped");
        }

        Ok(())
    }

    fn send_critical_session(&mut self, msg: SessionMessage) -> Result<(), SessionError> {
        self.session_tx.try_send(msg).map_err(|e| {
            if e.is_disconnected() {
                SessionError::ChannelClosed("SessionActor has shut down".to_string())
            } else {
                SessionError::Other("SessionActor mailbox overloaded".to_string())
            }
        })
    }
}

impl Actor for PortActor {
    type Message = PortMessage;

    fn name(&self) -> &'static str {
        "PortActor"
    }

    async fn handle(&mut self, msg: PortMessage) -> Result<(), SessionError> {
        match msg {
            PortMessage::Open {
                device,
                binding,
                settings,
                generation,
            } => self.handle_open(device, binding, settings, generation).await,
            PortMessage::Write { data } => self.handle_write(data).await,
            PortMessage::Close => self.handle_close().await,
        }
    }

    async fn shutdown(&mut self) {
        // Release the port on shutdown so the device is usable afterwards
        let _ = self.handle_close().await;
    }
}

/// Spawn the blocking read loop for an open port
///
/// Runs on the blocking thread pool; exactly one loop exists per open
/// port. Data goes straight to the event feed, failures go to the
/// SessionActor as `ConnectionLost` with the generation of the attempt.
fn spawn_read_loop(
    port: Arc<dyn SerialPort>,
    events: EventSink,
    session_tx: mpsc::Sender<SessionMessage>,
    generation: u64,
    stop: Arc<AtomicBool>,
    done_tx: oneshot::Sender<()>,
    policy: IdleReadPolicy,
) {
    tokio::task::spawn_blocking(move || {
        run_read_loop(port, events, session_tx, generation, stop, policy);
        // Signal completion so handle_close can wait for the cleanup
        let _ = done_tx.send(());
        debug!("read loop: exited");
    });
}

fn run_read_loop(
    port: Arc<dyn SerialPort>,
    events: EventSink,
    mut session_tx: mpsc::Sender<SessionMessage>,
    generation: u64,
    stop: Arc<AtomicBool>,
    policy: IdleReadPolicy,
) {
    let mut buf = vec![0u8; constants::port::READ_BUFFER_BYTES];
    let timeout = Duration::from_millis(constants::port::READ_TIMEOUT_MS);
    let mut idle_reads: u32 = 0;

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        match port.read(&mut buf, timeout) {
            Ok(0) => {
                // Timed out with no data; a silent device is normal
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if let IdleReadPolicy::DisconnectAfter(limit) = policy {
                    idle_reads += 1;
                    if idle_reads >= limit {
                        let _ = session_tx.try_send(SessionMessage::ConnectionLost {
                            generation,
                            reason: format!("No data received in {} reads", limit),
                        });
                        break;
                    }
                }
            }
            Ok(n) => {
                // Bytes that arrived while a close was in flight are dropped:
                // nothing may be published after the session ended
                if stop.load(Ordering::Acquire) {
                    break;
                }
                idle_reads = 0;
                if let Some(bytes) = buf.get(..n) {
                    events.append(
                        EventKind::DataReceived,
                        format!("Received: {}", String::from_utf8_lossy(bytes)),
                    );
                }
            }
            Err(e) => {
                if stop.load(Ordering::Acquire) {
                    // Expected cancellation: the port was closed under us
                    break;
                }
                debug!("read loop: read failed: {}", e);
                let _ = session_tx.try_send(SessionMessage::ConnectionLost {
                    generation,
                    reason: format!("Read error: {}", e),
                });
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use device_types::{DeviceId, TransportError};
    use futures::stream::StreamExt;
    use session_protocol::Event;
    use session_runtime::EventFeed;
    use transport_loopback::{LoopbackDriver, LoopbackHost};

    /// Port stub for tests that only exercise actor bookkeeping
    struct NullPort;

    impl SerialPort for NullPort {
        fn configure(&self, _settings: &SerialSettings) -> Result<(), TransportError> {
            Ok(())
        }

        fn read(&self, _buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
            Ok(0)
        }

        fn write(&self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
            Ok(data.len())
        }

        fn close(&self) {}
    }

    fn create_test_actor() -> (
        PortActor,
        LoopbackHost,
        mpsc::Receiver<SessionMessage>,
        EventFeed,
    ) {
        let host = LoopbackHost::new();
        let driver = Arc::new(LoopbackDriver::new(&host));
        let (session_tx, session_rx) = mpsc::channel(100);
        let (events, feed) = EventSink::new();

        let actor = PortActor::new(driver, session_tx, events, IdleReadPolicy::RunForever);
        (actor, host, session_rx, feed)
    }

    fn attach_and_bind(host: &LoopbackHost) -> (DeviceDescriptor, DriverBinding) {
        let device = host.attach(0x0403, 0x6001, "FT232R");
        let binding = DriverBinding {
            device_id: device.id,
            driver: "loopback".to_string(),
            ports: vec![0],
        };
        (device, binding)
    }

    async fn next_event(feed: &mut EventFeed) -> Event {
        tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (actor, _host, _session_rx, _feed) = create_test_actor();
        assert!(actor.transport.is_none());
    }

    #[tokio::test]
    async fn test_open_reports_established() {
        let (mut actor, host, mut session_rx, _feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);

        actor
            .handle_open(device, binding, SerialSettings::default(), 7)
            .await
            .unwrap();
        assert!(actor.transport.is_some());

        match session_rx.next().await.unwrap() {
            SessionMessage::ConnectionEstablished { generation } => assert_eq!(generation, 7),
            other => panic!("Wrong message: {:?}", other),
        }

        actor.handle_close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_unknown_device_reports_failed() {
        let (mut actor, host, mut session_rx, _feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);
        host.detach(device.id);

        actor
            .handle_open(device, binding, SerialSettings::default(), 3)
            .await
            .unwrap();
        assert!(actor.transport.is_none());

        match session_rx.next().await.unwrap() {
            SessionMessage::ConnectionFailed { generation, reason } => {
                assert_eq!(generation, 3);
                assert!(reason.starts_with("Cannot open device"), "{}", reason);
            }
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cannot_open_twice() {
        let (mut actor, host, _session_rx, _feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);

        actor.transport = Some(Arc::new(NullPort));
        let result = actor
            .handle_open(device, binding, SerialSettings::default(), 1)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_when_closed_is_dropped() {
        let (mut actor, _host, _session_rx, mut feed) = create_test_actor();

        actor.handle_write(b"hello".to_vec()).await.unwrap();

        let event = next_event(&mut feed).await;
        assert_eq!(event.kind, EventKind::Info);
        assert_eq!(event.message, "Serial port not opened");
    }

    #[tokio::test]
    async fn test_write_emits_sent_event() {
        let (mut actor, _host, _session_rx, mut feed) = create_test_actor();
        actor.transport = Some(Arc::new(NullPort));

        actor.handle_write(b"hello".to_vec()).await.unwrap();

        let event = next_event(&mut feed).await;
        assert_eq!(event.kind, EventKind::DataSent);
        assert_eq!(event.message, "Sent: hello");
    }

    #[tokio::test]
    async fn test_loopback_write_is_read_back() {
        let (mut actor, host, _session_rx, mut feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);

        actor
            .handle_open(device, binding, SerialSettings::default(), 1)
            .await
            .unwrap();
        actor.handle_write(b"ping".to_vec()).await.unwrap();

        // The echo surfaces through the read loop; its timing relative to
        // the Sent entry is not fixed, so collect both before asserting
        let first = next_event(&mut feed).await;
        let second = next_event(&mut feed).await;
        let kinds = [first.kind, second.kind];
        assert!(kinds.contains(&EventKind::DataSent), "{:?}", kinds);
        let received = if first.kind == EventKind::DataReceived {
            first
        } else {
            second
        };
        assert_eq!(received.kind, EventKind::DataReceived);
        assert_eq!(received.message, "Received: ping");

        actor.handle_close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_reports_connection_closed() {
        let (mut actor, host, mut session_rx, _feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);

        actor
            .handle_open(device, binding, SerialSettings::default(), 1)
            .await
            .unwrap();
        let _ = session_rx.next().await.unwrap(); // ConnectionEstablished

        actor.handle_close().await.unwrap();
        assert!(actor.transport.is_none());

        match session_rx.next().await.unwrap() {
            SessionMessage::ConnectionClosed => {}
            other => panic!("Wrong message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_when_already_closed_is_idempotent() {
        let (mut actor, _host, _session_rx, _feed) = create_test_actor();

        assert!(actor.handle_close().await.is_ok());
        assert!(actor.handle_close().await.is_ok());
    }

    #[tokio::test]
    async fn test_no_data_published_after_close() {
        let (mut actor, host, _session_rx, mut feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);

        actor
            .handle_open(device.clone(), binding, SerialSettings::default(), 1)
            .await
            .unwrap();
        actor.handle_close().await.unwrap();

        // Bytes arriving after the close must not surface
        host.inject(device.id, b"late");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(feed.drain().iter().all(|e| e.kind != EventKind::DataReceived));
    }

    #[tokio::test]
    async fn test_shutdown_closes_port() {
        let (mut actor, host, mut session_rx, _feed) = create_test_actor();
        let (device, binding) = attach_and_bind(&host);

        actor
            .handle_open(device, binding, SerialSettings::default(), 1)
            .await
            .unwrap();
        let _ = session_rx.next().await.unwrap();

        actor.shutdown().await;
        assert!(actor.transport.is_none());
    }

    #[tokio::test]
    async fn test_idle_policy_disconnects_after_limit() {
        let host = LoopbackHost::new();
        let driver = Arc::new(LoopbackDriver::new(&host));
        let (session_tx, mut session_rx) = mpsc::channel(100);
        let (events, _feed) = EventSink::new();
        let mut actor = PortActor::new(
            driver,
            session_tx,
            events,
            IdleReadPolicy::DisconnectAfter(1),
        );
        let (device, binding) = attach_and_bind(&host);

        actor
            .handle_open(device, binding, SerialSettings::default(), 4)
            .await
            .unwrap();
        let _ = session_rx.next().await.unwrap(); // ConnectionEstablished

        // One full read timeout with no data ends the session
        match tokio::time::timeout(Duration::from_secs(5), session_rx.next())
            .await
            .unwrap()
            .unwrap()
        {
            SessionMessage::ConnectionLost { generation, reason } => {
                assert_eq!(generation, 4);
                assert!(reason.starts_with("No data received"), "{}", reason);
            }
            other => panic!("Wrong message: {:?}", other),
        }

        actor.handle_close().await.unwrap();
    }
}
