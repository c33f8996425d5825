use futures::stream::StreamExt;
use futures_channel::mpsc;
use session_protocol::{Event, EventKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Producer side of the session feed.
///
/// Cloning shares the sequence counter, so entries from every producer (the
/// actors, the blocking reader) carry strictly increasing `seq` values in
/// append order. Appending never blocks and never fails: the channel is
/// unbounded, and a consumer that went away only costs a debug log.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
    seq: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new() -> (Self, EventFeed) {
        let (tx, rx) = mpsc::unbounded();
        let sink = Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        };
        (sink, EventFeed { rx })
    }

    /// Append one entry to the feed. Returns the sequence number it got.
    pub fn append(&self, kind: EventKind, message: impl Into<String>) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = Event::new(seq, kind, message);
        if self.tx.unbounded_send(event).is_err() {
            debug!(seq, "feed consumer gone, entry dropped");
        }
        seq
    }
}

/// Consumer side of the session feed.
///
/// Entries arrive in append order per producer; across producers `seq` is
/// authoritative. There is exactly one feed per engine.
pub struct EventFeed {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventFeed {
    /// Wait for the next entry. `None` once every sink clone is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.next().await
    }

    /// Non-blocking poll. `None` when the feed is currently empty or closed.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_next().ok().flatten()
    }

    /// Collect everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = self.try_next() {
            out.push(event);
        }
        out
    }
}
