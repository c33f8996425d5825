//! Centralized timing and sizing constants for the session actors
//!
//! All timeout and buffer values are defined here with their rationale.
//! Change them only after testing against real hardware; several of them
//! interact (the teardown latency bound, for example, is derived from the
//! read timeout).

/// Port I/O and lifecycle timing
pub mod port {
    /// Timeout for a single blocking read (milliseconds)
    ///
    /// **Value**: 1000ms
    ///
    /// **Rationale**: The read loop must wake regularly to observe its stop
    /// flag, otherwise teardown could block for as long as the device stays
    /// silent. One second keeps the loop cheap (one wakeup per second on an
    /// idle line) while bounding teardown latency: a close is observed
    /// within at most one timeout period.
    ///
    /// **Used in**: port_actor.rs read loop
    pub const READ_TIMEOUT_MS: u64 = 1000;

    /// Timeout for a single blocking write (milliseconds)
    ///
    /// **Value**: 1000ms
    ///
    /// **Rationale**: Writes go to a USB bulk endpoint and normally complete
    /// in milliseconds. A full second only elapses when the device has
    /// stopped draining its endpoint (wedged firmware, half-removed cable),
    /// and at that point the session is reported lost rather than letting
    /// the writer block forever.
    ///
    /// **Used in**: port_actor.rs write handler
    pub const WRITE_TIMEOUT_MS: u64 = 1000;

    /// Read buffer size (bytes)
    ///
    /// **Value**: 1024 bytes
    ///
    /// **Rationale**: Large enough to drain a full USB bulk transfer
    /// (typically 64 or 512 bytes) in one read, small enough that an idle
    /// session costs nothing. Data arriving faster than it is consumed is
    /// simply split across consecutive reads.
    ///
    /// **Used in**: port_actor.rs read loop
    pub const READ_BUFFER_BYTES: usize = 1024;

    /// Timeout for read loop cleanup acknowledgment (milliseconds)
    ///
    /// **Value**: 500ms
    ///
    /// **Rationale**: After `close()` the read loop wakes (the transport
    /// wakes blocked readers, or the current read times out) and signals
    /// completion. 500ms is a warning threshold, not a hard limit: if the
    /// signal does not arrive the close proceeds anyway and the loop exits
    /// on its own once the current read returns.
    ///
    /// **Used in**: port_actor.rs close handler
    pub const CLEANUP_TIMEOUT_MS: u64 = 500;
}

/// Engine lifecycle timing
pub mod engine {
    /// Grace period for in-flight teardown work during shutdown (milliseconds)
    ///
    /// **Value**: 600ms
    ///
    /// **Rationale**: Covers the port cleanup timeout (500ms) plus margin
    /// for mailbox scheduling. Shutdown returns only after the port close
    /// has had time to complete, so the blocking read task is guaranteed to
    /// have exited before the runtime is torn down.
    ///
    /// **Used in**: engine.rs shutdown
    pub const SHUTDOWN_GRACE_MS: u64 = 600;
}
