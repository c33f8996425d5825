use crate::sink::EventSink;
use futures::stream::StreamExt;
use futures_channel::mpsc;
use session_protocol::{EventKind, SessionError};
use std::future::Future;
use tracing::debug;

/// Actor trait for implementing message-driven components
///
/// Actors are independent, stateful components that communicate through
/// message passing. Each actor has its own message queue and processes
/// messages sequentially, so a message is always handled to completion
/// before the next one starts.
///
/// # Lifecycle
///
/// 1. **init()** - Called once before message processing starts
/// 2. **handle()** - Called for each received message
/// 3. **shutdown()** - Called when the actor is stopping
///
/// # Example
///
/// ```ignore
/// struct MyActor {
///     count: u32,
///     events: EventSink,
/// }
///
/// impl Actor for MyActor {
///     type Message = MyMessage;
///
///     fn name(&self) -> &'static str {
///         "MyActor"
///     }
///
///     async fn handle(&mut self, msg: Self::Message) -> Result<(), SessionError> {
///         // Process message
///         Ok(())
///     }
/// }
/// ```
#[allow(async_fn_in_trait)]
pub trait Actor: Send + 'static {
    /// Message type this actor processes
    type Message: Send + 'static;

    /// Actor name (used for logging and debugging)
    fn name(&self) -> &'static str;

    /// Initialize the actor before processing messages
    ///
    /// Called once when the actor starts. Use this to set up resources or
    /// perform initial configuration.
    fn init(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send {
        async { Ok(()) }
    }

    /// Handle a single message
    ///
    /// Messages are processed sequentially in the order received.
    fn handle(
        &mut self,
        msg: Self::Message,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Clean up before shutdown
    ///
    /// Called when the actor is stopping. Use this to close connections or
    /// release resources.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Main actor run loop (provided by runtime)
    ///
    /// This method consumes the actor and runs it to completion. It handles
    /// initialization, message processing, and shutdown. Handler errors are
    /// appended to the feed as `Error` entries and the loop keeps going; the
    /// actor only stops when its message channel closes.
    fn run(
        mut self,
        mut rx: mpsc::Receiver<Self::Message>,
        events: EventSink,
    ) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move {
            // Initialize
            if let Err(e) = self.init().await {
                events.append(
                    EventKind::Error,
                    format!("{} init failed: {}", self.name(), e),
                );
                return;
            }

            debug!("{} started", self.name());

            // Process messages
            while let Some(msg) = rx.next().await {
                if let Err(e) = self.handle(msg).await {
                    events.append(EventKind::Error, format!("{} error: {}", self.name(), e));
                }
            }

            // Shutdown
            self.shutdown().await;

            debug!("{} stopped", self.name());
        }
    }
}

/// Spawn an actor onto the tokio runtime
///
/// The returned handle resolves when the actor's message channel closes and
/// its shutdown hook has run.
pub fn spawn_actor<A>(
    actor: A,
    rx: mpsc::Receiver<A::Message>,
    events: EventSink,
) -> tokio::task::JoinHandle<()>
where
    A: Actor,
{
    tokio::spawn(actor.run(rx, events))
}
