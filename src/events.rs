//! Lifecycle event watching and signal coalescing
//!
//! The watcher holds the one long-lived subscription to the runtime's event
//! stream and turns relevant events into empty "inventory changed" signals.
//! Signals carry no payload: a cycle always re-collects the full inventory,
//! so any events that arrive while a cycle is in flight collapse into a
//! single pending signal.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info};

use crate::docker::ContainerRuntime;

/// A classified container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started { id: String },
    Stopped { id: String },
    /// Anything else the runtime let through; never produces a signal.
    Other,
}

impl LifecycleEvent {
    /// Whether this event changes the set of running containers.
    pub fn is_relevant(&self) -> bool {
        matches!(self, LifecycleEvent::Started { .. } | LifecycleEvent::Stopped { .. })
    }

    fn describe(&self) -> (&'static str, &str) {
        match self {
            LifecycleEvent::Started { id } => ("start", id),
            LifecycleEvent::Stopped { id } => ("stop", id),
            LifecycleEvent::Other => ("other", ""),
        }
    }
}

/// Consumer handle over the single event subscription.
///
/// The sequence of signals is lazy, infinite while the subscription lives,
/// and non-restartable: once [`changed`](Self::changed) returns `false` the
/// subscription is gone and no further signals will ever arrive.
pub struct EventWatcher {
    rx: mpsc::Receiver<()>,
}

impl EventWatcher {
    /// Subscribe to the runtime's lifecycle stream and start forwarding
    /// signals. The channel is bounded at one pending signal; events that
    /// arrive while a signal is already pending are coalesced into it.
    pub fn spawn<R: ContainerRuntime>(runtime: Arc<R>) -> Self {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let events = runtime.lifecycle_events();
            let mut events = std::pin::pin!(events);

            while let Some(item) = events.next().await {
                match item {
                    Ok(event) if event.is_relevant() => {
                        let (action, id) = event.describe();
                        debug!(action, container_id = id, "container lifecycle event");
                        match tx.try_send(()) {
                            Ok(()) => {}
                            // A signal is already pending; this event is
                            // covered by the cycle that signal will trigger.
                            Err(TrySendError::Full(())) => {}
                            Err(TrySendError::Closed(())) => return,
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(error = %err, "container event subscription failed");
                        break;
                    }
                }
            }
            info!("container event subscription ended");
            // Dropping tx closes the signal sequence for good.
        });

        Self { rx }
    }

    /// Wait for the next "inventory changed" signal. Returns `false` when
    /// the underlying subscription has terminated, which callers must treat
    /// as fatal.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
