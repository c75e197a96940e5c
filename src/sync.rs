//! The synchronizer: one control loop wiring watcher, collector, renderer,
//! and publisher together
//!
//! Cycles run strictly sequentially; there is never more than one
//! collect-render-publish in flight. A cycle's failure is logged and
//! absorbed, returning the synchronizer to `Idle` to await the next event.
//! Only termination of the event subscription ends the loop.

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::docker::ContainerRuntime;
use crate::error::{CycleError, WatcherError};
use crate::events::EventWatcher;
use crate::inventory::Collector;
use crate::publish::{Publisher, ReloadHook};
use crate::render::Renderer;

/// Where the synchronizer currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Collecting,
    Rendering,
    Publishing,
    Faulted,
}

/// Owns the pipeline's control flow; the only component that sequences the
/// others. Every hand-off between stages is an immutable value.
pub struct Synchronizer<R, H> {
    collector: Collector<R>,
    renderer: Renderer,
    publisher: Publisher<H>,
    state: SyncState,
    cycles: u64,
}

impl<R: ContainerRuntime, H: ReloadHook> Synchronizer<R, H> {
    pub fn new(collector: Collector<R>, renderer: Renderer, publisher: Publisher<H>) -> Self {
        Self {
            collector,
            renderer,
            publisher,
            state: SyncState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Number of cycles attempted so far, including failed ones.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one collect-render-publish cycle, absorbing any failure.
    pub async fn run_cycle(&mut self) {
        self.cycles += 1;
        let cycle = self.cycles;
        match self.execute(cycle).await {
            Ok(containers) => {
                info!(cycle, containers, "configuration synchronized");
                self.state = SyncState::Idle;
            }
            Err(err) => {
                self.state = SyncState::Faulted;
                error!(cycle, stage = err.stage(), error = %err, "synchronization cycle failed");
                // Await the next event rather than retrying immediately; it
                // will re-collect everything anyway.
                self.state = SyncState::Idle;
            }
        }
    }

    async fn execute(&mut self, cycle: u64) -> Result<usize, CycleError> {
        self.state = SyncState::Collecting;
        let snapshot = self.collector.collect().await?;
        debug!(
            cycle,
            containers = snapshot.len(),
            taken_at = %snapshot.taken_at(),
            "inventory collected"
        );

        self.state = SyncState::Rendering;
        let artifact = self.renderer.render(&snapshot)?;

        self.state = SyncState::Publishing;
        self.publisher.publish(&artifact).await?;

        Ok(snapshot.len())
    }

    /// Run the control loop until the event subscription terminates or
    /// shutdown is requested.
    ///
    /// An unconditional cycle runs first so the configuration reflects
    /// reality before the first event arrives.
    pub async fn run(
        mut self,
        mut watcher: EventWatcher,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), WatcherError> {
        info!("running initial synchronization cycle");
        self.run_cycle().await;

        loop {
            tokio::select! {
                alive = watcher.changed() => {
                    if !alive {
                        self.state = SyncState::Faulted;
                        return Err(WatcherError::StreamTerminated);
                    }
                    self.run_cycle().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("shutdown requested, stopping synchronizer");
                        return Ok(());
                    }
                }
            }
        }
    }
}
