//! Integration tests for gatesync
//!
//! These drive the full pipeline (watcher → collector → renderer →
//! publisher) over a scripted in-memory container runtime and real files in
//! temporary directories.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::Stream;
use gatesync::docker::{ContainerRuntime, ListedContainer};
use gatesync::error::{CollectionError, ReloadError, WatcherError};
use gatesync::events::{EventWatcher, LifecycleEvent};
use gatesync::inventory::Collector;
use gatesync::publish::{Publisher, ReloadHook};
use gatesync::render::Renderer;
use gatesync::sync::Synchronizer;
use tokio::sync::{mpsc, watch};

type EventSender = mpsc::UnboundedSender<Result<LifecycleEvent, WatcherError>>;

/// Container runtime whose listing, addresses, and event stream are driven
/// by the test.
struct ScriptedRuntime {
    containers: Mutex<Vec<ListedContainer>>,
    addresses: Mutex<HashMap<String, String>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<LifecycleEvent, WatcherError>>>>,
}

impl ScriptedRuntime {
    fn new() -> (Arc<Self>, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Self {
            containers: Mutex::new(Vec::new()),
            addresses: Mutex::new(HashMap::new()),
            events: Mutex::new(Some(rx)),
        });
        (runtime, tx)
    }

    /// Replace the scripted inventory: (image name, id, address) triples.
    fn set_containers(&self, entries: &[(&str, &str, &str)]) {
        let mut containers = self.containers.lock().unwrap();
        let mut addresses = self.addresses.lock().unwrap();
        containers.clear();
        addresses.clear();
        for (name, id, address) in entries {
            containers.push(ListedContainer {
                name: name.to_string(),
                id: id.to_string(),
            });
            addresses.insert(id.to_string(), address.to_string());
        }
    }
}

impl ContainerRuntime for ScriptedRuntime {
    async fn list_running(&self) -> Result<Vec<ListedContainer>, CollectionError> {
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn primary_address(&self, id: &str) -> Result<String, CollectionError> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn lifecycle_events(
        &self,
    ) -> impl Stream<Item = Result<LifecycleEvent, WatcherError>> + Send {
        let rx = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("lifecycle stream subscribed twice");
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }
}

/// Reload hook that counts completed reloads, optionally slowly.
struct CountingHook {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingHook {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Shareable reload-hook handle. A local newtype is required because the
/// orphan rule forbids implementing the foreign `ReloadHook` trait directly
/// for `Arc<CountingHook>` (`Arc` is not a fundamental type).
struct SharedHook(Arc<CountingHook>);

impl ReloadHook for SharedHook {
    async fn reload(&self) -> Result<(), ReloadError> {
        if !self.0.delay.is_zero() {
            tokio::time::sleep(self.0.delay).await;
        }
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

const TEMPLATE: &str =
    "{% for c in containers %}{{ c.route_name }} {{ c.id }} {{ c.address }}\n{% endfor %}";

fn write_template(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("proxy.tmpl");
    std::fs::write(&path, TEMPLATE).unwrap();
    path
}

fn start_event(id: &str) -> Result<LifecycleEvent, WatcherError> {
    Ok(LifecycleEvent::Started { id: id.to_string() })
}

/// Poll until the condition holds or the deadline passes.
async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn read_target(path: &PathBuf) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[tokio::test]
async fn test_initial_cycle_runs_before_any_event() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(&dir);
    let target = dir.path().join("haproxy.cfg");

    let (runtime, _events_tx) = ScriptedRuntime::new();
    runtime.set_containers(&[("example/web", "abc123", "10.0.0.2")]);

    let hook = CountingHook::new(Duration::ZERO);
    let sync = Synchronizer::new(
        Collector::new(Arc::clone(&runtime)),
        Renderer::new(&template),
        Publisher::new(&target, SharedHook(Arc::clone(&hook))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = EventWatcher::spawn(Arc::clone(&runtime));
    let handle = tokio::spawn(sync.run(watcher, shutdown_rx));

    // No event was ever sent; the startup cycle alone must publish.
    assert!(
        wait_for(
            || read_target(&target) == "example_web abc123 10.0.0.2\n",
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(hook.calls(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lifecycle_event_triggers_resync() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(&dir);
    let target = dir.path().join("haproxy.cfg");

    let (runtime, events_tx) = ScriptedRuntime::new();
    runtime.set_containers(&[("web", "abc123", "10.0.0.2")]);

    let hook = CountingHook::new(Duration::ZERO);
    let sync = Synchronizer::new(
        Collector::new(Arc::clone(&runtime)),
        Renderer::new(&template),
        Publisher::new(&target, SharedHook(Arc::clone(&hook))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = EventWatcher::spawn(Arc::clone(&runtime));
    let handle = tokio::spawn(sync.run(watcher, shutdown_rx));

    assert!(
        wait_for(
            || read_target(&target).contains("web abc123"),
            Duration::from_secs(5)
        )
        .await
    );

    // A second container starts; its event must produce a fresh artifact.
    runtime.set_containers(&[("web", "abc123", "10.0.0.2"), ("db", "def456", "10.0.0.3")]);
    events_tx.send(start_event("def456")).unwrap();

    assert!(
        wait_for(
            || read_target(&target).contains("db def456 10.0.0.3"),
            Duration::from_secs(5)
        )
        .await
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rapid_events_coalesce_into_one_trailing_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(&dir);
    let target = dir.path().join("haproxy.cfg");

    let (runtime, events_tx) = ScriptedRuntime::new();

    // A slow reload keeps the initial cycle in flight while the burst of
    // events arrives, so they must all collapse into one pending signal.
    let hook = CountingHook::new(Duration::from_millis(300));
    let sync = Synchronizer::new(
        Collector::new(Arc::clone(&runtime)),
        Renderer::new(&template),
        Publisher::new(&target, SharedHook(Arc::clone(&hook))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = EventWatcher::spawn(Arc::clone(&runtime));
    let handle = tokio::spawn(sync.run(watcher, shutdown_rx));

    // Burst: two state changes in quick succession while cycle 1 runs.
    runtime.set_containers(&[("web", "abc123", "10.0.0.2")]);
    events_tx.send(start_event("abc123")).unwrap();
    runtime.set_containers(&[("web", "abc123", "10.0.0.2"), ("db", "def456", "10.0.0.3")]);
    events_tx.send(start_event("def456")).unwrap();

    // The final artifact reflects the state at/after the second event.
    assert!(
        wait_for(
            || {
                let content = read_target(&target);
                content.contains("web abc123") && content.contains("db def456")
            },
            Duration::from_secs(5)
        )
        .await
    );

    // Initial cycle plus one coalesced cycle for the whole burst.
    assert!(
        wait_for(|| hook.calls() == 2, Duration::from_secs(2)).await,
        "expected exactly 2 publishes, got {}",
        hook.calls()
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_event_stream_termination_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(&dir);
    let target = dir.path().join("haproxy.cfg");

    let (runtime, events_tx) = ScriptedRuntime::new();
    let hook = CountingHook::new(Duration::ZERO);
    let sync = Synchronizer::new(
        Collector::new(Arc::clone(&runtime)),
        Renderer::new(&template),
        Publisher::new(&target, SharedHook(Arc::clone(&hook))),
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = EventWatcher::spawn(Arc::clone(&runtime));
    let handle = tokio::spawn(sync.run(watcher, shutdown_rx));

    // Losing the subscription is the one fatal condition.
    drop(events_tx);

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run loop should end once the stream terminates")
        .unwrap();
    assert!(matches!(result, Err(WatcherError::StreamTerminated)));
}

#[tokio::test]
async fn test_failed_cycle_does_not_end_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // Template intentionally missing: the initial cycle fails to render.
    let template = dir.path().join("proxy.tmpl");
    let target = dir.path().join("haproxy.cfg");

    let (runtime, events_tx) = ScriptedRuntime::new();
    runtime.set_containers(&[("web", "abc123", "10.0.0.2")]);

    let hook = CountingHook::new(Duration::ZERO);
    let sync = Synchronizer::new(
        Collector::new(Arc::clone(&runtime)),
        Renderer::new(&template),
        Publisher::new(&target, SharedHook(Arc::clone(&hook))),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = EventWatcher::spawn(Arc::clone(&runtime));
    let handle = tokio::spawn(sync.run(watcher, shutdown_rx));

    // Give the failed startup cycle a moment; nothing must be published.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!target.exists());
    assert_eq!(hook.calls(), 0);

    // The operator fixes the template; the next event recovers the pipeline.
    std::fs::write(&template, TEMPLATE).unwrap();
    events_tx.send(start_event("abc123")).unwrap();

    assert!(
        wait_for(
            || read_target(&target).contains("web abc123 10.0.0.2"),
            Duration::from_secs(5)
        )
        .await
    );

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_readers_never_observe_a_partial_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("haproxy.cfg");

    let short = b"short render\n".to_vec();
    let long = vec![b'x'; 64 * 1024];

    let hook = CountingHook::new(Duration::ZERO);
    let publisher = Arc::new(Publisher::new(&target, SharedHook(Arc::clone(&hook))));
    publisher.publish(&short).await.unwrap();

    let reader_target = target.clone();
    let (short_r, long_r) = (short.clone(), long.clone());
    let reader = tokio::spawn(async move {
        // Hammer the target while it is being replaced; every read must see
        // one complete render, never a truncated mix.
        for _ in 0..500 {
            let content = std::fs::read(&reader_target).unwrap();
            assert!(
                content == short_r || content == long_r,
                "observed partial artifact of {} bytes",
                content.len()
            );
            tokio::task::yield_now().await;
        }
    });

    for i in 0..50 {
        let artifact = if i % 2 == 0 { &long } else { &short };
        publisher.publish(artifact).await.unwrap();
    }

    reader.await.unwrap();
}
