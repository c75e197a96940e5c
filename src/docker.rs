//! Container runtime access for inventory collection and lifecycle events
//!
//! All Docker API calls go through the [`ContainerRuntime`] trait so the
//! pipeline can be exercised against a scripted runtime in tests while
//! production uses the bollard-backed [`DockerRuntime`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bollard::container::ListContainersOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::{Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::error::{CollectionError, WatcherError};
use crate::events::LifecycleEvent;

/// One entry from the runtime's "list running containers" operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedContainer {
    /// Image name, e.g. "example/wordpress"
    pub name: String,
    /// Runtime-assigned container identifier
    pub id: String,
}

/// The three runtime operations the pipeline depends on.
///
/// The listing intentionally carries only name and id; addresses are
/// resolved with a second per-container call (see
/// [`primary_address`](Self::primary_address)), which keeps the collector
/// independent of listing formats that omit network fields.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// List the currently running containers.
    fn list_running(
        &self,
    ) -> impl Future<Output = Result<Vec<ListedContainer>, CollectionError>> + Send;

    /// Resolve the primary network address of a container. Returns an empty
    /// string when the container has no address yet.
    fn primary_address(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<String, CollectionError>> + Send;

    /// Subscribe to the runtime's container lifecycle events. The stream is
    /// infinite in the happy case; when it ends, the subscription is gone
    /// for good and the caller must treat that as fatal.
    fn lifecycle_events(
        &self,
    ) -> impl Stream<Item = Result<LifecycleEvent, WatcherError>> + Send;
}

/// Production runtime backed by the Docker daemon via bollard.
pub struct DockerRuntime {
    client: Docker,
    timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the Docker daemon and verify it responds.
    ///
    /// Connection priority:
    /// 1. Explicit docker_host parameter
    /// 2. DOCKER_HOST environment variable
    /// 3. Common socket paths (platform-specific)
    pub async fn connect(docker_host: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let client = if let Some(host) = docker_host {
            Self::connect_to_host(host).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to connect to Docker at '{}': {}. \
                     Ensure Docker is running and the socket path is correct.",
                    host,
                    e
                )
            })?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to connect to Docker via DOCKER_HOST='{}': {}. \
                     Ensure Docker is running and accessible.",
                    host,
                    e
                )
            })?
        } else {
            Self::connect_with_defaults()?
        };

        // Verify connection
        client.ping().await.map_err(|e| {
            anyhow::anyhow!(
                "Docker daemon is not responding: {}. \
                 Ensure Docker Desktop, Colima, or dockerd is running.",
                e
            )
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { client, timeout })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        if host.starts_with("unix://") {
            let socket_path = host.trim_start_matches("unix://");
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION).map_err(
                |e| anyhow::anyhow!("Cannot connect to Unix socket '{}': {}", socket_path, e),
            )
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to TCP endpoint '{}': {}", host, e))
        } else {
            anyhow::bail!(
                "Invalid docker_host format: '{}'. Expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    fn connect_with_defaults() -> anyhow::Result<Docker> {
        // Try common socket paths before falling back to bollard's default
        let home = std::env::var("HOME").unwrap_or_default();
        let socket_paths: Vec<(&str, String)> = vec![
            ("Linux default", "/var/run/docker.sock".to_string()),
            (
                "Docker Desktop (macOS)",
                format!("{}/.docker/run/docker.sock", home),
            ),
            (
                "Colima (macOS)",
                format!("{}/.colima/default/docker.sock", home),
            ),
            ("Rancher Desktop", format!("{}/.rd/docker.sock", home)),
        ];

        for (name, path) in &socket_paths {
            if path.starts_with('/') && std::path::Path::new(path).exists() {
                debug!(path, name, "Found Docker socket");
                if let Ok(client) =
                    Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                {
                    return Ok(client);
                }
            }
        }

        Docker::connect_with_socket_defaults().map_err(|e| {
            anyhow::anyhow!(
                "Cannot connect to Docker daemon. \
                 Start dockerd, or set DOCKER_HOST, or set docker_host in the configuration. \
                 Underlying error: {}",
                e
            )
        })
    }
}

impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<ListedContainer>, CollectionError> {
        let options = ListContainersOptions::<String> {
            all: false, // Only running containers get routes
            ..Default::default()
        };

        let summaries = tokio::time::timeout(
            self.timeout,
            self.client.list_containers(Some(options)),
        )
        .await
        .map_err(|_| {
            CollectionError::RuntimeUnavailable(format!(
                "listing containers timed out after {}s",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| {
            CollectionError::RuntimeUnavailable(format!("listing containers failed: {e}"))
        })?;

        let mut listed = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match listing_from_summary(summary) {
                Ok(entry) => listed.push(entry),
                Err(err) => warn!(error = %err, "skipping container listing entry"),
            }
        }
        Ok(listed)
    }

    async fn primary_address(&self, id: &str) -> Result<String, CollectionError> {
        let details =
            tokio::time::timeout(self.timeout, self.client.inspect_container(id, None))
                .await
                .map_err(|_| {
                    CollectionError::RuntimeUnavailable(format!(
                        "inspecting container {} timed out after {}s",
                        id,
                        self.timeout.as_secs()
                    ))
                })?
                .map_err(|e| {
                    CollectionError::RuntimeUnavailable(format!(
                        "inspecting container {id} failed: {e}"
                    ))
                })?;

        Ok(primary_address_of(details))
    }

    fn lifecycle_events(
        &self,
    ) -> impl Stream<Item = Result<LifecycleEvent, WatcherError>> + Send {
        // Filter server-side so the daemon only wakes us for container
        // start/stop, not image pulls or volume churn.
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec!["start".to_string(), "stop".to_string()],
        );
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.client.events(Some(options)).map(|item| match item {
            Ok(message) => Ok(classify_event(message)),
            Err(err) => {
                error!(error = %err, "reading container event stream failed");
                Err(WatcherError::StreamTerminated)
            }
        })
    }
}

/// Convert one listing entry, rejecting entries that lack the fields a route
/// needs. Callers skip rejected entries rather than failing the listing.
fn listing_from_summary(summary: ContainerSummary) -> Result<ListedContainer, CollectionError> {
    let id = summary
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CollectionError::MalformedEntry("entry has no container id".to_string()))?;
    let name = summary
        .image
        .filter(|image| !image.is_empty())
        .ok_or_else(|| {
            CollectionError::MalformedEntry(format!("entry {id} has no image name"))
        })?;
    Ok(ListedContainer { name, id })
}

/// Pick the container's primary address: the first non-empty address across
/// its networks. Containers on the default bridge have exactly one.
fn primary_address_of(details: ContainerInspectResponse) -> String {
    details
        .network_settings
        .and_then(|settings| settings.networks)
        .and_then(|networks| {
            networks
                .into_values()
                .filter_map(|endpoint| endpoint.ip_address)
                .find(|address| !address.is_empty())
        })
        .unwrap_or_default()
}

/// Classify a raw runtime event into a lifecycle event.
fn classify_event(message: EventMessage) -> LifecycleEvent {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return LifecycleEvent::Other;
    }
    let id = message
        .actor
        .and_then(|actor| actor.id)
        .unwrap_or_default();
    match message.action.as_deref() {
        Some("start") => LifecycleEvent::Started { id },
        Some("stop") => LifecycleEvent::Stopped { id },
        _ => LifecycleEvent::Other,
    }
}

/// Scripted runtime for tests: fixed listing, fixed address table, no events.
#[cfg(test)]
#[derive(Default)]
pub struct MockRuntime {
    pub containers: Vec<ListedContainer>,
    pub addresses: HashMap<String, String>,
    pub fail_listing: bool,
}

#[cfg(test)]
impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(mut self, container: ListedContainer) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_address(mut self, id: &str, address: &str) -> Self {
        self.addresses.insert(id.to_string(), address.to_string());
        self
    }

    pub fn with_failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }
}

#[cfg(test)]
impl ContainerRuntime for MockRuntime {
    async fn list_running(&self) -> Result<Vec<ListedContainer>, CollectionError> {
        if self.fail_listing {
            return Err(CollectionError::RuntimeUnavailable(
                "mock runtime down".to_string(),
            ));
        }
        Ok(self.containers.clone())
    }

    async fn primary_address(&self, id: &str) -> Result<String, CollectionError> {
        self.addresses.get(id).cloned().ok_or_else(|| {
            CollectionError::RuntimeUnavailable(format!("no inspect data for {id}"))
        })
    }

    fn lifecycle_events(
        &self,
    ) -> impl Stream<Item = Result<LifecycleEvent, WatcherError>> + Send {
        futures::stream::empty()
    }
}
