//! Container inventory: proxy-safe identifiers, snapshot types, and the
//! collector that assembles a point-in-time view of running containers
//!
//! Collection deliberately does one address lookup per container instead of
//! parsing addresses out of the listing response. The extra round trips buy
//! independence from listing formats that omit network details.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::docker::ContainerRuntime;
use crate::error::CollectionError;

/// Derive a proxy-safe identifier from an arbitrary image or container name.
///
/// Every maximal run of characters outside `[A-Za-z0-9]` is replaced by a
/// single underscore, because HAProxy does not accept arbitrary characters
/// in ACL or backend names. Deterministic and total; distinct inputs may
/// collide (e.g. "a/b" and "a.b"), which is an accepted limitation.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// One running container at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Image name as reported by the runtime listing, e.g. "example/wordpress"
    pub name: String,
    /// Runtime-assigned container identifier
    pub id: String,
    /// Primary reachable network address; empty while the container's
    /// network is still initializing or the lookup failed
    pub address: String,
    /// Proxy-safe identifier derived from `name`
    pub route_name: String,
}

impl ContainerRecord {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let route_name = sanitize(&name);
        Self {
            name,
            id: id.into(),
            address: address.into(),
            route_name,
        }
    }
}

/// An immutable, ordered, point-in-time view of the running containers.
///
/// Snapshots are never mutated or diffed against each other; every cycle
/// builds a fresh one and the published configuration is always a full
/// replacement.
#[derive(Debug, Clone)]
pub struct InventorySnapshot {
    records: Vec<ContainerRecord>,
    taken_at: DateTime<Utc>,
}

impl InventorySnapshot {
    pub fn new(records: Vec<ContainerRecord>) -> Self {
        Self {
            records,
            taken_at: Utc::now(),
        }
    }

    pub fn records(&self) -> &[ContainerRecord] {
        &self.records
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Assembles inventory snapshots from the container runtime.
pub struct Collector<R> {
    runtime: Arc<R>,
}

impl<R: ContainerRuntime> Collector<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// Collect a fresh snapshot of the running containers.
    ///
    /// A failed address lookup does not drop the container: the record is
    /// kept with an empty address so a guest whose network is still coming
    /// up keeps its route. Only an unreachable runtime fails the collection.
    pub async fn collect(&self) -> Result<InventorySnapshot, CollectionError> {
        let listed = self.runtime.list_running().await?;

        let mut records = Vec::with_capacity(listed.len());
        for entry in listed {
            let address = match self.runtime.primary_address(&entry.id).await {
                Ok(address) => address,
                Err(err) => {
                    warn!(
                        container_id = %entry.id,
                        name = %entry.name,
                        error = %err,
                        "address lookup failed, keeping container with empty address"
                    );
                    String::new()
                }
            };
            records.push(ContainerRecord::new(entry.name, entry.id, address));
        }

        Ok(InventorySnapshot::new(records))
    }
}
