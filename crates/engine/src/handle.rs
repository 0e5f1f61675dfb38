// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Warmpool.
//
// Warmpool is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Warmpool is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Warmpool. If not, see <https://www.gnu.org/licenses/>.

//! # Pooled Resource Handles
//!
//! ## Purpose
//! In-memory record for a single pooled resource plus the tagged
//! backend payload each adapter kind attaches to it.
//!
//! ## Design
//! - `NativeResource` is a closed tagged union over the four adapter
//!   kinds; the engine never looks inside a variant except to build the
//!   read-only projection exposed by `pool_info`.
//! - Handle names are `<type>-<port>-<createdAtEpochMs>` and are unique
//!   within a pool by construction (the port is leased per creation).

use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, watch};

/// Resource kind managed by a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// In-process worker (dedicated thread)
    Worker,
    /// Child OS process
    Process,
    /// Local Docker container
    Container,
    /// Remote Kubernetes pod
    Pod,
}

impl ResourceType {
    /// Lowercase tag used in handle names and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Worker => "worker",
            ResourceType::Process => "process",
            ResourceType::Container => "container",
            ResourceType::Pod => "pod",
        }
    }

    /// Capitalized form used in manager names and health reports.
    pub fn capitalized(&self) -> &'static str {
        match self {
            ResourceType::Worker => "Worker",
            ResourceType::Process => "Process",
            ResourceType::Container => "Container",
            ResourceType::Pod => "Pod",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock epoch milliseconds.
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One usage sample produced by an adapter probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSample {
    /// CPU utilization in percent
    pub cpu_percent: f64,
    /// Resident memory in bytes (0 where not measurable)
    pub memory_bytes: u64,
}

/// Usage sample as stored on a handle by the monitoring timer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// CPU utilization in percent
    pub cpu_percent: f64,
    /// Resident memory in bytes
    pub memory_bytes: u64,
    /// Epoch ms at which the sample was taken
    pub sampled_at: i64,
}

impl ResourceUsage {
    /// Stamp a raw adapter sample with the observation time.
    pub fn stamped(sample: UsageSample, sampled_at: i64) -> Self {
        Self {
            cpu_percent: sample.cpu_percent,
            memory_bytes: sample.memory_bytes,
            sampled_at,
        }
    }
}

/// Previous busy-time observation used for worker CPU deltas
#[derive(Debug, Clone, Copy)]
pub struct WorkerCpuSample {
    /// Cumulative busy nanoseconds at the observation
    pub busy_nanos: u64,
    /// Monotonic instant of the observation
    pub at: Instant,
}

/// Backend payload for an in-process worker
#[derive(Debug)]
pub struct WorkerCell {
    /// Join handle for the worker thread; taken during termination
    pub join: Option<std::thread::JoinHandle<()>>,
    /// Shutdown signal into the worker; consumed on first terminate
    pub shutdown: Option<oneshot::Sender<()>>,
    /// Cumulative busy nanoseconds reported by the worker loop
    pub busy_nanos: Arc<AtomicU64>,
    /// Previous usage observation (scratch for the CPU delta)
    pub last_sample: Option<WorkerCpuSample>,
    /// Set when graceful stop timed out and the thread was detached
    pub killed: bool,
}

/// Backend payload for a child OS process
#[derive(Debug)]
pub struct ProcessCell {
    /// OS pid of the child
    pub pid: u32,
    /// Flips to false when the reaper task observes exit
    pub alive: watch::Receiver<bool>,
    /// Set once a kill signal has been issued
    pub killed: bool,
}

impl ProcessCell {
    /// Whether the child is still running as far as the reaper knows.
    pub fn is_running(&self) -> bool {
        *self.alive.borrow()
    }
}

/// Backend-specific payload, tagged by adapter kind
#[derive(Debug)]
pub enum NativeResource {
    /// In-process worker thread
    Worker(WorkerCell),
    /// Child OS process
    Process(ProcessCell),
    /// Local Docker container
    Container {
        /// Container id assigned by the daemon
        id: String,
        /// Container name supplied at creation
        container_name: String,
    },
    /// Remote Kubernetes pod
    Pod {
        /// Pod name in the cluster
        pod_name: String,
        /// Namespace the pod lives in
        namespace: String,
    },
}

impl NativeResource {
    /// Kind tag of this payload.
    pub fn type_tag(&self) -> ResourceType {
        match self {
            NativeResource::Worker(_) => ResourceType::Worker,
            NativeResource::Process(_) => ResourceType::Process,
            NativeResource::Container { .. } => ResourceType::Container,
            NativeResource::Pod { .. } => ResourceType::Pod,
        }
    }
}

/// In-memory record for one pooled resource
#[derive(Debug)]
pub struct ResourceHandle {
    /// Unique name: `<type>-<port>-<createdAtEpochMs>`
    pub name: String,
    /// Host TCP port the resource is reachable on (0 if not applicable)
    pub port: u16,
    /// Epoch ms at successful creation
    pub created_at: i64,
    /// Epoch ms of the most recent successful selection
    pub last_used: i64,
    /// Backend payload; opaque to the engine
    pub native: NativeResource,
    /// Newest monitoring sample, if any
    pub usage: Option<ResourceUsage>,
}

impl ResourceHandle {
    /// Build a fresh handle; `last_used` starts at creation time.
    pub fn new(name: String, port: u16, created_at: i64, native: NativeResource) -> Self {
        Self {
            name,
            port,
            created_at,
            last_used: created_at,
            native,
            usage: None,
        }
    }

    /// Read-only projection for `pool_info` and acquisition results.
    ///
    /// `alive` is present only for worker/process handles, `id` only for
    /// containers; the native payload itself is never exposed.
    pub fn projection(&self) -> HandleProjection {
        let (alive, id) = match &self.native {
            NativeResource::Worker(cell) => (
                Some(
                    cell.join
                        .as_ref()
                        .map(|j| !j.is_finished())
                        .unwrap_or(false)
                        && !cell.killed,
                ),
                None,
            ),
            NativeResource::Process(cell) => {
                (Some(cell.is_running() && !cell.killed), None)
            }
            NativeResource::Container { id, .. } => (None, Some(id.clone())),
            NativeResource::Pod { .. } => (None, None),
        };
        HandleProjection {
            name: self.name.clone(),
            port: self.port,
            created_at: self.created_at,
            last_used: self.last_used,
            alive,
            id,
            usage: self.usage,
        }
    }
}

/// Projected view of a handle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleProjection {
    /// Handle name
    pub name: String,
    /// Host TCP port
    pub port: u16,
    /// Epoch ms at creation
    pub created_at: i64,
    /// Epoch ms of last selection
    pub last_used: i64,
    /// Present only for worker/process handles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    /// Present only for container handles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Newest monitoring sample, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResourceUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(ResourceType::Worker.as_str(), "worker");
        assert_eq!(ResourceType::Pod.capitalized(), "Pod");
        assert_eq!(format!("{}", ResourceType::Container), "container");
    }

    #[test]
    fn test_container_projection_carries_id_not_alive() {
        let handle = ResourceHandle::new(
            "container-8080-1700000000000".to_string(),
            8080,
            1_700_000_000_000,
            NativeResource::Container {
                id: "abc123".to_string(),
                container_name: "warmpool".to_string(),
            },
        );
        let proj = handle.projection();
        assert_eq!(proj.id.as_deref(), Some("abc123"));
        assert!(proj.alive.is_none());
        assert_eq!(proj.last_used, proj.created_at);
    }

    #[test]
    fn test_pod_projection_is_bare() {
        let handle = ResourceHandle::new(
            "pod-9001-1700000000000".to_string(),
            9001,
            1_700_000_000_000,
            NativeResource::Pod {
                pod_name: "pod-9001-1700000000000".to_string(),
                namespace: "default".to_string(),
            },
        );
        let proj = handle.projection();
        assert!(proj.alive.is_none());
        assert!(proj.id.is_none());
    }

    #[test]
    fn test_usage_stamping() {
        let usage = ResourceUsage::stamped(
            UsageSample {
                cpu_percent: 12.5,
                memory_bytes: 4096,
            },
            42,
        );
        assert_eq!(usage.sampled_at, 42);
        assert_eq!(usage.memory_bytes, 4096);
    }
}
