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

//! # Docker Engine API Client
//!
//! ## Purpose
//! Minimal typed client for the local Docker daemon over its Unix
//! socket, covering exactly the operations the container adapter
//! needs: create, start, stop, remove, inspect, one-shot stats.
//!
//! ## Design Notes
//! - hyper + hyperlocal for HTTP over `/var/run/docker.sock`; the
//!   daemon speaks plain HTTP/1.1 on that socket.
//! - Each endpoint maps its interesting status codes explicitly;
//!   "already stopped" (304) and "not found" (404) are success for the
//!   teardown paths.
//! - Every request is bounded by a client-side timeout so a wedged
//!   daemon cannot stall the pool engine.

use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, Uri as UnixUri};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use warmpool_engine::{PoolError, PoolResult};

/// Default daemon socket
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Client-side bound on any single daemon call
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Container creation request body (Docker API v1.41+)
#[derive(Debug, Clone, Serialize)]
pub struct CreateContainerRequest {
    /// Image reference
    #[serde(rename = "Image")]
    pub image: String,
    /// Command to run
    #[serde(rename = "Cmd")]
    pub cmd: Vec<String>,
    /// Working directory inside the container
    #[serde(rename = "WorkingDir")]
    pub working_dir: String,
    /// Ports the container exposes
    #[serde(rename = "ExposedPorts")]
    pub exposed_ports: HashMap<String, EmptyObject>,
    /// Host-side configuration
    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
}

/// `{}` placeholder the daemon expects as an exposed-port value
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyObject {}

/// Host-side container configuration
#[derive(Debug, Clone, Serialize)]
pub struct HostConfig {
    /// Bind mounts, `host:container` form
    #[serde(rename = "Binds")]
    pub binds: Vec<String>,
    /// Exposed-port to host-port mapping
    #[serde(rename = "PortBindings")]
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
}

/// One host-port binding
#[derive(Debug, Clone, Serialize)]
pub struct PortBinding {
    /// Host port as the daemon wants it: a string
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Deserialize)]
struct CreateContainerResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: ContainerInspectState,
}

#[derive(Debug, Deserialize)]
struct ContainerInspectState {
    #[serde(rename = "Running")]
    running: bool,
}

/// One-shot container stats (`/stats?stream=false`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStats {
    /// Current CPU accounting
    #[serde(default)]
    pub cpu_stats: CpuStats,
    /// Previous CPU accounting
    #[serde(default)]
    pub precpu_stats: CpuStats,
    /// Memory accounting
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

/// CPU accounting block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    /// Per-container usage
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    /// Host CPU time
    #[serde(default)]
    pub system_cpu_usage: u64,
    /// CPUs available to the container
    #[serde(default)]
    pub online_cpus: u32,
}

/// Per-container CPU usage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    /// Total CPU time consumed, nanoseconds
    #[serde(default)]
    pub total_usage: u64,
}

/// Memory accounting block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    /// Current usage in bytes
    #[serde(default)]
    pub usage: u64,
}

/// CPU percentage from a one-shot stats sample.
///
/// `(cpuDelta / systemDelta) * online_cpus * 100` when both deltas are
/// positive, else 0. A daemon reporting `online_cpus` as 0 therefore
/// yields 0.
pub fn cpu_percent(stats: &ContainerStats) -> f64 {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage) as f64;
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .saturating_sub(stats.precpu_stats.system_cpu_usage) as f64;
    if cpu_delta > 0.0 && system_delta > 0.0 {
        (cpu_delta / system_delta) * f64::from(stats.cpu_stats.online_cpus) * 100.0
    } else {
        0.0
    }
}

/// Typed client for the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: String,
    client: Client<hyperlocal::UnixConnector>,
}

impl DockerClient {
    /// Client talking to the daemon socket at `socket_path`.
    ///
    /// The socket is not checked here; the first call surfaces a
    /// missing daemon.
    pub fn new<P: Into<String>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Client::unix(),
        }
    }

    /// Create a named container; returns the daemon-assigned id.
    pub async fn create_container(
        &self,
        name: &str,
        request: &CreateContainerRequest,
    ) -> PoolResult<String> {
        let body = serde_json::to_string(request)?;
        let (status, bytes) = self
            .request(
                Method::POST,
                &format!("/containers/create?name={name}"),
                Some(body),
            )
            .await?;
        match status {
            StatusCode::CREATED => {
                let created: CreateContainerResponse = serde_json::from_slice(&bytes)?;
                Ok(created.id)
            }
            StatusCode::NOT_FOUND => Err(PoolError::CreationFailure(format!(
                "image {} not present on the daemon",
                request.image
            ))),
            StatusCode::CONFLICT => Err(PoolError::CreationFailure(format!(
                "container name {name} already in use"
            ))),
            code => Err(PoolError::CreationFailure(format!(
                "container create returned {code}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    /// Start a created container.
    pub async fn start_container(&self, id: &str) -> PoolResult<()> {
        let (status, bytes) = self
            .request(Method::POST, &format!("/containers/{id}/start"), None)
            .await?;
        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            code => Err(PoolError::CreationFailure(format!(
                "container start returned {code}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    /// Stop a container, waiting up to `wait_secs` in the daemon.
    ///
    /// 304 (already stopped) and 404 (already gone) are success.
    pub async fn stop_container(&self, id: &str, wait_secs: u64) -> PoolResult<()> {
        let (status, bytes) = self
            .request(
                Method::POST,
                &format!("/containers/{id}/stop?t={wait_secs}"),
                None,
            )
            .await?;
        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED | StatusCode::NOT_FOUND => Ok(()),
            code => Err(PoolError::Transient(format!(
                "container stop returned {code}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    /// Remove a container; 404 is success.
    pub async fn remove_container(&self, id: &str, force: bool) -> PoolResult<()> {
        let (status, bytes) = self
            .request(
                Method::DELETE,
                &format!("/containers/{id}?force={force}"),
                None,
            )
            .await?;
        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            code => Err(PoolError::Transient(format!(
                "container remove returned {code}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    /// Whether the daemon reports the container as running.
    pub async fn inspect_running(&self, id: &str) -> PoolResult<bool> {
        let (status, bytes) = self
            .request(Method::GET, &format!("/containers/{id}/json"), None)
            .await?;
        match status {
            StatusCode::OK => {
                let inspect: ContainerInspect = serde_json::from_slice(&bytes)?;
                Ok(inspect.state.running)
            }
            StatusCode::NOT_FOUND => Ok(false),
            code => Err(PoolError::Transient(format!(
                "container inspect returned {code}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    /// One-shot stats sample.
    pub async fn stats(&self, id: &str) -> PoolResult<ContainerStats> {
        let (status, bytes) = self
            .request(
                Method::GET,
                &format!("/containers/{id}/stats?stream=false"),
                None,
            )
            .await?;
        match status {
            StatusCode::OK => Ok(serde_json::from_slice(&bytes)?),
            code => Err(PoolError::Transient(format!(
                "container stats returned {code}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<String>,
    ) -> PoolResult<(StatusCode, hyper::body::Bytes)> {
        let uri = UnixUri::new(&self.socket_path, path_and_query);
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let request = builder
            .body(Body::from(body.unwrap_or_default()))
            .map_err(|err| PoolError::Transient(format!("request build failed: {err}")))?;

        let response = tokio::time::timeout(API_TIMEOUT, self.client.request(request))
            .await
            .map_err(|_| PoolError::Transient("docker daemon call timed out".to_string()))?
            .map_err(|err| PoolError::Transient(format!("docker daemon call failed: {err}")))?;

        let status = response.status();
        let bytes = tokio::time::timeout(API_TIMEOUT, hyper::body::to_bytes(response.into_body()))
            .await
            .map_err(|_| PoolError::Transient("docker response read timed out".to_string()))?
            .map_err(|err| PoolError::Transient(format!("docker response read failed: {err}")))?;
        Ok((status, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, pre_total: u64, system: u64, pre_system: u64, cpus: u32) -> ContainerStats {
        ContainerStats {
            cpu_stats: CpuStats {
                cpu_usage: CpuUsage { total_usage: total },
                system_cpu_usage: system,
                online_cpus: cpus,
            },
            precpu_stats: CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: pre_total,
                },
                system_cpu_usage: pre_system,
                online_cpus: cpus,
            },
            memory_stats: MemoryStats::default(),
        }
    }

    #[test]
    fn test_cpu_percent_formula() {
        // 50ns of 1000ns across 4 CPUs -> 20%.
        let sample = stats(150, 100, 2000, 1000, 4);
        assert!((cpu_percent(&sample) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cpu_percent_zero_when_deltas_missing() {
        assert_eq!(cpu_percent(&stats(100, 100, 2000, 1000, 4)), 0.0);
        assert_eq!(cpu_percent(&stats(150, 100, 1000, 1000, 4)), 0.0);
        assert_eq!(cpu_percent(&ContainerStats::default()), 0.0);
    }

    #[test]
    fn test_cpu_percent_zero_without_online_cpus() {
        let sample = stats(150, 100, 2000, 1000, 0);
        assert_eq!(cpu_percent(&sample), 0.0);
    }

    #[test]
    fn test_create_request_serialization() {
        let mut exposed = HashMap::new();
        exposed.insert("8080/tcp".to_string(), EmptyObject::default());
        let mut bindings = HashMap::new();
        bindings.insert(
            "8080/tcp".to_string(),
            vec![PortBinding {
                host_port: "32001".to_string(),
            }],
        );
        let request = CreateContainerRequest {
            image: "node:20-alpine".to_string(),
            cmd: vec!["node".to_string(), "/app/index.js".to_string()],
            working_dir: "/app".to_string(),
            exposed_ports: exposed,
            host_config: HostConfig {
                binds: vec!["/srv/scripts/index.js:/app/index.js".to_string()],
                port_bindings: bindings,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["Image"], "node:20-alpine");
        assert_eq!(json["HostConfig"]["Binds"][0], "/srv/scripts/index.js:/app/index.js");
        assert_eq!(
            json["HostConfig"]["PortBindings"]["8080/tcp"][0]["HostPort"],
            "32001"
        );
        assert!(json["ExposedPorts"]["8080/tcp"].is_object());
    }

    #[test]
    fn test_stats_deserialization() {
        let json = r#"{
            "cpu_stats": {"cpu_usage": {"total_usage": 300}, "system_cpu_usage": 5000, "online_cpus": 2},
            "precpu_stats": {"cpu_usage": {"total_usage": 100}, "system_cpu_usage": 4000},
            "memory_stats": {"usage": 1048576}
        }"#;
        let parsed: ContainerStats = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.memory_stats.usage, 1_048_576);
        assert!((cpu_percent(&parsed) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_client_creation() {
        let client = DockerClient::new(DEFAULT_DOCKER_SOCKET);
        assert_eq!(client.socket_path, DEFAULT_DOCKER_SOCKET);
    }
}
