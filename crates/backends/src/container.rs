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

//! # Container Adapter
//!
//! ## Purpose
//! Pools containers on the local Docker daemon: one exposed TCP port
//! mapped to the leased host port, the script files bind-mounted into
//! the container's working directory, a fixed command.
//!
//! ## Teardown
//! Graceful daemon-side stop within the shutdown budget, force-remove
//! on failure; 304 and 404 from the daemon are success.

use crate::docker::{
    cpu_percent, CreateContainerRequest, DockerClient, EmptyObject, HostConfig, PortBinding,
    DEFAULT_DOCKER_SOCKET,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use warmpool_engine::{
    Adapter, AdapterContext, ManagerConfig, NativeResource, PoolError, PoolResult,
    ResourceHandle, ResourceType, UsageSample,
};

/// Working directory the scripts are mounted into
const CONTAINER_WORKDIR: &str = "/app";

/// Adapter pooling local Docker containers
pub struct ContainerAdapter {
    docker: DockerClient,
    stop_timeout: Duration,
}

impl ContainerAdapter {
    /// Container adapter against the default daemon socket.
    pub fn new(config: &ManagerConfig) -> Self {
        Self::with_socket(config, DEFAULT_DOCKER_SOCKET)
    }

    /// Container adapter against a specific daemon socket.
    pub fn with_socket(config: &ManagerConfig, socket_path: &str) -> Self {
        Self {
            docker: DockerClient::new(socket_path),
            stop_timeout: config.shutdown_timeout(ResourceType::Container),
        }
    }

    /// Request body for one pooled container.
    fn build_create_request(ctx: &AdapterContext<'_>) -> CreateContainerRequest {
        let config = ctx.config;
        let container_port = format!("{}/tcp", config.container_port);

        let binds = config
            .script_files
            .iter()
            .filter_map(|file| {
                config.script_dir_path.as_ref().map(|dir| {
                    format!(
                        "{}:{CONTAINER_WORKDIR}/{file}",
                        dir.join(file).display()
                    )
                })
            })
            .collect();

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port.clone(), EmptyObject::default());
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port,
            vec![PortBinding {
                host_port: ctx.port.to_string(),
            }],
        );

        let entry = config
            .script_files
            .first()
            .map(String::as_str)
            .unwrap_or("index.js");
        CreateContainerRequest {
            image: config.default_image_name.clone(),
            cmd: vec![
                config.interpreter.clone(),
                format!("{CONTAINER_WORKDIR}/{entry}"),
                config.container_port.to_string(),
            ],
            working_dir: CONTAINER_WORKDIR.to_string(),
            exposed_ports,
            host_config: HostConfig {
                binds,
                port_bindings,
            },
        }
    }
}

#[async_trait]
impl Adapter for ContainerAdapter {
    fn type_tag(&self) -> ResourceType {
        ResourceType::Container
    }

    fn validate(&self, config: &ManagerConfig) -> PoolResult<()> {
        if config.script_files.is_empty() {
            return Ok(()); // self-contained image
        }
        let dir = config.script_dir_path.as_ref().ok_or_else(|| {
            PoolError::BadConfig(
                "scriptDirPath is required when scriptFiles are configured".to_string(),
            )
        })?;
        for file in &config.script_files {
            let path = dir.join(file);
            std::fs::metadata(&path).map_err(|err| {
                PoolError::BadConfig(format!(
                    "script {} is not readable: {err}",
                    path.display()
                ))
            })?;
        }
        Ok(())
    }

    async fn create(&self, ctx: AdapterContext<'_>) -> PoolResult<NativeResource> {
        let container_name = ctx.name.to_string();
        let request = Self::build_create_request(&ctx);

        let docker = self.docker.clone();
        let provisioned = tokio::time::timeout(ctx.timeout, async {
            let id = docker.create_container(&container_name, &request).await?;
            if let Err(err) = docker.start_container(&id).await {
                let _ = docker.remove_container(&id, true).await;
                return Err(err);
            }
            Ok(id)
        })
        .await;

        match provisioned {
            Ok(Ok(id)) => Ok(NativeResource::Container { id, container_name }),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                // Deadline: whatever was created under this name must
                // not survive as an orphan.
                let _ = self.docker.remove_container(&container_name, true).await;
                Err(PoolError::CreationTimeout {
                    name: container_name,
                    timeout: ctx.timeout,
                })
            }
        }
    }

    async fn terminate(&self, handle: &mut ResourceHandle) -> PoolResult<()> {
        let NativeResource::Container { id, .. } = &handle.native else {
            return Ok(());
        };

        let stopped = tokio::time::timeout(
            self.stop_timeout,
            self.docker.stop_container(id, self.stop_timeout.as_secs()),
        )
        .await;
        match stopped {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(
                    name = %handle.name,
                    container_id = %id,
                    error = %err,
                    "graceful container stop failed, force removing"
                );
                self.docker.remove_container(id, true).await
            }
            Err(_) => {
                warn!(
                    name = %handle.name,
                    container_id = %id,
                    "container stop exceeded shutdown budget, force removing"
                );
                self.docker.remove_container(id, true).await
            }
        }
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        let NativeResource::Container { id, .. } = &handle.native else {
            return false;
        };
        self.docker.inspect_running(id).await.unwrap_or(false)
    }

    async fn usage(&self, handle: &mut ResourceHandle) -> Option<UsageSample> {
        let NativeResource::Container { id, .. } = &handle.native else {
            return None;
        };
        let stats = self.docker.stats(id).await.ok()?;
        Some(UsageSample {
            cpu_percent: cpu_percent(&stats),
            memory_bytes: stats.memory_stats.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn context<'a>(config: &'a ManagerConfig, name: &'a str) -> AdapterContext<'a> {
        AdapterContext {
            port: 32001,
            name,
            config,
            timeout: Duration::from_secs(30),
            events: mpsc::unbounded_channel().0,
        }
    }

    #[test]
    fn test_build_create_request_maps_ports_and_scripts() {
        let config = ManagerConfig {
            script_dir_path: Some("/srv/scripts".into()),
            script_files: vec!["index.js".to_string(), "lib.js".to_string()],
            ..Default::default()
        };
        let ctx = context(&config, "container-32001-1700000000000");
        let request = ContainerAdapter::build_create_request(&ctx);

        assert_eq!(request.image, "node:20-alpine");
        assert_eq!(
            request.cmd,
            vec!["node".to_string(), "/app/index.js".to_string(), "8080".to_string()]
        );
        assert_eq!(request.working_dir, "/app");
        assert!(request
            .host_config
            .binds
            .contains(&"/srv/scripts/index.js:/app/index.js".to_string()));
        assert!(request
            .host_config
            .binds
            .contains(&"/srv/scripts/lib.js:/app/lib.js".to_string()));
        assert_eq!(
            request.host_config.port_bindings["8080/tcp"][0].host_port,
            "32001"
        );
        assert!(request.exposed_ports.contains_key("8080/tcp"));
    }

    #[test]
    fn test_validate_requires_dir_for_scripts() {
        let adapter = ContainerAdapter::new(&ManagerConfig::default());
        let config = ManagerConfig {
            script_files: vec!["index.js".to_string()],
            ..Default::default()
        };
        let err = adapter.validate(&config).unwrap_err();
        assert_eq!(err.kind(), "BadConfig");

        // No scripts at all is fine: the image is self-contained.
        adapter.validate(&ManagerConfig::default()).unwrap();
    }
}
