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

//! # Pod Adapter
//!
//! ## Purpose
//! Pools pods on a remote Kubernetes cluster. Scripts travel in a
//! `scripts` ConfigMap; each pod copies them into a writable directory,
//! installs dependencies and runs the entrypoint on a fixed in-pod
//! port. A local `kubectl port-forward` child maps the leased host port
//! to that in-pod port and is tracked by handle name.
//!
//! ## Teardown
//! Forwarder first, then pod deletion polled to completion within the
//! shutdown budget, then force-delete with zero grace; 404 anywhere is
//! success.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, Pod, PodSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use warmpool_engine::{
    Adapter, AdapterContext, ManagerConfig, NativeResource, PoolError, PoolResult,
    ResourceHandle, ResourceType, UsageSample,
};

/// ConfigMap the scripts are shipped in
const SCRIPTS_CONFIG_MAP: &str = "scripts";

/// Mount point of the scripts ConfigMap inside the pod
const SCRIPTS_MOUNT_PATH: &str = "/scripts";

/// Readiness poll budget: attempts x interval
const READY_ATTEMPTS: u32 = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval while waiting for a deleted pod to disappear
const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Dependency manifest shipped alongside the scripts
const DEPENDENCY_MANIFEST: &str = "{\n  \"name\": \"warmpool-scripts\",\n  \"private\": true,\n  \"dependencies\": {}\n}\n";

/// `kubectl port-forward` argument list for one pod.
fn kubectl_args(pod_name: &str, namespace: &str, host_port: u16, pod_port: u16) -> Vec<String> {
    vec![
        "port-forward".to_string(),
        format!("pod/{pod_name}"),
        format!("{host_port}:{pod_port}"),
        "-n".to_string(),
        namespace.to_string(),
    ]
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}

/// Adapter pooling remote Kubernetes pods
pub struct PodAdapter {
    client: OnceCell<Client>,
    forwarders: Mutex<HashMap<String, Child>>,
    kubectl: String,
    shutdown_timeout: Duration,
}

impl PodAdapter {
    /// Pod adapter using default cluster credentials and `kubectl` from
    /// `PATH` for forwarding.
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            client: OnceCell::new(),
            forwarders: Mutex::new(HashMap::new()),
            kubectl: "kubectl".to_string(),
            shutdown_timeout: config.shutdown_timeout(ResourceType::Pod),
        }
    }

    /// Lazily build the cluster client from the default environment.
    async fn cluster(&self) -> PoolResult<&Client> {
        self.client
            .get_or_try_init(|| async {
                Client::try_default().await.map_err(|err| {
                    PoolError::CreationFailure(format!("cluster client init failed: {err}"))
                })
            })
            .await
    }

    /// Concatenate the script files plus a minimal dependency manifest.
    fn build_config_map(config: &ManagerConfig) -> PoolResult<ConfigMap> {
        let dir = config.script_dir_path.as_ref().ok_or_else(|| {
            PoolError::BadConfig("scriptDirPath is required for pod pools".to_string())
        })?;
        let mut data = BTreeMap::new();
        for file in &config.script_files {
            let path = dir.join(file);
            let content = std::fs::read_to_string(&path).map_err(|err| {
                PoolError::BadConfig(format!(
                    "script {} is not readable: {err}",
                    path.display()
                ))
            })?;
            data.insert(file.clone(), content);
        }
        data.entry("package.json".to_string())
            .or_insert_with(|| DEPENDENCY_MANIFEST.to_string());

        Ok(ConfigMap {
            metadata: ObjectMeta {
                name: Some(SCRIPTS_CONFIG_MAP.to_string()),
                namespace: Some(config.namespace.clone()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    /// Pod manifest: one container, scripts mounted, entrypoint on the
    /// fixed in-pod port.
    fn build_pod(name: &str, config: &ManagerConfig) -> Pod {
        let entry = config
            .script_files
            .first()
            .map(String::as_str)
            .unwrap_or("index.js");
        let bootstrap = format!(
            "mkdir -p /app && cp {SCRIPTS_MOUNT_PATH}/* /app && cd /app && \
             npm install --omit=dev >/dev/null 2>&1; exec {} {entry} {}",
            config.interpreter, config.default_pod_port
        );

        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "warmpool".to_string());
        labels.insert("warmpool/pool-member".to_string(), name.to_string());

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(config.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: config.default_pod_name.clone(),
                    image: Some(config.default_image_name.clone()),
                    command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                    args: Some(vec![bootstrap]),
                    ports: Some(vec![ContainerPort {
                        container_port: i32::from(config.default_pod_port),
                        ..Default::default()
                    }]),
                    volume_mounts: Some(vec![VolumeMount {
                        name: SCRIPTS_CONFIG_MAP.to_string(),
                        mount_path: SCRIPTS_MOUNT_PATH.to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: SCRIPTS_CONFIG_MAP.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: Some(SCRIPTS_CONFIG_MAP.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn provision(&self, ctx: &AdapterContext<'_>) -> PoolResult<NativeResource> {
        let config = ctx.config;
        let client = self.cluster().await?.clone();

        // Create-or-replace the scripts ConfigMap.
        let config_map = Self::build_config_map(config)?;
        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &config.namespace);
        match config_maps.create(&PostParams::default(), &config_map).await {
            Ok(_) => {}
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                config_maps
                    .replace(SCRIPTS_CONFIG_MAP, &PostParams::default(), &config_map)
                    .await
                    .map_err(|err| {
                        PoolError::CreationFailure(format!("configmap replace failed: {err}"))
                    })?;
            }
            Err(err) => {
                return Err(PoolError::CreationFailure(format!(
                    "configmap create failed: {err}"
                )))
            }
        }

        // Create the pod and wait for it to reach Running.
        let pods: Api<Pod> = Api::namespaced(client, &config.namespace);
        let pod = Self::build_pod(ctx.name, config);
        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|err| PoolError::CreationFailure(format!("pod create failed: {err}")))?;

        let mut running = false;
        for attempt in 0..READY_ATTEMPTS {
            tokio::time::sleep(READY_POLL_INTERVAL).await;
            match pods.get(ctx.name).await {
                Ok(pod) => {
                    let phase = pod
                        .status
                        .as_ref()
                        .and_then(|status| status.phase.as_deref())
                        .unwrap_or("Pending");
                    debug!(name = %ctx.name, attempt, phase, "pod readiness poll");
                    if phase == "Running" {
                        running = true;
                        break;
                    }
                    if phase == "Failed" {
                        break;
                    }
                }
                Err(err) => {
                    debug!(name = %ctx.name, attempt, error = %err, "pod readiness poll failed");
                }
            }
        }
        if !running {
            return Err(PoolError::CreationFailure(format!(
                "pod {} did not reach Running within the readiness budget",
                ctx.name
            )));
        }

        // Forward the leased host port into the pod.
        let forwarder = Command::new(&self.kubectl)
            .args(kubectl_args(
                ctx.name,
                &config.namespace,
                ctx.port,
                config.default_pod_port,
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                PoolError::CreationFailure(format!("port-forward spawn failed: {err}"))
            })?;
        self.forwarders
            .lock()
            .await
            .insert(ctx.name.to_string(), forwarder);

        info!(name = %ctx.name, port = ctx.port, "pod provisioned and forwarded");
        Ok(NativeResource::Pod {
            pod_name: ctx.name.to_string(),
            namespace: config.namespace.clone(),
        })
    }

    /// Kill and forget the forwarder tracked for `name`, if any.
    async fn kill_forwarder(&self, name: &str) {
        if let Some(mut child) = self.forwarders.lock().await.remove(name) {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!(name = %name, "port-forwarder stopped");
        }
    }

    /// Best-effort teardown of everything `provision` may have started.
    async fn cleanup_partial(&self, name: &str, namespace: &str) {
        self.kill_forwarder(name).await;
        if let Some(client) = self.client.get() {
            let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
            match pods.delete(name, &DeleteParams::default().grace_period(0)).await {
                Ok(_) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => {
                    warn!(name = %name, error = %err, "partial-pod cleanup failed");
                }
            }
        }
    }
}

#[async_trait]
impl Adapter for PodAdapter {
    fn type_tag(&self) -> ResourceType {
        ResourceType::Pod
    }

    fn validate(&self, config: &ManagerConfig) -> PoolResult<()> {
        if config.script_files.is_empty() {
            return Err(PoolError::BadConfig(
                "scriptFiles must name at least one script for pod pools".to_string(),
            ));
        }
        Self::build_config_map(config).map(|_| ())
    }

    async fn create(&self, ctx: AdapterContext<'_>) -> PoolResult<NativeResource> {
        let namespace = ctx.config.namespace.clone();
        match tokio::time::timeout(ctx.timeout, self.provision(&ctx)).await {
            Ok(Ok(native)) => Ok(native),
            Ok(Err(err)) => {
                self.cleanup_partial(ctx.name, &namespace).await;
                Err(err)
            }
            Err(_) => {
                self.cleanup_partial(ctx.name, &namespace).await;
                Err(PoolError::CreationTimeout {
                    name: ctx.name.to_string(),
                    timeout: ctx.timeout,
                })
            }
        }
    }

    async fn terminate(&self, handle: &mut ResourceHandle) -> PoolResult<()> {
        let NativeResource::Pod { pod_name, namespace } = &handle.native else {
            return Ok(());
        };
        self.kill_forwarder(pod_name).await;

        let Some(client) = self.client.get() else {
            return Ok(()); // nothing was ever provisioned through us
        };
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);

        let graceful = tokio::time::timeout(self.shutdown_timeout, async {
            match pods.delete(pod_name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(err) if is_not_found(&err) => return Ok(()),
                Err(err) => {
                    return Err(PoolError::Transient(format!("pod delete failed: {err}")))
                }
            }
            // The pod is gone once a read returns 404.
            loop {
                tokio::time::sleep(DELETE_POLL_INTERVAL).await;
                match pods.get(pod_name).await {
                    Ok(_) => {}
                    Err(err) if is_not_found(&err) => return Ok(()),
                    Err(err) => {
                        return Err(PoolError::Transient(format!(
                            "pod delete poll failed: {err}"
                        )))
                    }
                }
            }
        })
        .await;

        match graceful {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(name = %pod_name, error = %err, "graceful pod delete failed, forcing");
                self.force_delete(&pods, pod_name).await
            }
            Err(_) => {
                warn!(
                    name = %pod_name,
                    "pod delete exceeded shutdown budget, forcing zero-grace delete"
                );
                self.force_delete(&pods, pod_name).await
            }
        }
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        let NativeResource::Pod { pod_name, namespace } = &handle.native else {
            return false;
        };
        let Some(client) = self.client.get() else {
            return false;
        };
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        match pods.get(pod_name).await {
            Ok(pod) => pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                == Some("Running"),
            Err(_) => false,
        }
    }

    async fn usage(&self, _handle: &mut ResourceHandle) -> Option<UsageSample> {
        // Pod-level usage needs a metrics server; not measured here.
        None
    }

    async fn on_shutdown(&self) {
        let names: Vec<String> = self.forwarders.lock().await.keys().cloned().collect();
        for name in names {
            self.kill_forwarder(&name).await;
        }
    }
}

impl PodAdapter {
    async fn force_delete(&self, pods: &Api<Pod>, pod_name: &str) -> PoolResult<()> {
        match pods
            .delete(pod_name, &DeleteParams::default().grace_period(0))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(PoolError::TerminationTimeout(format!(
                "force delete of {pod_name} failed: {err}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_kubectl_args() {
        assert_eq!(
            kubectl_args("pod-9001-1700000000000", "serverless", 9001, 9000),
            vec![
                "port-forward",
                "pod/pod-9001-1700000000000",
                "9001:9000",
                "-n",
                "serverless",
            ]
        );
    }

    #[test]
    fn test_build_config_map_ships_scripts_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = std::fs::File::create(dir.path().join("index.js")).unwrap();
        write!(script, "console.log('up');").unwrap();

        let config = ManagerConfig {
            script_dir_path: Some(dir.path().to_path_buf()),
            script_files: vec!["index.js".to_string()],
            namespace: "serverless".to_string(),
            ..Default::default()
        };
        let config_map = PodAdapter::build_config_map(&config).unwrap();
        assert_eq!(config_map.metadata.name.as_deref(), Some("scripts"));
        assert_eq!(config_map.metadata.namespace.as_deref(), Some("serverless"));

        let data = config_map.data.unwrap();
        assert!(data["index.js"].contains("console.log"));
        assert!(data["package.json"].contains("warmpool-scripts"));
    }

    #[test]
    fn test_build_config_map_rejects_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            script_dir_path: Some(dir.path().to_path_buf()),
            script_files: vec!["ghost.js".to_string()],
            ..Default::default()
        };
        let err = PodAdapter::build_config_map(&config).unwrap_err();
        assert_eq!(err.kind(), "BadConfig");
    }

    #[test]
    fn test_build_pod_manifest() {
        let config = ManagerConfig {
            namespace: "serverless".to_string(),
            ..Default::default()
        };
        let pod = PodAdapter::build_pod("pod-9001-1700000000000", &config);

        assert_eq!(pod.metadata.name.as_deref(), Some("pod-9001-1700000000000"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("serverless"));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let container = &spec.containers[0];
        assert_eq!(container.name, "warmpool-pod");
        assert_eq!(container.image.as_deref(), Some("node:20-alpine"));
        assert_eq!(
            container.ports.as_ref().unwrap()[0].container_port,
            9000
        );
        let bootstrap = &container.args.as_ref().unwrap()[0];
        assert!(bootstrap.contains("cp /scripts/*"));
        assert!(bootstrap.contains("npm install"));
        assert!(bootstrap.contains("exec node index.js 9000"));

        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/scripts");
        let volume = &spec.volumes.as_ref().unwrap()[0];
        assert_eq!(
            volume.config_map.as_ref().unwrap().name.as_deref(),
            Some("scripts")
        );
    }
}
