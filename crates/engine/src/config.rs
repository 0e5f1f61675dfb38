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

//! # Manager Configuration
//!
//! ## Purpose
//! One recognized option set shared by the engine and every adapter,
//! loadable from JSON or YAML files or from environment variables.
//!
//! ## Precedence
//! 1. Explicit file (`from_file`)
//! 2. Environment variables (`from_env`, `WARMPOOL_` prefix)
//! 3. `Default::default()`
//!
//! Durations are carried as milliseconds in the file form and exposed as
//! `Duration` through accessor methods so per-kind defaults live in one
//! place.

use crate::error::{PoolError, PoolResult};
use crate::handle::ResourceType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pool manager configuration
///
/// Every field has a default; a bare `{}` (or empty YAML document) is a
/// valid configuration. Adapter preconditions (`Adapter::validate`)
/// decide which options are mandatory for a given kind.
///
/// Configuration files use the camelCase option names (accepted as
/// serde aliases); environment loading uses the snake_case field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Upper bound on pool size
    #[serde(alias = "maxPoolSize")]
    pub max_pool_size: usize,

    /// Pre-warm target; clamped to `max_pool_size`
    #[serde(alias = "minPoolSize")]
    pub min_pool_size: usize,

    /// Idle-eviction period and threshold, in ms
    #[serde(alias = "poolCheckInterval")]
    pub pool_check_interval: u64,

    /// Per-resource graceful-termination budget in ms (per-kind default
    /// when absent)
    #[serde(alias = "shutdownTimeout")]
    pub shutdown_timeout: Option<u64>,

    /// Creation budget for worker resources, in ms
    #[serde(alias = "workerTimeout")]
    pub worker_timeout: Option<u64>,

    /// Creation budget for process resources, in ms
    #[serde(alias = "processTimeout")]
    pub process_timeout: Option<u64>,

    /// Creation budget for container resources, in ms
    #[serde(alias = "containerTimeout")]
    pub container_timeout: Option<u64>,

    /// Creation budget for pod resources, in ms
    #[serde(alias = "podTimeout")]
    pub pod_timeout: Option<u64>,

    /// Directory holding the code a resource runs
    #[serde(alias = "scriptDirPath")]
    pub script_dir_path: Option<PathBuf>,

    /// Script file names inside `script_dir_path`
    #[serde(alias = "scriptFiles")]
    pub script_files: Vec<String>,

    /// Image used for container and pod resources
    #[serde(alias = "defaultImageName")]
    pub default_image_name: String,

    /// Base container name
    #[serde(alias = "defaultContainerName")]
    pub default_container_name: String,

    /// Kubernetes namespace for pod resources
    pub namespace: String,

    /// Base pod/container name inside the pod spec
    #[serde(alias = "defaultPodName")]
    pub default_pod_name: String,

    /// Fixed in-pod port the entrypoint listens on
    #[serde(alias = "defaultPodPort")]
    pub default_pod_port: u16,

    /// Fixed in-container port the entrypoint listens on
    #[serde(alias = "containerPort")]
    pub container_port: u16,

    /// Interpreter binary for process resources
    pub interpreter: String,

    /// Worker old-generation heap budget, MB
    #[serde(alias = "workerOldGenMb")]
    pub worker_old_gen_mb: u32,

    /// Worker young-generation heap budget, MB
    #[serde(alias = "workerYoungGenMb")]
    pub worker_young_gen_mb: u32,

    /// Manager label for metrics; defaults to `<Type>Manager`
    #[serde(alias = "managerName")]
    pub manager_name: Option<String>,

    /// Configuration used when pre-warming up to `min_pool_size`
    #[serde(alias = "preWarmConfig")]
    pub pre_warm_config: Option<Box<ManagerConfig>>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 3,
            min_pool_size: 0,
            pool_check_interval: 10_000,
            shutdown_timeout: None,
            worker_timeout: None,
            process_timeout: None,
            container_timeout: None,
            pod_timeout: None,
            script_dir_path: None,
            script_files: Vec::new(),
            default_image_name: "node:20-alpine".to_string(),
            default_container_name: "warmpool".to_string(),
            namespace: "default".to_string(),
            default_pod_name: "warmpool-pod".to_string(),
            default_pod_port: 9000,
            container_port: 8080,
            interpreter: "node".to_string(),
            worker_old_gen_mb: 100,
            worker_young_gen_mb: 50,
            manager_name: None,
            pre_warm_config: None,
        }
    }
}

impl ManagerConfig {
    /// Load from a configuration file, dispatching on the extension.
    ///
    /// `.json` parses as JSON, `.yaml`/`.yml` as YAML; anything else is
    /// a `BadConfig` error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PoolResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match ext.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => {
                return Err(PoolError::BadConfig(format!(
                    "unsupported config extension '{other}' for {}",
                    path.display()
                )))
            }
        };
        Ok(config.normalized())
    }

    /// Load from `WARMPOOL_`-prefixed environment variables.
    ///
    /// Variables map onto the snake_case field names, e.g.
    /// `WARMPOOL_MAX_POOL_SIZE=5`; `__` separates nested keys
    /// (`WARMPOOL_PRE_WARM_CONFIG__MAX_POOL_SIZE=1`) and `script_files`
    /// accepts a comma-separated list.
    pub fn from_env() -> PoolResult<Self> {
        use config::{Config, Environment};

        let loaded = Config::builder()
            .add_source(
                Environment::with_prefix("WARMPOOL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("script_files"),
            )
            .build()
            .map_err(|e| PoolError::BadConfig(format!("environment load failed: {e}")))?;
        let config: Self = loaded
            .try_deserialize()
            .map_err(|e| PoolError::BadConfig(format!("environment deserialize failed: {e}")))?;
        Ok(config.normalized())
    }

    /// Load with the standard precedence: explicit file, then
    /// environment, then defaults.
    pub fn load(path: Option<&Path>) -> PoolResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        Ok(Self::from_env().unwrap_or_default())
    }

    /// Clamp inconsistent bounds; `min_pool_size` never exceeds
    /// `max_pool_size`.
    pub fn normalized(mut self) -> Self {
        if self.min_pool_size > self.max_pool_size {
            self.min_pool_size = self.max_pool_size;
        }
        self
    }

    /// Idle-eviction period and threshold.
    pub fn pool_check_interval(&self) -> Duration {
        Duration::from_millis(self.pool_check_interval)
    }

    /// Provisioning budget for the given kind (30 s default, 60 s for
    /// pods).
    pub fn creation_timeout(&self, kind: ResourceType) -> Duration {
        let configured = match kind {
            ResourceType::Worker => self.worker_timeout,
            ResourceType::Process => self.process_timeout,
            ResourceType::Container => self.container_timeout,
            ResourceType::Pod => self.pod_timeout,
        };
        let default_ms = match kind {
            ResourceType::Pod => 60_000,
            _ => 30_000,
        };
        Duration::from_millis(configured.unwrap_or(default_ms))
    }

    /// Graceful-termination budget for the given kind.
    pub fn shutdown_timeout(&self, kind: ResourceType) -> Duration {
        let default_ms = match kind {
            ResourceType::Worker | ResourceType::Process => 5_000,
            ResourceType::Container => 10_000,
            ResourceType::Pod => 15_000,
        };
        Duration::from_millis(self.shutdown_timeout.unwrap_or(default_ms))
    }

    /// Manager label used in metrics, e.g. `ContainerManager`.
    pub fn manager_label(&self, kind: ResourceType) -> String {
        self.manager_name
            .clone()
            .unwrap_or_else(|| format!("{}Manager", kind.capitalized()))
    }

    /// Configuration to use when pre-warming.
    pub fn pre_warm(&self) -> &ManagerConfig {
        self.pre_warm_config.as_deref().unwrap_or(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_pool_size, 3);
        assert_eq!(config.min_pool_size, 0);
        assert_eq!(config.pool_check_interval(), Duration::from_secs(10));
        assert_eq!(
            config.creation_timeout(ResourceType::Container),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.creation_timeout(ResourceType::Pod),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.shutdown_timeout(ResourceType::Worker),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.shutdown_timeout(ResourceType::Pod),
            Duration::from_secs(15)
        );
        assert_eq!(config.manager_label(ResourceType::Pod), "PodManager");
    }

    #[test]
    fn test_min_pool_size_clamped_to_max() {
        let config = ManagerConfig {
            max_pool_size: 2,
            min_pool_size: 5,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.min_pool_size, 2);
    }

    #[test]
    fn test_json_and_yaml_forms_are_equivalent() {
        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            json_file,
            r#"{{"maxPoolSize": 5, "poolCheckInterval": 2000, "scriptFiles": ["index.js"]}}"#
        )
        .unwrap();

        let mut yaml_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            yaml_file,
            "maxPoolSize: 5\npoolCheckInterval: 2000\nscriptFiles:\n  - index.js\n"
        )
        .unwrap();

        let from_json = ManagerConfig::from_file(json_file.path()).unwrap();
        let from_yaml = ManagerConfig::from_file(yaml_file.path()).unwrap();
        assert_eq!(from_json.max_pool_size, 5);
        assert_eq!(from_json.max_pool_size, from_yaml.max_pool_size);
        assert_eq!(from_json.pool_check_interval, from_yaml.pool_check_interval);
        assert_eq!(from_json.script_files, from_yaml.script_files);
    }

    #[test]
    fn test_from_env_reads_prefixed_variables() {
        std::env::set_var("WARMPOOL_MAX_POOL_SIZE", "7");
        std::env::set_var("WARMPOOL_DEFAULT_IMAGE_NAME", "node:22-alpine");
        std::env::set_var("WARMPOOL_SCRIPT_FILES", "index.js,lib.js");

        let config = ManagerConfig::from_env().unwrap();

        std::env::remove_var("WARMPOOL_MAX_POOL_SIZE");
        std::env::remove_var("WARMPOOL_DEFAULT_IMAGE_NAME");
        std::env::remove_var("WARMPOOL_SCRIPT_FILES");

        assert_eq!(config.max_pool_size, 7);
        assert_eq!(config.default_image_name, "node:22-alpine");
        assert_eq!(config.script_files, vec!["index.js", "lib.js"]);
    }

    #[test]
    fn test_load_prefers_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"maxPoolSize": 9}}"#).unwrap();

        let config = ManagerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_pool_size, 9);
    }

    #[test]
    fn test_unknown_extension_fails_bad_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "maxPoolSize = 5").unwrap();

        let err = ManagerConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), "BadConfig");
    }

    #[test]
    fn test_pre_warm_falls_back_to_self() {
        let config = ManagerConfig {
            max_pool_size: 7,
            ..Default::default()
        };
        assert_eq!(config.pre_warm().max_pool_size, 7);

        let with_override = ManagerConfig {
            pre_warm_config: Some(Box::new(ManagerConfig {
                script_files: vec!["warm.js".to_string()],
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(with_override.pre_warm().script_files, vec!["warm.js"]);
    }

    #[test]
    fn test_custom_manager_name_wins() {
        let config = ManagerConfig {
            manager_name: Some("EdgeManager".to_string()),
            ..Default::default()
        };
        assert_eq!(config.manager_label(ResourceType::Worker), "EdgeManager");
    }
}
