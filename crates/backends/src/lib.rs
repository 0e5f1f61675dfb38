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

//! # Warmpool Backends
//!
//! ## Purpose
//! The four [`Adapter`] implementations behind the Warmpool engine:
//!
//! - [`WorkerAdapter`]: in-process workers on dedicated threads
//! - [`ProcessAdapter`]: interpreter child processes
//! - [`ContainerAdapter`]: local Docker containers
//! - [`PodAdapter`]: remote Kubernetes pods
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use warmpool_backends::adapter_for;
//! use warmpool_engine::{ManagerConfig, PoolEngine, ResourceType};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::default();
//! let adapter = adapter_for(ResourceType::Container, &config);
//! let engine = PoolEngine::new(adapter, config)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod docker;
pub mod pod;
pub mod process;
pub mod worker;

use std::sync::Arc;
use warmpool_engine::{Adapter, ManagerConfig, ResourceType};

pub use container::ContainerAdapter;
pub use docker::{DockerClient, DEFAULT_DOCKER_SOCKET};
pub use pod::PodAdapter;
pub use process::ProcessAdapter;
pub use worker::{
    default_entrypoint, OnlineSignal, WorkerAdapter, WorkerContext, WorkerEntrypoint,
    WorkerFuture,
};

/// Build the adapter for a resource kind with its default wiring.
pub fn adapter_for(kind: ResourceType, config: &ManagerConfig) -> Arc<dyn Adapter> {
    match kind {
        ResourceType::Worker => Arc::new(WorkerAdapter::new(config)),
        ResourceType::Process => Arc::new(ProcessAdapter::new(config)),
        ResourceType::Container => Arc::new(ContainerAdapter::new(config)),
        ResourceType::Pod => Arc::new(PodAdapter::new(config)),
    }
}
