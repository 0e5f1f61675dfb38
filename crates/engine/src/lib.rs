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

//! # Warmpool Engine
//!
//! ## Purpose
//! Generic pool engine for serverless execution resources. A
//! [`PoolEngine`] owns a bounded pool of live resources behind one
//! [`Adapter`] and provides:
//!
//! - acquisition with warm-pool selection and capacity-bounded creation
//! - liveness verification before a resource is handed out
//! - idle eviction and pre-warming on a timer
//! - usage monitoring on a timer
//! - per-manager Prometheus metrics
//! - signal-wired graceful drain
//!
//! ## Key Components
//! - [`engine`]: the pool engine and its timers
//! - [`adapter`]: the backend plug contract
//! - [`handle`]: pooled-resource records and projections
//! - [`config`]: the recognized option set and its loaders
//! - [`metrics`]: per-manager counters and text exposition
//! - [`ports`]: free-port allocation
//! - [`lifecycle`]: OS signal wiring
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use warmpool_engine::{ManagerConfig, PoolEngine};
//! # use warmpool_engine::Adapter;
//! # async fn example(adapter: Arc<dyn Adapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PoolEngine::new(adapter, ManagerConfig::default())?;
//! let resource = engine.acquire().await?;
//! println!("got {} on port {}", resource.name, resource.port);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod metrics;
pub mod ports;

pub use adapter::{Adapter, AdapterContext, ResourceEvent};
pub use config::ManagerConfig;
pub use engine::{
    select_index, HealthReport, PoolEngine, PoolInfo, DEFAULT_MONITOR_INTERVAL,
};
pub use error::{PoolError, PoolResult};
pub use handle::{
    epoch_ms, HandleProjection, NativeResource, ProcessCell, ResourceHandle, ResourceType,
    ResourceUsage, UsageSample, WorkerCell, WorkerCpuSample,
};
pub use lifecycle::{wait_for_shutdown_signal, ShutdownSignal};
pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use ports::PortAllocator;
