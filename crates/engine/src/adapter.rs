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

//! # Adapter Contract
//!
//! ## Purpose
//! The backend-specific plug the generic engine delegates to: create,
//! terminate, liveness, usage, adapter-wide teardown.
//!
//! ## Contract
//! - `create` enforces `AdapterContext::timeout` itself and destroys
//!   anything it started before returning `CreationTimeout`; the engine
//!   never drops an in-flight `create` future, so cleanup code always
//!   runs.
//! - `terminate` is graceful within the kind's shutdown budget, then
//!   forceful; it is idempotent and "already gone" is success.
//! - `liveness` is cheap and maps every probe failure to `false`.
//! - `usage` returns `None` where the backend cannot measure.

use crate::config::ManagerConfig;
use crate::error::PoolResult;
use crate::handle::{NativeResource, ResourceHandle, ResourceType, UsageSample};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Asynchronous notification from an adapter back to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A resource died on its own after entering the pool
    Exited {
        /// Name of the dead resource
        name: String,
    },
}

/// Everything an adapter needs to provision one resource
#[derive(Debug)]
pub struct AdapterContext<'a> {
    /// Host TCP port leased for this resource
    pub port: u16,
    /// Handle name, `<type>-<port>-<createdAtEpochMs>`
    pub name: &'a str,
    /// Configuration in effect for this acquisition
    pub config: &'a ManagerConfig,
    /// Provisioning deadline the adapter must enforce
    pub timeout: Duration,
    /// Channel for post-admission death notifications
    pub events: mpsc::UnboundedSender<ResourceEvent>,
}

/// Backend-specific operations behind the generic pool engine
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Kind of resource this adapter manages.
    fn type_tag(&self) -> ResourceType;

    /// Precondition check run at the top of every acquisition.
    ///
    /// Fails `BadConfig` when mandatory input for this kind is missing
    /// or unreadable (e.g. the script directory for worker/process
    /// pools).
    fn validate(&self, config: &ManagerConfig) -> PoolResult<()>;

    /// Provision one resource bound to `(ctx.port, ctx.name)`.
    ///
    /// Must resolve within `ctx.timeout`; on the deadline path the
    /// adapter tears down whatever it started and returns
    /// `CreationTimeout` so no orphan survives.
    async fn create(&self, ctx: AdapterContext<'_>) -> PoolResult<NativeResource>;

    /// Stop the resource, gracefully first, forcefully on budget expiry.
    async fn terminate(&self, handle: &mut ResourceHandle) -> PoolResult<()>;

    /// Cheap aliveness probe; probe failure means `false`.
    async fn liveness(&self, handle: &ResourceHandle) -> bool;

    /// Sample CPU/memory usage; `None` where unsupported or the
    /// resource is gone. May update per-handle scratch state.
    async fn usage(&self, handle: &mut ResourceHandle) -> Option<UsageSample>;

    /// Adapter-wide cleanup hook invoked once during engine shutdown.
    async fn on_shutdown(&self) {}
}
