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

//! # Generic Pool Engine
//!
//! ## Purpose
//! Owns the pool container, the idle-eviction timer, the resource
//! monitoring timer, the shutdown signal wiring and the acquisition
//! algorithm. Everything backend-specific goes through the [`Adapter`].
//!
//! ## Concurrency
//! One `tokio::sync::Mutex<PoolState>` serializes pool membership,
//! `last_request_time` and counter updates, so a `pool_info` reader can
//! never observe `additions` incremented without the handle being
//! present. Creation and termination I/O run outside the lock; the
//! capacity check is repeated under the lock after a successful create
//! to resolve the racy fill-up (the loser is terminated and never
//! counted as an addition).
//!
//! ## Timers
//! Both timers are detached tokio tasks holding only a `Weak` reference
//! to the engine; they never keep the engine (or the process) alive and
//! are aborted during shutdown.

use crate::adapter::{Adapter, AdapterContext, ResourceEvent};
use crate::config::ManagerConfig;
use crate::error::{PoolError, PoolResult};
use crate::handle::{
    epoch_ms, HandleProjection, ResourceHandle, ResourceType, ResourceUsage,
};
use crate::lifecycle;
use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::ports::PortAllocator;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default sampling period for resource monitoring
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Round-robin selection index derived from wall-clock seconds.
///
/// Bursts within one second keep revisiting the same handle; this is
/// the intended cache-warmth behavior, not a bug.
pub fn select_index(now_seconds: i64, len: usize) -> usize {
    debug_assert!(len > 0);
    now_seconds.rem_euclid(len as i64) as usize
}

/// Projection of the whole pool for observers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    /// Current pool size
    pub size: usize,
    /// Configured upper bound
    pub max: usize,
    /// Terminal flag
    pub shutting_down: bool,
    /// Whether the idle-eviction timer has been wired
    pub watcher_started: bool,
    /// Projected handles, oldest first
    pub resources: Vec<HandleProjection>,
    /// Counter snapshot consistent with `resources`
    pub metrics: MetricsSnapshot,
}

/// Result of a health check pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Kind managed by this pool; façades render the capitalized
    /// `total<Type>s` / `dead<Type>sRemoved` keys from it
    pub resource_type: ResourceType,
    /// Pool size after dead handles were removed
    pub total: usize,
    /// Handles removed because their liveness probe failed
    pub dead_removed: usize,
    /// `size > 0 || !shutting_down` (an empty pool on a live manager is
    /// healthy)
    pub healthy: bool,
}

#[derive(Default)]
struct TaskSet {
    watcher: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    events: Option<JoinHandle<()>>,
    signals: Option<JoinHandle<()>>,
}

struct PoolState {
    resources: HashMap<String, ResourceHandle>,
    order: VecDeque<String>,
    last_request_time: i64,
}

impl PoolState {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn insert(&mut self, handle: ResourceHandle) {
        self.order.push_back(handle.name.clone());
        self.resources.insert(handle.name.clone(), handle);
    }

    fn remove(&mut self, name: &str) -> Option<ResourceHandle> {
        let handle = self.resources.remove(name)?;
        self.order.retain(|n| n != name);
        Some(handle)
    }

    fn pop_oldest(&mut self) -> Option<ResourceHandle> {
        let name = self.order.pop_front()?;
        self.resources.remove(&name)
    }

    fn drain_all(&mut self) -> Vec<ResourceHandle> {
        let mut drained = Vec::with_capacity(self.order.len());
        while let Some(name) = self.order.pop_front() {
            if let Some(handle) = self.resources.remove(&name) {
                drained.push(handle);
            }
        }
        drained
    }
}

struct EngineInner {
    adapter: Arc<dyn Adapter>,
    config: ManagerConfig,
    metrics: PoolMetrics,
    state: Mutex<PoolState>,
    shutting_down: AtomicBool,
    watcher_started: AtomicBool,
    monitor_started: AtomicBool,
    events_tx: mpsc::UnboundedSender<ResourceEvent>,
    tasks: StdMutex<TaskSet>,
}

/// Generic pool engine over one [`Adapter`]
///
/// One engine instance manages exactly one resource kind. Cloning is
/// cheap and shares the underlying pool.
#[derive(Clone)]
pub struct PoolEngine {
    inner: Arc<EngineInner>,
}

impl PoolEngine {
    /// Build an engine over `adapter` and wire the signal handlers.
    ///
    /// `min_pool_size` is clamped to `max_pool_size`. Pre-warming does
    /// not happen here; the first `start_pool_watcher` (or the first
    /// acquisition) triggers it.
    pub fn new(adapter: Arc<dyn Adapter>, config: ManagerConfig) -> PoolResult<Self> {
        let config = config.normalized();
        let tag = adapter.type_tag();
        let metrics = PoolMetrics::new(tag.as_str(), &config.manager_label(tag))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(EngineInner {
            adapter,
            config,
            metrics,
            state: Mutex::new(PoolState {
                resources: HashMap::new(),
                order: VecDeque::new(),
                last_request_time: epoch_ms(),
            }),
            shutting_down: AtomicBool::new(false),
            watcher_started: AtomicBool::new(false),
            monitor_started: AtomicBool::new(false),
            events_tx,
            tasks: StdMutex::new(TaskSet::default()),
        });

        let events = tokio::spawn(EngineInner::event_loop(
            Arc::downgrade(&inner),
            events_rx,
        ));
        let signals = tokio::spawn(EngineInner::signal_loop(Arc::downgrade(&inner)));
        {
            let mut tasks = inner.tasks.lock().expect("task set lock");
            tasks.events = Some(events);
            tasks.signals = Some(signals);
        }

        Ok(Self { inner })
    }

    /// Kind of resource this engine manages.
    pub fn resource_type(&self) -> ResourceType {
        self.inner.adapter.type_tag()
    }

    /// Configuration in effect (after normalization).
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Whether the manager is terminal.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Acquire a ready resource using the engine's own configuration.
    pub async fn acquire(&self) -> PoolResult<HandleProjection> {
        self.inner.acquire(&self.inner.config).await
    }

    /// Acquire a ready resource with a per-call configuration override.
    pub async fn acquire_with(&self, config: &ManagerConfig) -> PoolResult<HandleProjection> {
        self.inner.acquire(config).await
    }

    /// Snapshot of the pool and its counters.
    pub async fn pool_info(&self) -> PoolInfo {
        let state = self.inner.state.lock().await;
        PoolInfo {
            size: state.len(),
            max: self.inner.config.max_pool_size,
            shutting_down: self.is_shutting_down(),
            watcher_started: self.inner.watcher_started.load(Ordering::SeqCst),
            resources: state
                .order
                .iter()
                .filter_map(|name| state.resources.get(name))
                .map(ResourceHandle::projection)
                .collect(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    /// Probe every handle, remove the dead ones, report what remains.
    pub async fn health_check(&self) -> HealthReport {
        self.inner.health_check().await
    }

    /// Wire the idle-eviction timer; idempotent.
    ///
    /// The first call also triggers pre-warming up to `min_pool_size`.
    pub fn start_pool_watcher(&self) {
        self.inner.clone().start_pool_watcher();
    }

    /// Wire the usage-sampling timer; idempotent.
    pub fn start_resource_monitoring(&self, interval: Duration) {
        self.inner.clone().start_resource_monitoring(interval);
    }

    /// Remove a handle by name, terminating it best-effort.
    ///
    /// Returns `None` (and does nothing) when the name is not pooled.
    pub async fn remove_from_pool(&self, name: &str) -> Option<HandleProjection> {
        self.inner.remove_from_pool(name).await
    }

    /// Drain the pool and cancel all background work; idempotent.
    pub async fn shutdown(&self) {
        self.inner.clone().shutdown().await;
    }

    /// Metrics in Prometheus text exposition format.
    pub fn metrics_text(&self) -> PoolResult<String> {
        self.inner.metrics.render()
    }
}

impl EngineInner {
    async fn acquire(self: &Arc<Self>, config: &ManagerConfig) -> PoolResult<HandleProjection> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        self.adapter.validate(config)?;

        {
            let mut state = self.state.lock().await;
            state.last_request_time = epoch_ms();
        }
        self.clone().start_pool_watcher();
        self.clone().start_resource_monitoring(DEFAULT_MONITOR_INTERVAL);

        // Step 4: try to grow the pool while below the ceiling. Any
        // failure here falls through to selection.
        let has_room = {
            let state = self.state.lock().await;
            state.len() < config.max_pool_size
        };
        if has_room {
            if let Some(projection) = self.provision(config, true).await {
                return Ok(projection);
            }
        }

        // Steps 5-7: round-robin selection over the existing pool.
        let mut state = self.state.lock().await;
        self.metrics.requests.inc();
        if state.len() == 0 {
            self.metrics.misses.inc();
            return Err(PoolError::NoResource);
        }

        let index = select_index(epoch_ms() / 1000, state.len());
        let name = state.order[index].clone();
        // Selections against a non-empty pool count as hits even when
        // the selected handle turns out to be dead.
        self.metrics.hits.inc();

        let selected = state
            .resources
            .get(&name)
            .expect("selected name is pooled");
        if self.adapter.liveness(selected).await {
            let handle = state
                .resources
                .get_mut(&name)
                .expect("selected name is pooled");
            handle.last_used = epoch_ms();
            return Ok(handle.projection());
        }

        warn!(name = %name, "selected resource failed liveness probe, removing");
        let mut dead = state.remove(&name).expect("selected name is pooled");
        self.metrics.removals.inc();
        self.metrics.size.set(state.len() as i64);
        let survivor = state
            .order
            .front()
            .and_then(|n| state.resources.get(n))
            .map(ResourceHandle::projection);
        drop(state);

        self.terminate_handle(&mut dead, "dead-removal").await;
        survivor.ok_or(PoolError::NoResource)
    }

    /// Create one resource and admit it if the pool still has room.
    ///
    /// With `count_acquire` the admission also counts as a served
    /// request (`requests`/`hits`); pre-warm admissions only count as
    /// additions. Returns `None` on any failure or lost race.
    async fn provision(
        self: &Arc<Self>,
        config: &ManagerConfig,
        count_acquire: bool,
    ) -> Option<HandleProjection> {
        let tag = self.adapter.type_tag();
        let port = match PortAllocator::free_port() {
            Ok(port) => port,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "port allocation failed");
                return None;
            }
        };
        let created_at = epoch_ms();
        let name = format!("{}-{}-{}", tag, port, created_at);
        let ctx = AdapterContext {
            port,
            name: &name,
            config,
            timeout: config.creation_timeout(tag),
            events: self.events_tx.clone(),
        };

        let native = match self.adapter.create(ctx).await {
            Ok(native) => native,
            Err(err) => {
                warn!(
                    name = %name,
                    port,
                    error = %err,
                    kind = err.kind(),
                    "resource creation failed"
                );
                return None;
            }
        };

        let mut handle = ResourceHandle::new(name.clone(), port, created_at, native);
        {
            let mut state = self.state.lock().await;
            let admissible = state.len() < config.max_pool_size
                && !state.resources.contains_key(&name)
                && !self.shutting_down.load(Ordering::SeqCst);
            if admissible {
                self.metrics.additions.inc();
                if count_acquire {
                    self.metrics.requests.inc();
                    self.metrics.hits.inc();
                }
                let projection = handle.projection();
                state.insert(handle);
                self.metrics.size.set(state.len() as i64);
                info!(name = %name, port, "resource added to pool");
                return Some(projection);
            }
        }

        // Lost the fill-up race: the handle never entered the pool and
        // must not count as an addition.
        warn!(name = %name, "pool filled during creation, discarding fresh resource");
        self.terminate_handle(&mut handle, "lost-race").await;
        None
    }

    async fn health_check(self: &Arc<Self>) -> HealthReport {
        let mut state = self.state.lock().await;
        let names: Vec<String> = state.order.iter().cloned().collect();
        let mut dead = Vec::new();
        for name in names {
            let handle = state.resources.get(&name).expect("pooled name");
            if !self.adapter.liveness(handle).await {
                dead.push(name);
            }
        }

        let mut removed = Vec::with_capacity(dead.len());
        for name in dead {
            if let Some(handle) = state.remove(&name) {
                self.metrics.removals.inc();
                removed.push(handle);
            }
        }
        self.metrics.size.set(state.len() as i64);
        let total = state.len();
        drop(state);

        let dead_removed = removed.len();
        for mut handle in removed {
            warn!(name = %handle.name, "health check removing dead resource");
            self.terminate_handle(&mut handle, "health-check").await;
        }

        HealthReport {
            resource_type: self.adapter.type_tag(),
            total,
            dead_removed,
            healthy: total > 0 || !self.shutting_down.load(Ordering::SeqCst),
        }
    }

    fn start_pool_watcher(self: Arc<Self>) {
        if self.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self);
        let interval = self.config.pool_check_interval();
        let handle = tokio::spawn(async move {
            // Pre-warm before the first tick so a configured floor is
            // reached without waiting one full interval.
            if let Some(inner) = weak.upgrade() {
                inner.ensure_min_pool().await;
            }
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                inner.eviction_tick().await;
            }
        });
        let mut tasks = self.tasks.lock().expect("task set lock");
        tasks.watcher = Some(handle);
    }

    fn start_resource_monitoring(self: Arc<Self>, interval: Duration) {
        if self.monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                inner.monitor_tick().await;
            }
        });
        let mut tasks = self.tasks.lock().expect("task set lock");
        tasks.monitor = Some(handle);
    }

    async fn eviction_tick(self: &Arc<Self>) {
        let interval_ms = self.config.pool_check_interval().as_millis() as i64;
        let now = epoch_ms();

        let evicted = {
            let mut state = self.state.lock().await;
            if state.len() > 0 && now - state.last_request_time > interval_ms {
                let handle = state.pop_oldest();
                if handle.is_some() {
                    self.metrics.evictions.inc();
                    self.metrics.size.set(state.len() as i64);
                }
                handle
            } else {
                None
            }
        };

        if let Some(mut handle) = evicted {
            info!(
                name = %handle.name,
                port = handle.port,
                idle_ms = now - handle.last_used,
                "evicting idle resource"
            );
            self.terminate_handle(&mut handle, "eviction").await;
        }

        self.ensure_min_pool().await;
    }

    /// Replenish up to `min_pool_size`, sequentially, with the pre-warm
    /// configuration.
    async fn ensure_min_pool(self: &Arc<Self>) {
        let config = self.config.pre_warm().clone().normalized();
        let floor = self.config.min_pool_size.min(self.config.max_pool_size);
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            let below = {
                let state = self.state.lock().await;
                state.len() < floor
            };
            if !below {
                return;
            }
            debug!("pre-warming pool toward minimum size {floor}");
            if self.provision(&config, false).await.is_none() {
                // One failed pre-warm attempt ends the pass; the next
                // tick retries.
                return;
            }
        }
    }

    async fn monitor_tick(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        let names: Vec<String> = state.order.iter().cloned().collect();
        for name in names {
            let Some(handle) = state.resources.get_mut(&name) else {
                continue;
            };
            if let Some(sample) = self.adapter.usage(handle).await {
                handle.usage = Some(ResourceUsage::stamped(sample, epoch_ms()));
            }
        }
    }

    async fn remove_from_pool(self: &Arc<Self>, name: &str) -> Option<HandleProjection> {
        let mut handle = {
            let mut state = self.state.lock().await;
            let handle = state.remove(name)?;
            self.metrics.removals.inc();
            self.metrics.size.set(state.len() as i64);
            handle
        };
        let projection = handle.projection();
        info!(name = %name, "resource removed from pool");
        self.terminate_handle(&mut handle, "remove-from-pool").await;
        Some(projection)
    }

    async fn shutdown(self: Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            resource_type = %self.adapter.type_tag(),
            "shutting down pool manager"
        );

        {
            let mut tasks = self.tasks.lock().expect("task set lock");
            for task in [
                tasks.watcher.take(),
                tasks.monitor.take(),
                tasks.events.take(),
                tasks.signals.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
        }

        let drained = {
            let mut state = self.state.lock().await;
            state.drain_all()
        };
        for mut handle in drained {
            self.terminate_handle(&mut handle, "drain").await;
        }
        self.metrics.size.set(0);

        self.adapter.on_shutdown().await;
        info!("pool manager shutdown complete");
    }

    async fn terminate_handle(&self, handle: &mut ResourceHandle, context: &str) {
        if let Err(err) = self.adapter.terminate(handle).await {
            warn!(
                name = %handle.name,
                port = handle.port,
                context,
                error = %err,
                kind = err.kind(),
                "resource termination failed"
            );
        }
    }

    /// Consumes adapter death notices and removes the named handles.
    async fn event_loop(
        weak: Weak<EngineInner>,
        mut events_rx: mpsc::UnboundedReceiver<ResourceEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            if inner.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            match event {
                ResourceEvent::Exited { name } => {
                    if inner.remove_from_pool(&name).await.is_some() {
                        warn!(name = %name, "resource exited and was removed from pool");
                    }
                }
            }
        }
    }

    /// One-shot signal handling: the first shutdown-intent signal runs
    /// the single shutdown path; the listener is detached afterwards.
    async fn signal_loop(weak: Weak<EngineInner>) {
        let Some(signal) = lifecycle::wait_for_shutdown_signal().await else {
            return;
        };
        if let Some(inner) = weak.upgrade() {
            info!(signal = signal.as_str(), "received shutdown signal");
            // Run shutdown in its own task: shutdown aborts the signal
            // listener, which would otherwise cancel itself mid-drain.
            tokio::spawn(async move { inner.shutdown().await });
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Drop cannot run the async drain; it only makes sure no timer
        // or listener outlives the last engine reference.
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in [
                tasks.watcher.take(),
                tasks.monitor.take(),
                tasks.events.take(),
                tasks.signals.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_index_round_robin() {
        // Pool [A@8001, B@8002, C@8003], now_seconds = 2000 -> C.
        assert_eq!(select_index(2000, 3), 2);
        // Next second -> A.
        assert_eq!(select_index(2001, 3), 0);
        assert_eq!(select_index(2002, 3), 1);
    }

    #[test]
    fn test_select_index_single_element() {
        assert_eq!(select_index(12345, 1), 0);
    }

    #[test]
    fn test_select_index_bursts_stay_on_one_handle() {
        let first = select_index(500, 4);
        for _ in 0..10 {
            assert_eq!(select_index(500, 4), first);
        }
    }
}
