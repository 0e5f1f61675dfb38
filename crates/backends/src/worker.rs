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

//! # Worker Adapter
//!
//! ## Purpose
//! Pools in-process workers: each resource is a dedicated OS thread
//! driving a current-thread tokio runtime bound to `(port, name)`.
//!
//! ## Design
//! - Creation resolves when the worker signals "online" through a
//!   one-shot channel; the first error before that signal (or the
//!   creation deadline) rejects provisioning, and the deadline path
//!   asks the thread to stop so nothing is orphaned.
//! - After the online signal, worker exit is reported back to the
//!   engine through the resource-event channel and removes the handle
//!   from the pool.
//! - CPU usage is the busy-time share since the previous sample, the
//!   in-process equivalent of event-loop utilization; per-worker memory
//!   is not measurable and reports 0.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use warmpool_engine::{
    Adapter, AdapterContext, ManagerConfig, NativeResource, PoolError, PoolResult,
    ResourceEvent, ResourceHandle, ResourceType, UsageSample, WorkerCell, WorkerCpuSample,
};

/// Worker thread stack bound
const WORKER_STACK_SIZE: usize = 4 << 20;

/// Future a worker entrypoint runs to completion
pub type WorkerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// User code executed inside a pooled worker
pub type WorkerEntrypoint = Arc<dyn Fn(WorkerContext) -> WorkerFuture + Send + Sync>;

/// One-shot "online" signal shared between the adapter and the worker.
///
/// The adapter keeps a clone so a worker that errors out before
/// signalling still produces a creation failure instead of a timeout.
#[derive(Clone)]
pub struct OnlineSignal(Arc<StdMutex<Option<oneshot::Sender<Result<(), String>>>>>);

impl OnlineSignal {
    fn new(tx: oneshot::Sender<Result<(), String>>) -> Self {
        Self(Arc::new(StdMutex::new(Some(tx))))
    }

    /// Report the worker as ready; later calls are no-ops.
    pub fn ready(&self) {
        if let Some(tx) = self.0.lock().expect("online signal lock").take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Report a startup failure; a no-op once the worker is online.
    pub fn fail(&self, message: String) {
        if let Some(tx) = self.0.lock().expect("online signal lock").take() {
            let _ = tx.send(Err(message));
        }
    }
}

/// Everything a worker entrypoint receives
pub struct WorkerContext {
    /// Host TCP port leased to this worker
    pub port: u16,
    /// Handle name
    pub name: String,
    /// Old-generation heap budget hint, MB
    pub old_gen_mb: u32,
    /// Young-generation heap budget hint, MB
    pub young_gen_mb: u32,
    /// Cumulative busy-time counter the entrypoint should feed
    pub busy_nanos: Arc<AtomicU64>,
    /// Online signal; must fire once serving is possible
    pub online: OnlineSignal,
    /// Fires when the pool wants this worker gone
    pub shutdown: oneshot::Receiver<()>,
}

/// Default entrypoint: a trivial TCP responder on the worker's port.
///
/// Binds, signals online and answers each connection with a one-line
/// acknowledgement while accounting its busy time.
pub fn default_entrypoint() -> WorkerEntrypoint {
    Arc::new(|ctx: WorkerContext| {
        Box::pin(async move {
            let WorkerContext {
                port,
                busy_nanos,
                online,
                mut shutdown,
                ..
            } = ctx;

            let listener = match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    online.fail(format!("bind 127.0.0.1:{port} failed: {err}"));
                    return Err(err.into());
                }
            };
            online.ready();

            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let started = Instant::now();
                        if let Ok((mut socket, _)) = accepted {
                            let mut buf = [0u8; 1024];
                            let _ = socket.read(&mut buf).await;
                            let _ = socket.write_all(b"ok\n").await;
                        }
                        busy_nanos.fetch_add(
                            started.elapsed().as_nanos() as u64,
                            Ordering::Relaxed,
                        );
                    }
                    _ = &mut shutdown => break,
                }
            }
            Ok(())
        })
    })
}

/// Adapter pooling dedicated worker threads
pub struct WorkerAdapter {
    entrypoint: WorkerEntrypoint,
    shutdown_timeout: Duration,
}

impl WorkerAdapter {
    /// Worker adapter running the default TCP-responder entrypoint.
    pub fn new(config: &ManagerConfig) -> Self {
        Self::with_entrypoint(config, default_entrypoint())
    }

    /// Worker adapter running caller-supplied worker code.
    pub fn with_entrypoint(config: &ManagerConfig, entrypoint: WorkerEntrypoint) -> Self {
        Self {
            entrypoint,
            shutdown_timeout: config.shutdown_timeout(ResourceType::Worker),
        }
    }
}

#[async_trait]
impl Adapter for WorkerAdapter {
    fn type_tag(&self) -> ResourceType {
        ResourceType::Worker
    }

    fn validate(&self, config: &ManagerConfig) -> PoolResult<()> {
        if let Some(dir) = &config.script_dir_path {
            std::fs::metadata(dir).map_err(|err| {
                PoolError::BadConfig(format!(
                    "scriptDirPath {} is not readable: {err}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }

    async fn create(&self, ctx: AdapterContext<'_>) -> PoolResult<NativeResource> {
        let (online_tx, online_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let online = OnlineSignal::new(online_tx);
        let busy_nanos = Arc::new(AtomicU64::new(0));

        let worker_ctx = WorkerContext {
            port: ctx.port,
            name: ctx.name.to_string(),
            old_gen_mb: ctx.config.worker_old_gen_mb,
            young_gen_mb: ctx.config.worker_young_gen_mb,
            busy_nanos: busy_nanos.clone(),
            online: online.clone(),
            shutdown: shutdown_rx,
        };

        let entrypoint = self.entrypoint.clone();
        let thread_online = online.clone();
        let events = ctx.events.clone();
        let name = ctx.name.to_string();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        thread_online.fail(format!("worker runtime build failed: {err}"));
                        return;
                    }
                };
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    runtime.block_on(entrypoint(worker_ctx))
                }));
                match outcome {
                    Ok(Ok(())) => debug!(name = %name, "worker finished"),
                    Ok(Err(err)) => {
                        thread_online.fail(format!("worker failed: {err}"));
                        warn!(name = %name, error = %err, "worker errored");
                    }
                    Err(_) => {
                        thread_online.fail("worker panicked".to_string());
                        warn!(name = %name, "worker panicked");
                    }
                }
                let _ = events.send(ResourceEvent::Exited { name });
            })
            .map_err(|err| PoolError::CreationFailure(format!("thread spawn failed: {err}")))?;

        match tokio::time::timeout(ctx.timeout, online_rx).await {
            Ok(Ok(Ok(()))) => Ok(NativeResource::Worker(WorkerCell {
                join: Some(join),
                shutdown: Some(shutdown_tx),
                busy_nanos,
                last_sample: None,
                killed: false,
            })),
            Ok(Ok(Err(message))) => Err(PoolError::CreationFailure(message)),
            Ok(Err(_)) => Err(PoolError::CreationFailure(
                "worker exited before signalling online".to_string(),
            )),
            Err(_) => {
                // Deadline: stop whatever was started so no orphan
                // worker keeps running.
                let _ = shutdown_tx.send(());
                Err(PoolError::CreationTimeout {
                    name: ctx.name.to_string(),
                    timeout: ctx.timeout,
                })
            }
        }
    }

    async fn terminate(&self, handle: &mut ResourceHandle) -> PoolResult<()> {
        let NativeResource::Worker(cell) = &mut handle.native else {
            return Ok(());
        };
        if let Some(tx) = cell.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(join) = cell.join.take() else {
            return Ok(()); // already terminated
        };
        if join.is_finished() {
            let _ = join.join();
            return Ok(());
        }

        let joined = tokio::time::timeout(
            self.shutdown_timeout,
            tokio::task::spawn_blocking(move || {
                let _ = join.join();
            }),
        )
        .await;
        if joined.is_err() {
            // A thread cannot be force-killed; detach it and drop the
            // handle so the pool forgets it.
            cell.killed = true;
            warn!(
                name = %handle.name,
                "worker did not stop within the shutdown budget, detaching thread"
            );
        }
        Ok(())
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        match &handle.native {
            NativeResource::Worker(cell) => {
                !cell.killed
                    && cell
                        .join
                        .as_ref()
                        .map(|join| !join.is_finished())
                        .unwrap_or(false)
            }
            _ => false,
        }
    }

    async fn usage(&self, handle: &mut ResourceHandle) -> Option<UsageSample> {
        let NativeResource::Worker(cell) = &mut handle.native else {
            return None;
        };
        let now = Instant::now();
        let busy = cell.busy_nanos.load(Ordering::Relaxed);
        let previous = cell.last_sample.replace(WorkerCpuSample {
            busy_nanos: busy,
            at: now,
        });

        let cpu_percent = match previous {
            Some(prev) => {
                let wall = now.duration_since(prev.at).as_nanos() as f64;
                if wall > 0.0 {
                    (busy.saturating_sub(prev.busy_nanos) as f64 / wall * 100.0).min(100.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        // Per-worker memory is not measurable in-process.
        Some(UsageSample {
            cpu_percent,
            memory_bytes: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_signal_fires_once() {
        let (tx, mut rx) = oneshot::channel();
        let online = OnlineSignal::new(tx);
        online.ready();
        online.fail("too late".to_string());
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_missing_script_dir() {
        let adapter = WorkerAdapter::new(&ManagerConfig::default());
        let config = ManagerConfig {
            script_dir_path: Some("/definitely/not/here".into()),
            ..Default::default()
        };
        let err = adapter.validate(&config).unwrap_err();
        assert_eq!(err.kind(), "BadConfig");
    }

    #[test]
    fn test_validate_accepts_absent_script_dir() {
        let adapter = WorkerAdapter::new(&ManagerConfig::default());
        adapter.validate(&ManagerConfig::default()).unwrap();
    }
}
