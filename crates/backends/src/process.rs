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

//! # Process Adapter
//!
//! ## Purpose
//! Pools child OS processes running a configured interpreter on a
//! script, with the leased port as the script's argument.
//!
//! ## Design
//! - Creation resolves on the child's first stdout chunk ("app up");
//!   spawn errors, early exit and the creation deadline all reject, and
//!   the deadline path kills the child so nothing is orphaned.
//! - Stderr is drained and logged; a reaper task owns the child, reaps
//!   it on exit and reports the death back to the engine.
//! - Graceful stop is SIGTERM raced against the shutdown budget, then
//!   SIGKILL; "already gone" is success.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};
use warmpool_engine::{
    Adapter, AdapterContext, ManagerConfig, NativeResource, PoolError, PoolResult, ProcessCell,
    ResourceEvent, ResourceHandle, ResourceType, UsageSample,
};

/// Adapter pooling interpreter child processes
pub struct ProcessAdapter {
    shutdown_timeout: Duration,
    system: StdMutex<System>,
}

impl ProcessAdapter {
    /// Process adapter with the manager's termination budget.
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout(ResourceType::Process),
            system: StdMutex::new(System::new()),
        }
    }

    fn script_path(config: &ManagerConfig) -> PoolResult<PathBuf> {
        let dir = config.script_dir_path.as_ref().ok_or_else(|| {
            PoolError::BadConfig("scriptDirPath is required for process pools".to_string())
        })?;
        let file = config.script_files.first().ok_or_else(|| {
            PoolError::BadConfig("scriptFiles must name at least one script".to_string())
        })?;
        Ok(dir.join(file))
    }

    fn send_signal(pid: u32, signal: i32) {
        // kill(2) with an exited-but-unreaped pid is harmless; the
        // reaper task owns the wait.
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

#[async_trait]
impl Adapter for ProcessAdapter {
    fn type_tag(&self) -> ResourceType {
        ResourceType::Process
    }

    fn validate(&self, config: &ManagerConfig) -> PoolResult<()> {
        let script = Self::script_path(config)?;
        std::fs::metadata(&script).map_err(|err| {
            PoolError::BadConfig(format!(
                "script {} is not readable: {err}",
                script.display()
            ))
        })?;
        Ok(())
    }

    async fn create(&self, ctx: AdapterContext<'_>) -> PoolResult<NativeResource> {
        let script = Self::script_path(ctx.config)?;
        let mut child = Command::new(&ctx.config.interpreter)
            .arg(&script)
            .arg(ctx.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                PoolError::CreationFailure(format!(
                    "spawn of {} {} failed: {err}",
                    ctx.config.interpreter,
                    script.display()
                ))
            })?;
        let pid = child
            .id()
            .ok_or_else(|| PoolError::CreationFailure("child has no pid".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::CreationFailure("child stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PoolError::CreationFailure("child stderr not piped".to_string()))?;

        // The first stdout chunk signals "app up".
        let mut buf = [0u8; 4096];
        match tokio::time::timeout(ctx.timeout, stdout.read(&mut buf)).await {
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(PoolError::CreationTimeout {
                    name: ctx.name.to_string(),
                    timeout: ctx.timeout,
                });
            }
            Ok(Err(err)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(PoolError::CreationFailure(format!(
                    "reading child stdout failed: {err}"
                )));
            }
            Ok(Ok(0)) => {
                let _ = child.wait().await;
                return Err(PoolError::CreationFailure(
                    "process exited before writing to stdout".to_string(),
                ));
            }
            Ok(Ok(n)) => {
                debug!(
                    name = %ctx.name,
                    pid,
                    first_chunk = %String::from_utf8_lossy(&buf[..n]).trim(),
                    "process signalled readiness"
                );
            }
        }

        // Keep the pipes drained so the child never blocks on a full
        // buffer; stderr lines are worth logging.
        let stderr_name = ctx.name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(name = %stderr_name, line = %line, "process stderr");
            }
        });
        tokio::spawn(async move {
            let mut sink = [0u8; 4096];
            while matches!(stdout.read(&mut sink).await, Ok(n) if n > 0) {}
        });

        let (alive_tx, alive_rx) = watch::channel(true);
        let events = ctx.events.clone();
        let reaper_name = ctx.name.to_string();
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(name = %reaper_name, status = ?status.ok(), "process exited");
            let _ = alive_tx.send(false);
            let _ = events.send(ResourceEvent::Exited { name: reaper_name });
        });

        Ok(NativeResource::Process(ProcessCell {
            pid,
            alive: alive_rx,
            killed: false,
        }))
    }

    async fn terminate(&self, handle: &mut ResourceHandle) -> PoolResult<()> {
        let NativeResource::Process(cell) = &mut handle.native else {
            return Ok(());
        };
        if !cell.is_running() {
            cell.killed = true;
            return Ok(());
        }

        cell.killed = true;
        Self::send_signal(cell.pid, libc::SIGTERM);

        let mut alive = cell.alive.clone();
        let stopped = tokio::time::timeout(self.shutdown_timeout, async {
            while *alive.borrow() {
                if alive.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if stopped.is_err() {
            warn!(
                name = %handle.name,
                pid = cell.pid,
                "graceful stop timed out, force killing"
            );
            Self::send_signal(cell.pid, libc::SIGKILL);
        }
        Ok(())
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        match &handle.native {
            NativeResource::Process(cell) => cell.is_running() && !cell.killed,
            _ => false,
        }
    }

    async fn usage(&self, handle: &mut ResourceHandle) -> Option<UsageSample> {
        let NativeResource::Process(cell) = &handle.native else {
            return None;
        };
        if cell.killed || !cell.is_running() {
            return None;
        }

        let pid = Pid::from_u32(cell.pid);
        let mut system = self.system.lock().expect("sysinfo lock");
        if !system.refresh_process(pid) {
            return None;
        }
        let process = system.process(pid)?;
        Some(UsageSample {
            cpu_percent: process.cpu_usage() as f64,
            memory_bytes: process.memory(),
        })
    }
}
