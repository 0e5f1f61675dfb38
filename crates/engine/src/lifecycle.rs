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

//! # Lifecycle Coordinator
//!
//! ## Purpose
//! Per-engine OS signal wiring so that a single shutdown path always
//! runs, no matter how the process is asked to stop.
//!
//! ## Design
//! Each engine spawns its own listener task on construction; `shutdown`
//! aborts that task, which detaches the handlers so repeated signals do
//! not re-enter. Several engines in one process each install and detach
//! their own listener; there is no process-wide registry.

use tokio::signal::unix::{signal, SignalKind};

/// Signals that trigger engine shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (interrupt, Ctrl+C)
    Interrupt,
    /// SIGTERM (terminate)
    Terminate,
    /// SIGHUP (exit intent)
    Hangup,
}

impl ShutdownSignal {
    /// Signal name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Hangup => "SIGHUP",
        }
    }
}

/// Wait for the first shutdown-intent signal.
///
/// Returns `None` when the handlers cannot be installed (e.g. outside a
/// full runtime); callers treat that as "no signal wiring available"
/// rather than an error.
pub async fn wait_for_shutdown_signal() -> Option<ShutdownSignal> {
    let mut sigint = signal(SignalKind::interrupt()).ok()?;
    let mut sigterm = signal(SignalKind::terminate()).ok()?;
    let mut sighup = signal(SignalKind::hangup()).ok()?;

    let received = tokio::select! {
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sighup.recv() => ShutdownSignal::Hangup,
    };
    Some(received)
}
