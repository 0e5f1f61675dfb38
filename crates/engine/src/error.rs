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

//! Pool-manager error types

use std::time::Duration;

/// Pool error type
///
/// `acquire` surfaces only `ShuttingDown`, `BadConfig` and `NoResource`;
/// creation failures and timeouts are logged inside the engine and fall
/// through to pool selection. Timer loops swallow `Transient` errors so a
/// single failing resource never silences the loop.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Manager is terminal; no further acquisitions are accepted
    #[error("manager is shutting down")]
    ShuttingDown,

    /// Missing or invalid mandatory configuration
    #[error("invalid configuration: {0}")]
    BadConfig(String),

    /// Adapter did not finish provisioning within the creation budget
    #[error("creation of {name} timed out after {timeout:?}")]
    CreationTimeout {
        /// Name of the resource being provisioned
        name: String,
        /// Budget that was exhausted
        timeout: Duration,
    },

    /// Backend rejected resource creation
    #[error("resource creation failed: {0}")]
    CreationFailure(String),

    /// Pool is empty and creation failed or was not attempted
    #[error("no live resource available")]
    NoResource,

    /// Graceful stop exceeded the shutdown budget (triggers force-kill)
    #[error("graceful termination of {0} timed out")]
    TerminationTimeout(String),

    /// Liveness probe failed; the resource is treated as dead
    #[error("liveness probe failed: {0}")]
    LivenessUnknown(String),

    /// OS reported no free TCP port
    #[error("port allocation failed: no free TCP port")]
    PortExhausted,

    /// Recoverable error swallowed by timer loops
    #[error("transient error: {0}")]
    Transient(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metrics registry error
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PoolError {
    /// Stable kind tag for structured failure records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::ShuttingDown => "ShuttingDown",
            PoolError::BadConfig(_) => "BadConfig",
            PoolError::CreationTimeout { .. } => "CreationTimeout",
            PoolError::CreationFailure(_) => "CreationFailure",
            PoolError::NoResource => "NoResource",
            PoolError::TerminationTimeout(_) => "TerminationTimeout",
            PoolError::LivenessUnknown(_) => "LivenessUnknown",
            PoolError::PortExhausted => "PortExhausted",
            PoolError::Transient(_) => "Transient",
            PoolError::Io(_) => "Io",
            PoolError::Json(_) => "Json",
            PoolError::Yaml(_) => "Yaml",
            PoolError::Metrics(_) => "Metrics",
            PoolError::Internal(_) => "Internal",
        }
    }
}

/// Pool Result type
pub type PoolResult<T> = std::result::Result<T, PoolError>;
