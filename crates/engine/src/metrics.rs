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

//! # Pool Metrics
//!
//! ## Purpose
//! Per-manager counter set (requests, hits, misses, additions,
//! evictions, removals) plus a pool-size gauge, exported in Prometheus
//! text exposition format.
//!
//! ## Design
//! - One `prometheus::Registry` per `PoolEngine`; nothing is
//!   process-global, so several managers in one process never collide.
//! - Every series carries const labels `resource_type` and `manager`.
//! - Counters are monotonically non-decreasing for the manager's
//!   lifetime; the engine increments them under its pool lock so a
//!   `pool_info` reader never observes counters ahead of membership.

use crate::error::PoolResult;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;

const NAMESPACE: &str = "serverless_manager_pool";

/// Per-manager pool counters and gauge
#[derive(Debug)]
pub struct PoolMetrics {
    registry: Registry,

    /// Total acquisition attempts that reached selection or admission
    pub requests: IntCounter,
    /// Successful selections and create-path admissions
    pub hits: IntCounter,
    /// Selections against an empty pool
    pub misses: IntCounter,
    /// Handles admitted to the pool
    pub additions: IntCounter,
    /// Idle-timer removals only
    pub evictions: IntCounter,
    /// All removals by name
    pub removals: IntCounter,
    /// Current pool size
    pub size: IntGauge,
}

impl PoolMetrics {
    /// Build a registry labelled for one manager instance.
    pub fn new(resource_type: &str, manager: &str) -> PoolResult<Self> {
        let registry = Registry::new();
        let mut labels = HashMap::new();
        labels.insert("resource_type".to_string(), resource_type.to_string());
        labels.insert("manager".to_string(), manager.to_string());

        let counter = |name: &str, help: &str| -> PoolResult<IntCounter> {
            let c = IntCounter::with_opts(
                Opts::new(format!("{NAMESPACE}_{name}"), help).const_labels(labels.clone()),
            )?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let requests = counter("requests_total", "Total pool acquisition requests")?;
        let hits = counter("hits_total", "Acquisitions satisfied by a selected or newly created resource")?;
        let misses = counter("misses_total", "Acquisitions that found the pool empty")?;
        let additions = counter("additions_total", "Resources admitted to the pool")?;
        let evictions = counter("evictions_total", "Idle-timer evictions from the pool")?;
        let removals = counter("removals_total", "Resources removed from the pool by name")?;

        let size = IntGauge::with_opts(
            Opts::new(format!("{NAMESPACE}_size"), "Current pool size").const_labels(labels),
        )?;
        registry.register(Box::new(size.clone()))?;

        Ok(Self {
            registry,
            requests,
            hits,
            misses,
            additions,
            evictions,
            removals,
            size,
        })
    }

    /// Point-in-time counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.get(),
            hits: self.hits.get(),
            misses: self.misses.get(),
            additions: self.additions.get(),
            evictions: self.evictions.get(),
            removals: self.removals.get(),
            size: self.size.get(),
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> PoolResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| anyhow::anyhow!("metrics text is not UTF-8: {e}").into())
    }
}

/// Counter values at one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total acquisition requests
    pub requests: u64,
    /// Successful selections/admissions
    pub hits: u64,
    /// Empty-pool selections
    pub misses: u64,
    /// Admissions
    pub additions: u64,
    /// Idle evictions
    pub evictions: u64,
    /// Removals by name
    pub removals: u64,
    /// Pool size gauge
    pub size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_increments() {
        let metrics = PoolMetrics::new("worker", "WorkerManager").unwrap();
        metrics.requests.inc();
        metrics.requests.inc();
        metrics.hits.inc();
        metrics.misses.inc();
        metrics.additions.inc();
        metrics.size.set(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.additions, 1);
        assert_eq!(snap.removals, 0);
        assert_eq!(snap.size, 1);
        assert_eq!(snap.hits + snap.misses, snap.requests);
    }

    #[test]
    fn test_exposition_format() {
        let metrics = PoolMetrics::new("container", "ContainerManager").unwrap();
        metrics.requests.inc();
        metrics.size.set(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("# HELP serverless_manager_pool_requests_total"));
        assert!(text.contains("# TYPE serverless_manager_pool_requests_total counter"));
        assert!(text.contains("# TYPE serverless_manager_pool_size gauge"));
        assert!(text.contains(r#"resource_type="container""#));
        assert!(text.contains(r#"manager="ContainerManager""#));

        let requests_line = text
            .lines()
            .find(|l| l.starts_with("serverless_manager_pool_requests_total{"))
            .expect("requests sample line");
        assert!(requests_line.ends_with(" 1"));
        let size_line = text
            .lines()
            .find(|l| l.starts_with("serverless_manager_pool_size{"))
            .expect("size sample line");
        assert!(size_line.ends_with(" 2"));
    }

    #[test]
    fn test_two_managers_do_not_collide() {
        let a = PoolMetrics::new("worker", "WorkerManager").unwrap();
        let b = PoolMetrics::new("worker", "WorkerManager").unwrap();
        a.requests.inc();
        assert_eq!(b.snapshot().requests, 0);
    }
}
