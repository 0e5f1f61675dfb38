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

//! Worker adapter tests against real worker threads.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use warmpool_backends::{WorkerAdapter, WorkerContext};
use warmpool_engine::{
    epoch_ms, Adapter, AdapterContext, ManagerConfig, NativeResource, PoolEngine, PoolError,
    PortAllocator, ResourceEvent, ResourceHandle, ResourceType,
};

fn context<'a>(
    config: &'a ManagerConfig,
    name: &'a str,
    port: u16,
    timeout: Duration,
    events: mpsc::UnboundedSender<ResourceEvent>,
) -> AdapterContext<'a> {
    AdapterContext {
        port,
        name,
        config,
        timeout,
        events,
    }
}

fn worker_name(port: u16) -> String {
    format!("worker-{port}-{}", epoch_ms())
}

#[tokio::test]
async fn test_worker_create_serve_terminate() {
    let config = ManagerConfig::default();
    let adapter = WorkerAdapter::new(&config);
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let port = PortAllocator::free_port().unwrap();
    let name = worker_name(port);
    let native = adapter
        .create(context(
            &config,
            &name,
            port,
            Duration::from_secs(5),
            events_tx,
        ))
        .await
        .unwrap();
    assert!(matches!(native, NativeResource::Worker(_)));

    let mut handle = ResourceHandle::new(name, port, epoch_ms(), native);
    assert!(adapter.liveness(&handle).await);
    assert_eq!(handle.projection().alive, Some(true));

    // The default entrypoint answers connections on the leased port.
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut response = [0u8; 8];
    let read = stream.read(&mut response).await.unwrap();
    assert_eq!(&response[..read], b"ok\n");

    // First sample establishes a baseline, the second reports a share.
    let first = adapter.usage(&mut handle).await.unwrap();
    assert_eq!(first.memory_bytes, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = adapter.usage(&mut handle).await.unwrap();
    assert!(second.cpu_percent >= 0.0);
    assert!(second.cpu_percent <= 100.0);

    adapter.terminate(&mut handle).await.unwrap();
    assert!(!adapter.liveness(&handle).await);
}

#[tokio::test]
async fn test_worker_entry_failure_rejects_creation() {
    let config = ManagerConfig::default();
    let adapter = WorkerAdapter::with_entrypoint(
        &config,
        Arc::new(|_ctx: WorkerContext| {
            Box::pin(async move { Err(anyhow::anyhow!("boot refused")) })
        }),
    );
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let port = PortAllocator::free_port().unwrap();
    let name = worker_name(port);
    let err = adapter
        .create(context(
            &config,
            &name,
            port,
            Duration::from_secs(5),
            events_tx,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::CreationFailure(_)));
    assert!(err.to_string().contains("boot refused"));
}

#[tokio::test]
async fn test_worker_online_deadline_rejects_creation() {
    let config = ManagerConfig::default();
    let adapter = WorkerAdapter::with_entrypoint(
        &config,
        Arc::new(|ctx: WorkerContext| {
            Box::pin(async move {
                // Never signals online; waits for the shutdown sent on
                // the deadline path.
                let _ = ctx.shutdown.await;
                Ok(())
            })
        }),
    );
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let port = PortAllocator::free_port().unwrap();
    let name = worker_name(port);
    let err = adapter
        .create(context(
            &config,
            &name,
            port,
            Duration::from_millis(200),
            events_tx,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::CreationTimeout { .. }));
}

#[tokio::test]
async fn test_worker_exit_reported_through_events() {
    let config = ManagerConfig::default();
    let adapter = WorkerAdapter::with_entrypoint(
        &config,
        Arc::new(|ctx: WorkerContext| {
            Box::pin(async move {
                ctx.online.ready();
                Ok(())
            })
        }),
    );
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let port = PortAllocator::free_port().unwrap();
    let name = worker_name(port);
    adapter
        .create(context(
            &config,
            &name,
            port,
            Duration::from_secs(5),
            events_tx,
        ))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ResourceEvent::Exited { name });
}

#[tokio::test]
async fn test_worker_pool_end_to_end() {
    let config = ManagerConfig {
        pool_check_interval: 60_000,
        ..Default::default()
    };
    let adapter = Arc::new(WorkerAdapter::new(&config));
    let engine = PoolEngine::new(adapter, config).unwrap();

    let resource = engine.acquire().await.unwrap();
    assert!(resource.name.starts_with("worker-"));
    assert_eq!(resource.alive, Some(true));
    assert_eq!(engine.resource_type(), ResourceType::Worker);

    let info = engine.pool_info().await;
    assert_eq!(info.size, 1);
    assert_eq!(info.metrics.additions, 1);

    engine.shutdown().await;
    assert_eq!(engine.pool_info().await.size, 0);
}
