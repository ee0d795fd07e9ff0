//! Benchmarks for the hot paths of the control plane
//!
//! Targets:
//! - Heartbeat: <50us per heartbeat with 1000 registered agents
//! - Liveness sweep: <5ms over 1000 agents
//! - Task progress update: <50us per update

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fleetwatch_core::registry::{HeartbeatRequest, LivenessConfig, RegisterRequest, SystemInfo};
use fleetwatch_core::standalone::InventoryHostStatus;
use fleetwatch_core::tasks::TaskProgress;
use fleetwatch_core::{ConnectionRegistry, CreateTaskRequest, TaskOrchestrator, TaskStatus};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn registry_with_agents(rt: &Runtime, count: usize) -> ConnectionRegistry {
    let registry = ConnectionRegistry::new(
        Arc::new(InventoryHostStatus::new()),
        LivenessConfig::default(),
    );
    rt.block_on(async {
        for i in 0..count {
            registry
                .register(RegisterRequest {
                    agent_id: format!("agent-{}", i),
                    ip_address: format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256),
                    hostname: format!("node-{}", i),
                    os_type: "linux".to_string(),
                    arch: "amd64".to_string(),
                    version: "2.3.8".to_string(),
                    system_info: SystemInfo::default(),
                })
                .await
                .unwrap();
        }
    });
    registry
}

/// Benchmark 1: heartbeat handling against registries of growing size
fn bench_heartbeats(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("heartbeat");
    group.throughput(Throughput::Elements(1));

    for size in [10usize, 100, 1000] {
        let registry = registry_with_agents(&rt, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % size;
                let req = HeartbeatRequest {
                    agent_id: format!("agent-{}", i),
                    usage: Default::default(),
                };
                rt.block_on(registry.handle_heartbeat(black_box(req))).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark 2: one liveness pass where every agent is still fresh
fn bench_sweep(c: &mut Criterion) {
    let rt = runtime();
    let registry = registry_with_agents(&rt, 1000);

    c.bench_function("sweep_1000_fresh", |b| {
        b.iter(|| {
            let demoted = rt.block_on(registry.sweep_now());
            black_box(demoted);
        });
    });
}

/// Benchmark 3: progress updates on a running task
fn bench_task_progress(c: &mut Criterion) {
    let rt = runtime();
    let orchestrator = TaskOrchestrator::new();
    let task_id = rt.block_on(async {
        let task = orchestrator
            .create_task(CreateTaskRequest::new("install", "host-1"), "bench")
            .await
            .unwrap();
        orchestrator.start_task(&task.id).await.unwrap();
        task.id
    });

    c.bench_function("task_progress_update", |b| {
        let mut pct = 0u8;
        b.iter(|| {
            pct = (pct + 1) % 100;
            let update = TaskProgress {
                task_id: task_id.clone(),
                status: TaskStatus::Running,
                progress: pct,
                message: String::new(),
                error: None,
                result: None,
            };
            rt.block_on(orchestrator.update_progress(black_box(update)))
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_heartbeats, bench_sweep, bench_task_progress);
criterion_main!(benches);
