//! Performance benchmarks for daqpipe
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daqpipe::{Item, ItemQueue, Priority};
use tokio::runtime::Runtime;

/// Raw queue push/pop overhead.
fn bench_queue_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_ops");
    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("push_pop", size), &size, |b, &size| {
            b.iter(|| {
                let queue = ItemQueue::new();
                for i in 0..size {
                    queue.push(Item::Text(format!("item-{i}")));
                }
                while queue.pop().is_some() {}
            });
        });
    }
    group.finish();
}

/// Items pumped through a manager's worker pool, high-priority lane.
fn bench_worker_pool(c: &mut Criterion) {
    use daqpipe::config::{DataflowType, ManagerConfig, SocketMode};
    use daqpipe::{MonitoringEmitter, ProcessorRegistry, WorkerManager};
    use tokio_util::sync::CancellationToken;

    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("worker_pool");
    group.sample_size(20);

    for workers in [1usize, 4] {
        group.throughput(Throughput::Elements(1_000));
        group.bench_with_input(
            BenchmarkId::new("pump_1000", workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    runtime.block_on(async {
                        let registry = ProcessorRegistry::with_defaults();
                        let cancel = CancellationToken::new();
                        let manager = WorkerManager::new(
                            0,
                            "BENCH",
                            ManagerConfig {
                                name: "Generic".to_string(),
                                result_socket_type: SocketMode::PushPull,
                                result_dataflow_type: DataflowType::Text,
                                result_lp_socket: "none".to_string(),
                                result_hp_socket: "none".to_string(),
                                num_workers: workers,
                                worker_class: "echo".to_string(),
                                alarm_warning_depth: None,
                                alarm_critical_depth: None,
                            },
                            &registry,
                            MonitoringEmitter::disconnected(),
                            &cancel,
                        )
                        .unwrap();
                        manager.start_workers();
                        manager.set_processdata(true);

                        for i in 0..1_000 {
                            manager
                                .input_queue(Priority::High)
                                .push(Item::Text(format!("b{i}")));
                        }
                        while manager.result_hp_queue().len() < 1_000 {
                            tokio::time::sleep(std::time::Duration::from_micros(200)).await;
                        }
                        manager.stop(false).await;
                    });
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_queue_ops, bench_worker_pool);
criterion_main!(benches);
