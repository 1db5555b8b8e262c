//! Hot-path benchmarks using Criterion.
//!
//! - Priority queue insertion and batch pops
//! - Dependency resolution of a full batch
//! - Endpoint selection per load-balancing strategy

#![allow(clippy::expect_used)]

use conduit_core::{
    scheduler::{resolve_batch, Operation, OperationPayload, OperationQueue},
    types::EndpointConfig,
    upstream::{Endpoint, LoadBalancer, LoadBalancingStrategy},
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::{collections::HashSet, hint::black_box, sync::Arc, time::Duration};

fn operations(count: usize) -> Vec<Operation> {
    (0..count)
        .map(|i| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let priority = (i % 7) as i32;
            Operation::new(OperationPayload::call("eth_call", None)).with_priority(priority)
        })
        .collect()
}

fn bench_queue_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_insertion");

    for size in &[100usize, 1000, 10000] {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("push", size), size, |b, &size| {
            b.iter_batched(
                || operations(size),
                |ops| {
                    let queue = OperationQueue::new();
                    for op in ops {
                        queue.push(black_box(op));
                    }
                    queue
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.bench_function("push_then_pop_batches_of_50", |b| {
        b.iter_batched(
            || operations(1000),
            |ops| {
                let queue = OperationQueue::new();
                for op in ops {
                    queue.push(op);
                }
                while !queue.pop_batch(50).is_empty() {}
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_dependency_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_resolution");

    for size in &[50usize, 100] {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("chain", size), size, |b, &size| {
            b.iter_batched(
                || {
                    // Each operation depends on the previous one, submitted in reverse.
                    let mut ops = operations(size);
                    for i in 1..ops.len() {
                        let parent = ops[i - 1].id;
                        ops[i].dependencies.push(parent);
                    }
                    ops.reverse();
                    ops
                },
                resolve_batch,
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_balancer_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("balancer_selection");

    let endpoints: Vec<Arc<Endpoint>> = (0..8)
        .map(|i| {
            let endpoint = Arc::new(Endpoint::new(EndpointConfig {
                name: Arc::from(format!("endpoint-{i}")),
                url: format!("http://127.0.0.1:{}", 8545 + i),
                ..Default::default()
            }));
            for _ in 0..i {
                endpoint.record_success(Duration::from_millis(20 * i as u64));
            }
            endpoint
        })
        .collect();
    let exclude = HashSet::new();

    for strategy in [
        LoadBalancingStrategy::RoundRobin,
        LoadBalancingStrategy::Weighted,
        LoadBalancingStrategy::LeastConnections,
    ] {
        let balancer = LoadBalancer::new(endpoints.clone(), strategy);
        group.bench_function(format!("{strategy:?}"), |b| {
            b.iter(|| black_box(balancer.select(black_box(&exclude))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_insertion,
    bench_dependency_resolution,
    bench_balancer_selection
);
criterion_main!(benches);
