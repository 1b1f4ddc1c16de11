use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion};

use gres::alloc::AllocationEngine;
use gres::config::GresConfig;
use gres::resources::DeviceTypeMap;
use gres::{Bitmap, NodePosition, ResourceLock};

use crate::{create_job, create_node};

fn bench_alloc_dealloc(c: &mut Criterion) {
    let config = GresConfig::default();
    let types = DeviceTypeMap::from_names(&["gpu"]);
    let lock = ResourceLock::new();
    for gpus in [8, 64, 512] {
        c.bench_with_input(
            BenchmarkId::new("alloc and dealloc a single gpu", gpus),
            &gpus,
            |b, &gpus| {
                let access = lock.write();
                let engine = AllocationEngine::new(&config, &types, &access);
                b.iter_batched_ref(
                    || (create_node(2, gpus), create_job(1, 1)),
                    |(node, job)| {
                        let position = NodePosition::new(0);
                        let grant = engine.alloc(job, node, position, None, true).unwrap();
                        black_box(grant);
                        engine.dealloc(job, node, position, false, false).unwrap();
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
}

fn bench_fill_node(c: &mut Criterion) {
    let config = GresConfig::default();
    let types = DeviceTypeMap::from_names(&["gpu"]);
    let lock = ResourceLock::new();
    for gpus in [8, 64, 512] {
        c.bench_with_input(
            BenchmarkId::new("fill node with affine jobs", gpus),
            &gpus,
            |b, &gpus| {
                let access = lock.write();
                let engine = AllocationEngine::new(&config, &types, &access);
                b.iter_batched_ref(
                    || {
                        let node = create_node(2, gpus);
                        let jobs: Vec<_> = (0..gpus).map(|id| create_job(id, 1)).collect();
                        (node, jobs)
                    },
                    |(node, jobs)| {
                        let cores = Bitmap::from_range(64, 32, 64);
                        for job in jobs.iter_mut() {
                            engine
                                .alloc(job, node, NodePosition::new(0), Some(&cores), true)
                                .unwrap();
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
}

pub fn benchmark(c: &mut Criterion) {
    bench_alloc_dealloc(c);
    bench_fill_node(c);
}
