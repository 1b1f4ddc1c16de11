use criterion::{BatchSize, BenchmarkId, Criterion};
use smallvec::smallvec;

use gres::alloc::{AllocationEngine, StepAllocArgs, step_alloc, step_dealloc};
use gres::config::GresConfig;
use gres::resources::{DeviceTypeMap, StepAmount, StepClaim, StepDeviceRequest, StepFlags, StepRequest};
use gres::{NodePosition, ResourceLock};

use crate::utils::GPU;
use crate::{create_job, create_node};

fn bench_step_cycle(c: &mut Criterion) {
    let config = GresConfig::default();
    let types = DeviceTypeMap::from_names(&["gpu"]);
    let lock = ResourceLock::new();
    for gpus in [8u32, 64, 512] {
        c.bench_with_input(
            BenchmarkId::new("run steps over a whole gpu node", gpus),
            &gpus,
            |b, &gpus| {
                let access = lock.write();
                let engine = AllocationEngine::new(&config, &types, &access);
                let mut node = create_node(2, gpus);
                let mut job = create_job(1, gpus as u64);
                engine
                    .alloc(&mut job, &mut node, NodePosition::new(0), None, true)
                    .unwrap();
                b.iter_batched_ref(
                    || {
                        (0..gpus)
                            .map(|id| {
                                let request = StepRequest::new(
                                    StepFlags::empty(),
                                    smallvec![StepDeviceRequest::new(GPU, StepAmount::PerNode(1))],
                                );
                                StepClaim::new(1.into(), id.into(), request, 1)
                            })
                            .collect::<Vec<_>>()
                    },
                    |steps| {
                        let args = StepAllocArgs {
                            position: NodePosition::new(0),
                            node: &node,
                            cores: None,
                            tasks_on_node: 1,
                            remaining_nodes: 1,
                            decr_job_alloc: true,
                        };
                        for step in steps.iter_mut() {
                            step_alloc(&access, step, &mut job, &args).unwrap();
                        }
                        for step in steps.iter_mut() {
                            step_dealloc(&access, step, &mut job, NodePosition::new(0)).unwrap();
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
}

pub fn benchmark(c: &mut Criterion) {
    bench_step_cycle(c);
}
