use criterion::{criterion_group, criterion_main};

mod benchmarks;
mod utils;

criterion_group!(alloc, benchmarks::alloc::benchmark);
criterion_group!(step, benchmarks::step::benchmark);

criterion_main!(alloc, step);
