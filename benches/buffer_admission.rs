//! Benchmarks for task buffer admission on the fast and spill paths

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dispatch_rs::prelude::*;

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_admission");

    // 500 stays on the fast path, 5000 spends most of its time spilling.
    for &n in &[500usize, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let (buffer, receiver) = TaskBuffer::new(BufferConfig::default()).unwrap();
                for _ in 0..n {
                    buffer.submit(|| {});
                }
                while let Some(task) = receiver.try_recv() {
                    task.execute();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_admission);
criterion_main!(benches);
