//! Benchmarks for dispatch loop submission and execution

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossbeam_channel::bounded;
use dispatch_rs::prelude::*;

fn bench_submit_and_drain(c: &mut Criterion) {
    let dispatcher = Dispatcher::new(Config::default()).unwrap();
    dispatcher.start();

    c.bench_function("dispatch_1000_tasks", |b| {
        b.iter(|| {
            for i in 0..1000u64 {
                dispatcher.submit(move || {
                    black_box(i * i);
                });
            }
            let (tx, rx) = bounded(1);
            dispatcher.submit(move || tx.send(()).unwrap());
            rx.recv().unwrap();
        });
    });

    dispatcher.stop();
}

fn bench_submit_only(c: &mut Criterion) {
    let dispatcher = Dispatcher::new(Config::default()).unwrap();

    c.bench_function("dispatch_submit", |b| {
        b.iter(|| dispatcher.submit(|| {}));
    });
}

criterion_group!(benches, bench_submit_and_drain, bench_submit_only);
criterion_main!(benches);
