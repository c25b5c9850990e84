//! Stress tests for the dispatch loop and task buffers

use crossbeam_channel::bounded;
use dispatch_rs::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_producers_per_producer_fifo() {
    let dispatcher = Dispatcher::new(Config::default()).unwrap();
    dispatcher.start();

    let seen: Arc<Mutex<HashMap<usize, Vec<usize>>>> = Arc::new(Mutex::new(HashMap::new()));
    let producers: Vec<_> = (0..8)
        .map(|p| {
            let handle = dispatcher.handle();
            let seen = seen.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    let seen = seen.clone();
                    handle.submit(move || seen.lock().entry(p).or_default().push(i));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let (tx, rx) = bounded(1);
    dispatcher.submit(move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(30)).unwrap();

    for (_, order) in seen.lock().iter() {
        assert_eq!(*order, (0..10_000).collect::<Vec<_>>());
    }
    dispatcher.stop();
}

#[test]
#[ignore]
fn stress_test_buffer_concurrent_producers() {
    let (buffer, receiver) = TaskBuffer::new(BufferConfig {
        channel_capacity: 64,
        task_max: 48,
        task_resume: 8,
        spill_limit: None,
    })
    .unwrap();
    let config = Config::builder()
        .panic_strategy(PanicStrategy::Isolate)
        .build()
        .unwrap();
    let worker = BufferWorker::spawn("stress", receiver, &config).unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let buffer = buffer.clone();
            let count = count.clone();
            thread::spawn(move || {
                for _ in 0..20_000 {
                    let count = count.clone();
                    buffer.submit(move || {
                        count.fetch_add(1, Ordering::Relaxed);
                    });
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    worker.shutdown(TeardownPolicy::Flush);
    assert_eq!(count.load(Ordering::Relaxed), 160_000);
    assert_eq!(buffer.spilled(), 0);
    assert_eq!(buffer.admitted(), 0);
}
