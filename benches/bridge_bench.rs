// In benches/bridge_bench.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use zim_bridge::bridge::ThreadSafeCallbackBridge;
use zim_bridge::host::{HostFunction, HostObject, HostRuntime, HostValue};
use zim_bridge::writer::blob;
use zim_bridge::writer::{ContentFeedAdapter, ContentProvider};

// --- Benchmark Suite ---

const FEED_SIZE: usize = 1 << 20; // 1 MiB
const FEED_CHUNK: usize = 64 << 10; // 64 KiB

/// Times `iters` calls made from a worker while the host thread services them.
fn cross_thread(rt: &HostRuntime, bridge: &Arc<ThreadSafeCallbackBridge<u64, u64>>, iters: u64) -> Duration {
    let remote = Arc::clone(bridge);
    rt.run_worker("bench-worker", move || {
        let start = Instant::now();
        for i in 0..iters {
            black_box(remote.invoke(black_box(i)).unwrap());
        }
        start.elapsed()
    })
    .unwrap()
}

fn bench_bridge_invoke(c: &mut Criterion) {
    let rt = HostRuntime::new("bench");
    let bridge = Arc::new(ThreadSafeCallbackBridge::new(&rt, "bench", 0, |x: u64| Ok(x + 1)));
    let bounded = Arc::new(ThreadSafeCallbackBridge::new(&rt, "bench-bounded", 1, |x: u64| Ok(x + 1)));

    let mut group = c.benchmark_group("Bridge Invoke");

    // --- Host thread: runs inline ---
    group.bench_function("Invoke [1] Same Thread", |b| {
        b.iter(|| black_box(bridge.invoke(black_box(41)).unwrap()))
    });

    // --- Worker thread: one host round trip per call ---
    group.bench_function("Invoke [2] Cross Thread (Unbounded)", |b| {
        b.iter_custom(|iters| cross_thread(&rt, &bridge, iters))
    });
    group.bench_function("Invoke [3] Cross Thread (Capacity 1)", |b| {
        b.iter_custom(|iters| cross_thread(&rt, &bounded, iters))
    });

    group.finish();
}

fn bench_feed_adapter(c: &mut Criterion) {
    let rt = HostRuntime::new("bench-feed");
    let payload = blob::host_blob_from_bytes(vec![7u8; FEED_CHUNK]);

    let mut group = c.benchmark_group("Content Feed");
    group.throughput(criterion::Throughput::Bytes(FEED_SIZE as u64));

    group.bench_function("Drain 1 MiB in 64 KiB chunks from a worker", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let chunk = payload.clone();
                let provider = HostObject::with_props([("size", HostValue::Number(FEED_SIZE as f64))]);
                provider.set(
                    "feed",
                    HostFunction::new(move |_| Ok(HostValue::Object(chunk.clone()))),
                );
                let mut adapter = ContentFeedAdapter::new(&rt, &provider).unwrap();
                total += rt
                    .run_worker("bench-feed-worker", move || {
                        let start = Instant::now();
                        let mut delivered = 0u64;
                        while delivered < adapter.size() {
                            delivered += adapter.feed().unwrap().size();
                        }
                        start.elapsed()
                    })
                    .unwrap();
            }
            total
        })
    });

    group.finish();
}

// These two lines generate the main function and register the benchmark groups.
criterion_group!(benches, bench_bridge_invoke, bench_feed_adapter);
criterion_main!(benches);
