#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::pedantic)]
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use revtun_core::transport::splice;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

/// Pushes `size` bytes through a spliced pair of in-memory pipes.
async fn splice_once(size: usize) {
    let (mut client, a) = duplex(256 * 1024);
    let (b, mut target) = duplex(256 * 1024);
    let relay = tokio::spawn(splice(a, b, None));

    let payload = vec![0xABu8; size];
    let writer = tokio::spawn(async move {
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();
        client
    });

    let mut received = Vec::with_capacity(size);
    target.read_to_end(&mut received).await.unwrap();
    assert_eq!(received.len(), size);

    drop(target);
    drop(writer.await.unwrap());
    relay.await.unwrap();
}

fn bench_splice(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("splice");

    for size in [4 * 1024, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| splice_once(black_box(size)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_splice);
criterion_main!(benches);
