//! Transaction benchmarks - commit, abort, pipe and file workloads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ostx::fs::OpenFlags;
use ostx::pipe;
use ostx_bench::config::BenchmarkConfig;
use ostx_bench::workload::{init_logging, create_context, increment, random_payload};
use std::hint::black_box;

fn bench_empty_commit(c: &mut Criterion) {
    init_logging();
    let ctx = create_context().unwrap();
    let manager = ctx.manager();

    c.bench_function("Transaction/EmptyCommit", |b| {
        b.iter(|| {
            let mut tx = manager.begin();
            black_box(tx.commit().unwrap())
        })
    });
}

fn bench_pipe_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("Transaction/PipeCommit");
    let config = BenchmarkConfig::new();
    let ctx = create_context().unwrap();
    let manager = ctx.manager();
    let channel = manager.open_pipe().unwrap();

    for &size in &config.payload_sizes {
        let payload = random_payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &payload, |b, payload| {
            b.iter(|| {
                let mut tx = manager.begin();
                pipe::write(&mut tx, &channel, payload).unwrap();
                tx.commit().unwrap();
                let mut drained = 0;
                while drained < payload.len() {
                    drained += channel.read(payload.len() - drained).unwrap().len();
                }
                black_box(drained)
            })
        });
    }

    group.finish();
}

fn bench_abort(c: &mut Criterion) {
    let mut group = c.benchmark_group("Transaction/Abort");
    let config = BenchmarkConfig::new();
    let ctx = create_context().unwrap();
    let manager = ctx.manager();
    let channel = manager.open_pipe().unwrap();
    let payload = random_payload(64);

    for &ops in &config.ops_per_transaction {
        group.bench_with_input(BenchmarkId::new("writes", ops), &ops, |b, &ops| {
            b.iter(|| {
                let mut tx = manager.begin();
                for _ in 0..ops {
                    pipe::write(&mut tx, &channel, &payload).unwrap();
                }
                black_box(tx.abort().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_file_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Transaction/FileWrites");
    group.sample_size(20);
    let config = BenchmarkConfig::new();

    for &ops in &config.ops_per_transaction {
        group.bench_with_input(BenchmarkId::new("writes", ops), &ops, |b, &ops| {
            b.iter_with_setup(
                || create_context().unwrap(),
                |ctx| {
                    let path = ctx.file("data.bin");
                    let payload = random_payload(128);
                    let mut tx = ctx.manager().begin();
                    let fd = ostx::fs::open(
                        &mut tx,
                        &path,
                        OpenFlags::new().write(true).append(true).create(true),
                    )
                    .unwrap();
                    for _ in 0..ops {
                        ostx::fs::write(&mut tx, fd, &payload).unwrap();
                    }
                    black_box(tx.commit().unwrap())
                },
            )
        });
    }

    group.finish();
}

fn bench_counter_increment(c: &mut Criterion) {
    let ctx = create_context().unwrap();
    let manager = ctx.manager();
    let counters = ctx.counters(4).unwrap();

    c.bench_function("Transaction/CounterIncrement", |b| {
        b.iter(|| {
            manager
                .run(|tx| {
                    for path in &counters {
                        increment(tx, path)?;
                    }
                    Ok(())
                })
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_empty_commit,
    bench_pipe_commit,
    bench_abort,
    bench_file_writes,
    bench_counter_increment,
);
criterion_main!(benches);
