//! Flush throughput for a few graph shapes: a long chain, a wide fan-out,
//! and a fan-out where recomputation lands on an equal value.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use trellis_core::{GraphOwner, Provider, StateProvider};

fn chain(length: usize) -> (GraphOwner, StateProvider<u64>, Provider<u64>) {
    let owner = GraphOwner::new();
    let source = StateProvider::with_value("source", 0_u64);

    let mut tail = {
        let source = source.clone();
        Provider::new("link-0", move |r| Ok(r.watch(&source)? + 1))
    };
    owner.read(&tail).unwrap();
    for index in 1..length {
        let previous = tail.clone();
        tail = Provider::new(format!("link-{index}"), move |r| Ok(r.watch(&previous)? + 1));
        // Materialize link by link to keep initializers from nesting deeply.
        owner.read(&tail).unwrap();
    }

    (owner, source, tail)
}

fn fanout(width: usize, modulus: u64) -> (GraphOwner, StateProvider<u64>) {
    let owner = GraphOwner::new();
    let source = StateProvider::with_value("source", 0_u64);

    for index in 0..width {
        let source = source.clone();
        let leaf = Provider::new(format!("leaf-{index}"), move |r| Ok(r.watch(&source)? % modulus));
        owner.read(&leaf).unwrap();
    }
    (owner, source)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for length in [10, 100, 1000] {
        let (owner, source, tail) = chain(length);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(length), &length, |b, _| {
            b.iter(|| {
                next += 1;
                owner.set(&source, next).unwrap();
                owner.flush().unwrap();
                black_box(owner.read(&tail).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    for width in [10, 100, 1000] {
        let (owner, source) = fanout(width, u64::MAX);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                owner.set(&source, next).unwrap();
                owner.flush().unwrap();
            })
        });
    }
    group.finish();
}

fn bench_fanout_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_unchanged");
    for width in [10, 100, 1000] {
        // Every leaf recomputes to the same value, so nothing fans out further.
        let (owner, source) = fanout(width, 1);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                owner.set(&source, next).unwrap();
                owner.flush().unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain, bench_fanout, bench_fanout_unchanged);
criterion_main!(benches);
