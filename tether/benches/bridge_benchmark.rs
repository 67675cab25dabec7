//! Run with:
//!   cargo bench --bench bridge_benchmark

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tether::{Array, Bridge, MachineCreateInfo, Vector};

fn create_bridge() -> Bridge {
    Bridge::with_machine(MachineCreateInfo::default())
}

/// Benchmark 1: boxing a host vector and reading it back
/// Tests composite boxing under a pause plus the anchoring round trip.
fn bench_vector_round_trip(c: &mut Criterion) {
    let bridge = create_bridge();
    let data: Vec<i64> = (0..256).collect();

    c.bench_function("vector_round_trip_256", |b| {
        b.iter(|| {
            let proxy = bridge.create(black_box(&data)).expect("boxing failed");
            let back = proxy.get::<Vec<i64>>().expect("unboxing failed");
            black_box(back);
        });
    });
}

/// Benchmark 2: column-major element reads through a typed view
/// Tests host-side bounds checks and per-element unboxing.
fn bench_matrix_walk(c: &mut Criterion) {
    let bridge = create_bridge();
    let proxy = bridge
        .eval("reshape(collect(1:1024), 32, 32)")
        .expect("setup failed");
    let matrix = Array::<i64, 2>::new(proxy).expect("not a matrix");

    c.bench_function("matrix_walk_32x32", |b| {
        b.iter(|| {
            let mut sum = 0;
            for column in 0..32 {
                for row in 0..32 {
                    sum += matrix.at([row, column]).expect("read failed");
                }
            }
            black_box(sum);
        });
    });
}

/// Benchmark 3: growing a foreign vector one call at a time
/// Tests argument boxing and the exception slate check per call.
fn bench_vector_push(c: &mut Criterion) {
    let bridge = create_bridge();

    c.bench_function("vector_push_100", |b| {
        b.iter(|| {
            let vector = Vector::<i64>::new(&bridge).expect("setup failed");
            for i in 0..100 {
                vector.push_back(black_box(&i)).expect("push failed");
            }
            black_box(vector.element_count());
        });
    });
}

/// Benchmark 4: foreign calls through a resolved function
fn bench_calls(c: &mut Criterion) {
    let bridge = create_bridge();
    let plus = bridge.function("+").expect("no +");

    c.bench_function("call_plus", |b| {
        b.iter(|| {
            let sum = plus.call(&[black_box(&1i64), &2i64]).expect("call failed");
            black_box(sum.get::<i64>().expect("not an integer"));
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_vector_round_trip, bench_matrix_walk, bench_vector_push, bench_calls
}
criterion_main!(benches);
