use std::iter::repeat_with;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use paxstore::{
    clustering::zorder::{datum_to_bytes, interleave_bits, ZOrderKeyBuilder, N_BYTES},
    Datum,
};

fn random_rows(ncolumns: usize, count: usize) -> Vec<Vec<Option<Datum>>> {
    let mut rng = fastrand::Rng::with_seed(42);
    repeat_with(|| {
        (0..ncolumns)
            .map(|i| match i % 3 {
                0 => Some(Datum::Int8(rng.i64(..))),
                1 => Some(Datum::Float8(rng.f64() * 1e6 - 5e5)),
                _ => Some(Datum::Text(repeat_with(|| rng.alphanumeric()).take(12).collect())),
            })
            .collect()
    })
    .take(count)
    .collect()
}

fn encode(c: &mut Criterion) {
    let rows = random_rows(3, 1024);
    c.bench_function("datum_to_bytes", |b| {
        b.iter(|| {
            for row in &rows {
                for value in row {
                    criterion::black_box(datum_to_bytes(value.as_ref()));
                }
            }
        })
    });
}

fn interleave(c: &mut Criterion) {
    let mut group = c.benchmark_group("interleave_bits");
    for ncolumns in [2usize, 4, 8, 32] {
        let src: Vec<u8> = repeat_with(fastrand::u8).take(ncolumns * N_BYTES).collect();
        let mut dst = vec![0u8; src.len()];
        group.bench_with_input(BenchmarkId::from_parameter(ncolumns), &ncolumns, |b, &n| {
            b.iter(|| interleave_bits(&src, &mut dst, n))
        });
    }
    group.finish();
}

fn build_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("zorder_key_builder");
    for ncolumns in [2usize, 6] {
        let rows = random_rows(ncolumns, 1024);
        let mut builder = ZOrderKeyBuilder::new((0..ncolumns).collect());
        group.bench_with_input(BenchmarkId::from_parameter(ncolumns), &rows, |b, rows| {
            b.iter(|| {
                for row in rows {
                    criterion::black_box(builder.build(row));
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, encode, interleave, build_keys);
criterion_main!(benches);
