//! Benchmarks for per-sample combination math.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_modulation::dsp::{
    modulate::{apply_gain_intensity, blend, unipolar_to_normalised},
    sanitize::sanitize_block,
};

use crate::BLOCK_SIZES;

pub fn bench_modulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/modulate");

    for &size in BLOCK_SIZES {
        let source: Vec<f32> = (0..size).map(|i| i as f32 / size as f32).collect();
        let mut buffer = vec![1.0f32; size];

        group.bench_with_input(BenchmarkId::new("magnitude", size), &size, |b, _| {
            b.iter(|| {
                for (out, &s) in buffer.iter_mut().zip(&source) {
                    *out *= apply_gain_intensity(s, black_box(0.5));
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("bipolar", size), &size, |b, _| {
            b.iter(|| {
                for (out, &s) in buffer.iter_mut().zip(&source) {
                    *out = blend(*out, unipolar_to_normalised(s, true), black_box(0.5));
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("sanitize", size), &size, |b, _| {
            b.iter(|| sanitize_block(black_box(&mut buffer), 0.0, 1.0, 1.0))
        });
    }

    group.finish();
}
