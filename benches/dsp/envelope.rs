//! Benchmarks for the AHDSR envelope state machine.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_modulation::dsp::{
    curve::{Curve, CurveConfig},
    envelope::{EnvelopeContext, EnvelopeState, StageParams},
};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

pub fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/envelope");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];
        let ctx = EnvelopeContext::new(SAMPLE_RATE as f32, size, CurveConfig::default());

        // Attack phase (long so the bench never leaves it)
        let params = StageParams::adsr(20_000.0, 100.0, 0.7, 300.0);
        let mut env = EnvelopeState::new();
        env.start(&params, &ctx, 1.0, false);
        group.bench_with_input(BenchmarkId::new("attack_linear", size), &size, |b, _| {
            b.iter(|| env.render(black_box(&mut buffer)))
        });

        let params = StageParams {
            attack_curve: Curve::Exponential,
            ..params
        };
        let mut env = EnvelopeState::new();
        env.start(&params, &ctx, 1.0, false);
        group.bench_with_input(BenchmarkId::new("attack_exponential", size), &size, |b, _| {
            b.iter(|| env.render(black_box(&mut buffer)))
        });

        // Sustain phase (holding steady)
        let params = StageParams::adsr(0.0, 0.0, 0.7, 300.0);
        let mut env = EnvelopeState::new();
        env.start(&params, &ctx, 1.0, false);
        group.bench_with_input(BenchmarkId::new("sustain", size), &size, |b, _| {
            b.iter(|| env.render(black_box(&mut buffer)))
        });

        // Release phase, restarted whenever it finishes
        let params = StageParams::adsr(0.0, 0.0, 0.7, 200.0);
        let mut env = EnvelopeState::new();
        group.bench_with_input(BenchmarkId::new("release", size), &size, |b, _| {
            b.iter(|| {
                if !env.is_playing() {
                    env.start(&params, &ctx, 1.0, false);
                    env.stop();
                }
                env.render(black_box(&mut buffer))
            })
        });
    }

    group.finish();
}
