//! Benchmarks for the full engine at increasing voice counts.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_modulation::{
    io::PerformanceEvent,
    modulation::{AhdsrEnvelope, ChainMode, Lfo, ModulationChain, Source, Velocity},
    EngineConfig, ModulationEngine,
};

use crate::SAMPLE_RATE;

const BLOCK: usize = 256;
const VOICE_COUNTS: &[usize] = &[1, 8, 32, 64];

pub fn bench_polyphony(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/polyphony");

    for &voices in VOICE_COUNTS {
        let mut engine = ModulationEngine::new(EngineConfig::default().polyphony(voices))
            .with_chain(
                ModulationChain::new("gain", ChainMode::Gain)
                    .with_source("velocity", Source::voice_start(Velocity::new()))
                    .with_source("envelope", Source::envelope(AhdsrEnvelope::adsr(5.0, 200.0, 0.6, 300.0))),
            )
            .with_chain(
                ModulationChain::new("pitch", ChainMode::Pitch)
                    .with_source_intensity("vibrato", Source::time_variant(Lfo::new(6.0)), 0.1),
            );
        engine.prepare(SAMPLE_RATE, BLOCK);

        // Hold a chord filling every voice
        let chord: Vec<PerformanceEvent> = (0..voices)
            .map(|i| PerformanceEvent::note_on(0, 36 + i as u8, 100))
            .collect();
        engine.process_block(&chord, BLOCK);

        let silence: [PerformanceEvent; 0] = [];
        group.bench_with_input(BenchmarkId::new("sustained", voices), &voices, |b, _| {
            b.iter(|| engine.process_block(black_box(&silence), BLOCK))
        });

        // A note arriving mid-block steals and splits the block every time
        let restrike = [PerformanceEvent::note_on(BLOCK / 2, 100, 100)];
        group.bench_with_input(BenchmarkId::new("steal_mid_block", voices), &voices, |b, _| {
            b.iter(|| engine.process_block(black_box(&restrike), BLOCK))
        });
    }

    group.finish();
}
