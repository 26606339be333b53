//! Benchmarks for single chains with one sustained voice.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_modulation::modulation::{
    AhdsrEnvelope, ChainMode, Controller, ControllerSource, Interpolation, Lfo, ModulationChain, NoteContext,
    PrepareSpecs, Source, Velocity,
};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

fn gain_chain() -> ModulationChain {
    ModulationChain::new("gain", ChainMode::Gain)
        .with_source("velocity", Source::voice_start(Velocity::new()))
        .with_source("envelope", Source::envelope(AhdsrEnvelope::adsr(5.0, 200.0, 0.6, 300.0)))
        .with_source_intensity("tremolo", Source::time_variant(Lfo::new(5.0)), 0.3)
}

fn pitch_chain() -> ModulationChain {
    ModulationChain::new("pitch", ChainMode::Pitch)
        .with_source("wheel", Source::time_variant(Controller::new(ControllerSource::PitchBend)))
        .with_source_intensity("vibrato", Source::time_variant(Lfo::new(6.0)), 0.1)
}

pub fn bench_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/chains");
    let note = NoteContext::from_note(0, 60, 100);

    for &size in BLOCK_SIZES {
        let specs = PrepareSpecs::new(SAMPLE_RATE, size, 1);

        let cases: [(&str, ModulationChain); 3] = [
            ("gain_audio_rate", gain_chain()),
            ("gain_control_rate", gain_chain().control_rate(Interpolation::Linear)),
            ("pitch", pitch_chain()),
        ];

        for (name, mut chain) in cases {
            chain.prepare(&specs);
            chain.start_voice(&note);

            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                b.iter(|| {
                    chain.render_monophonic(0, size);
                    chain.calculate_block(black_box(0), 0, size);
                    black_box(chain.get_one_modulation_value(size - 1))
                })
            });
        }
    }

    group.finish();
}
