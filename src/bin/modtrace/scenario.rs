use saavy_modulation::{
    dsp::{curve::Curve, envelope::EnvelopePhase},
    io::PerformanceEvent,
    modulation::{envelope::EnvelopeAttribute, AhdsrEnvelope, Attributes, Interpolation},
    ChainMode, EngineConfig, ModulationChain, ModulationEngine, Source,
};

use crate::Cli;

const FIRST_KEY: u8 = 60;
const SECOND_KEY: u8 = 64;

pub struct Row {
    pub sample: usize,
    pub value: f32,
    pub phase: EnvelopePhase,
}

/// One or two notes played through a single gain chain.
pub struct Scenario {
    pub engine: ModulationEngine,
    block_size: usize,
    length: usize,
    every: usize,
    release_at: usize,
    second_note: Option<usize>,
}

impl Scenario {
    pub fn from_cli(cli: &Cli) -> Self {
        let mut envelope = AhdsrEnvelope::new();
        let attack_curve = if cli.exponential_attack { Curve::Exponential } else { Curve::Linear };

        for (attribute, value) in [
            (EnvelopeAttribute::Monophonic, cli.mono as u8 as f32),
            (EnvelopeAttribute::Retrigger, (!cli.legato) as u8 as f32),
            (EnvelopeAttribute::Attack, cli.attack),
            (EnvelopeAttribute::Hold, cli.hold),
            (EnvelopeAttribute::Decay, cli.decay),
            (EnvelopeAttribute::Sustain, cli.sustain),
            (EnvelopeAttribute::Release, cli.release),
            (EnvelopeAttribute::AttackCurve, attack_curve.as_attribute()),
        ] {
            envelope.set_attribute(attribute.index(), value);
        }

        let mut chain = ModulationChain::new("gain", ChainMode::Gain).with_source("envelope", Source::envelope(envelope));
        if cli.control_rate {
            chain = chain.control_rate(Interpolation::Linear);
        }

        let mut engine = ModulationEngine::new(EngineConfig::default().polyphony(8).max_block_size(cli.block_size))
            .with_chain(chain);
        engine.prepare(cli.sample_rate, cli.block_size);

        Self {
            block_size: engine.block_size(),
            engine,
            length: cli.length,
            every: cli.every.max(1),
            release_at: cli.release_at,
            second_note: cli.second_note,
        }
    }

    /// Absolute-time events inside `[start, start + len)`, as block offsets.
    fn events_in(&self, start: usize, len: usize) -> Vec<PerformanceEvent> {
        let mut events = Vec::new();
        let mut push = |at: usize, event: fn(usize) -> PerformanceEvent| {
            if (start..start + len).contains(&at) {
                events.push(event(at - start));
            }
        };

        push(0, |offset| PerformanceEvent::note_on(offset, FIRST_KEY, 100));
        if let Some(at) = self.second_note {
            push(at, |offset| PerformanceEvent::note_on(offset, SECOND_KEY, 100));
        }
        push(self.release_at, |offset| PerformanceEvent::note_off(offset, FIRST_KEY));

        events.sort_by_key(|e| e.offset);
        events
    }

    /// Render the whole scenario, tracing the first note's voice.
    pub fn run(&mut self) -> Vec<Row> {
        let mut rows = Vec::new();
        let mut traced = None;
        let mut start = 0;

        while start < self.length {
            let len = self.block_size.min(self.length - start);
            let events = self.events_in(start, len);
            self.engine.process_block(&events, len);

            if traced.is_none() {
                traced = self.engine.last_started_voice();
            }

            let voice = traced.unwrap_or(0);
            let chain = &self.engine.chains()[0];
            let phase = chain.envelope_phase(voice);

            for (i, &value) in chain.voice_values(voice)[..len].iter().enumerate() {
                let sample = start + i;
                if sample % self.every == 0 {
                    rows.push(Row { sample, value, phase });
                }
            }

            start += len;
        }

        log::debug!("rendered {} samples, {} voices stolen", self.length, self.engine.steal_count());
        rows
    }
}
