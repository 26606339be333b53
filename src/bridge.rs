//! Lock-free links between the audio thread and everything else.
//!
//! Two bounded single-producer queues:
//!
//! - controls flow in (`ControlHandle` → engine), drained at block start
//! - display values flow out (engine → `DisplayReader`), one per chain per block
//!
//! Neither side ever blocks. A full control queue rejects the message; a
//! full display queue drops the value, since the next block sends a fresher one.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::{dsp::envelope::EnvelopePhase, synth::message::ControlMessage};

/// Snapshot of one chain's output for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayValue {
    pub chain: usize,
    pub voice: usize,
    pub value: f32,
    pub phase: EnvelopePhase,
}

/// Non-realtime sender of [`ControlMessage`]s.
pub struct ControlHandle {
    tx: Producer<ControlMessage>,
}

impl ControlHandle {
    /// Returns `false` if the queue is full and the message was dropped.
    pub fn push(&mut self, message: ControlMessage) -> bool {
        self.tx.push(message).is_ok()
    }

    pub fn slots(&self) -> usize {
        self.tx.slots()
    }
}

/// UI-side reader keeping the latest value per chain.
pub struct DisplayReader {
    rx: Consumer<DisplayValue>,
    latest: Vec<Option<DisplayValue>>,
}

impl DisplayReader {
    /// Drain pending values. Returns how many were read.
    pub fn poll(&mut self) -> usize {
        let mut count = 0;

        while let Ok(value) = self.rx.pop() {
            if value.chain >= self.latest.len() {
                self.latest.resize(value.chain + 1, None);
            }
            self.latest[value.chain] = Some(value);
            count += 1;
        }

        count
    }

    pub fn latest(&self, chain: usize) -> Option<DisplayValue> {
        self.latest.get(chain).copied().flatten()
    }
}

/// The engine's ends of both queues.
pub struct EngineBridge {
    pub(crate) controls: Consumer<ControlMessage>,
    pub(crate) display: Producer<DisplayValue>,
}

impl EngineBridge {
    /// Push without blocking; a full queue drops the value.
    pub(crate) fn publish(&mut self, value: DisplayValue) {
        let _ = self.display.push(value);
    }
}

/// Create both queues with room for `capacity` entries each.
pub fn bridge(capacity: usize) -> (ControlHandle, DisplayReader, EngineBridge) {
    let (control_tx, control_rx) = RingBuffer::new(capacity);
    let (display_tx, display_rx) = RingBuffer::new(capacity);

    (
        ControlHandle { tx: control_tx },
        DisplayReader {
            rx: display_rx,
            latest: Vec::new(),
        },
        EngineBridge {
            controls: control_rx,
            display: display_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::message::MessageReceiver;

    #[test]
    fn full_control_queue_rejects() {
        let (mut handle, _reader, mut engine) = bridge(1);

        assert!(handle.push(ControlMessage::AllNotesOff));
        assert!(!handle.push(ControlMessage::AllNotesOff));

        assert_eq!(MessageReceiver::pop(&mut engine.controls), Some(ControlMessage::AllNotesOff));
        assert_eq!(MessageReceiver::pop(&mut engine.controls), None);
    }

    #[test]
    fn reader_keeps_latest_per_chain() {
        let (_handle, mut reader, mut engine) = bridge(8);

        for (chain, value) in [(0, 0.1), (1, 0.2), (0, 0.3)] {
            engine.publish(DisplayValue {
                chain,
                voice: 0,
                value,
                phase: EnvelopePhase::Sustain,
            });
        }

        assert_eq!(reader.poll(), 3);
        assert_eq!(reader.latest(0).map(|v| v.value), Some(0.3));
        assert_eq!(reader.latest(1).map(|v| v.value), Some(0.2));
        assert!(reader.latest(2).is_none());
    }
}
