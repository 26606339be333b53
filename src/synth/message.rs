use std::collections::VecDeque;

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

/// Parameter changes sent to the engine from outside the audio thread.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ControlMessage {
    SetAttribute {
        chain: usize,
        slot: usize,
        index: usize,
        value: f32,
    },
    SetIntensity {
        chain: usize,
        slot: usize,
        intensity: f32,
    },
    SetBypassed {
        chain: usize,
        slot: usize,
        bypassed: bool,
    },
    AllNotesOff,
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<ControlMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<ControlMessage> {
    fn pop(&mut self) -> Option<ControlMessage> {
        Consumer::pop(self).ok()
    }
}

impl MessageReceiver for VecDeque<ControlMessage> {
    fn pop(&mut self) -> Option<ControlMessage> {
        self.pop_front()
    }
}
