use crate::io::midi::MidiEvent;

/// Decode a raw channel-voice message. Channels are reported 1-based.
///
/// Returns `None` for system messages, running status and truncated input.
pub fn midi_from_bytes(bytes: &[u8]) -> Option<MidiEvent> {
    let status = *bytes.first()?;
    if status < 0x80 || status >= 0xF0 {
        return None;
    }

    let channel = (status & 0x0F) + 1;
    let data = |i: usize| bytes.get(i).map(|b| b & 0x7F);

    let event = match status & 0xF0 {
        0x80 => MidiEvent::NoteOff {
            channel,
            key: data(1)?,
            velocity: data(2)?,
        },
        0x90 => MidiEvent::NoteOn {
            channel,
            key: data(1)?,
            velocity: data(2)?,
        },
        0xB0 => match (data(1)?, data(2)?) {
            (123, _) => MidiEvent::AllNotesOff { channel },
            (controller, value) => MidiEvent::ControlChange {
                channel,
                controller,
                value,
            },
        },
        0xD0 => MidiEvent::Aftertouch {
            channel,
            pressure: data(1)?,
        },
        0xE0 => {
            let raw = (data(2)? as i16) << 7 | data(1)? as i16;
            MidiEvent::PitchBend {
                channel,
                value: raw - 8192,
            }
        }
        _ => return None,
    };

    Some(event)
}

/// 7-bit value to `[0, 1]`.
#[inline]
pub fn unit_from_7bit(value: u8) -> f32 {
    (value.min(127)) as f32 / 127.0
}

/// 14-bit signed pitch bend to `[0, 1]` with the centre at 0.5.
#[inline]
pub fn unit_from_pitch_bend(value: i16) -> f32 {
    ((value as f32 + 8192.0) / 16383.0).clamp(0.0, 1.0)
}

pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}
