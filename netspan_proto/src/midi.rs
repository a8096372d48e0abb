//! Per-port framing header of the MIDI cycle stream.
//!
//! Only these three fields are byte-swapped; the event bytes that follow
//! them on the wire are opaque payload.

use netspan_utils::wire_order::{from_wire_u32, to_wire_u32};

/// Wire size of one per-port MIDI stream header.
pub const MIDI_STREAM_HEADER_SIZE: usize = 12;

/// Framing fields of one port's event stream within a MIDI cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MidiStreamHeader {
    /// Events in this port's stream.
    pub event_count: u32,
    /// Bytes of event data following this header.
    pub used_size: u32,
    /// Events dropped on the sending side because the cycle buffer was full.
    pub lost_events: u32,
}

impl MidiStreamHeader {
    pub fn encode(&self) -> [u8; MIDI_STREAM_HEADER_SIZE] {
        let mut buf = [0; MIDI_STREAM_HEADER_SIZE];
        buf[0..4].copy_from_slice(&to_wire_u32(self.event_count));
        buf[4..8].copy_from_slice(&to_wire_u32(self.used_size));
        buf[8..12].copy_from_slice(&to_wire_u32(self.lost_events));
        buf
    }

    /// `None` when the buffer cannot hold a stream header.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < MIDI_STREAM_HEADER_SIZE {
            return None;
        }
        let u32_at = |off: usize| {
            let mut b = [0; 4];
            b.copy_from_slice(&buf[off..off + 4]);
            from_wire_u32(b)
        };
        Some(Self {
            event_count: u32_at(0),
            used_size: u32_at(4),
            lost_events: u32_at(8),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let h = MidiStreamHeader {
            event_count: 3,
            used_size: 42,
            lost_events: 1,
        };
        assert_eq!(MidiStreamHeader::decode(&h.encode()), Some(h));
    }

    #[test]
    fn short_buffer() {
        assert_eq!(MidiStreamHeader::decode(&[0; 11]), None);
    }
}
