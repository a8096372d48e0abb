//! Transport (playhead) state carried by sync packets.

use core::fmt;

use netspan_utils::wire_order::{
    from_wire_f64, from_wire_i32, from_wire_u32, to_wire_f64, to_wire_i32, to_wire_u32,
};

/// Wire size of a transport-data record.
pub const TRANSPORT_DATA_SIZE: usize = 28;

/// Timebase-master handover requested by a sync packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TimebaseMaster {
    #[default]
    NoChange = 0,
    Release = 1,
    Timebase = 2,
    Conditional = 3,
}

impl TimebaseMaster {
    #[inline]
    fn from_wire(v: u32) -> Self {
        match v {
            1 => Self::Release,
            2 => Self::Timebase,
            3 => Self::Conditional,
            _ => Self::NoChange,
        }
    }
}

/// Transport wheel state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    Rolling = 1,
    Looping = 2,
    Starting = 3,
    /// Starting, but waiting for networked peers to catch up.
    NetStarting = 4,
}

impl TransportState {
    #[inline]
    fn from_wire(v: i32) -> Self {
        match v {
            1 => Self::Rolling,
            2 => Self::Looping,
            3 => Self::Starting,
            4 => Self::NetStarting,
            _ => Self::Stopped,
        }
    }

    /// Human-readable state name, for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Rolling => "rolling",
            Self::Looping => "looping",
            Self::Starting => "starting",
            Self::NetStarting => "net starting",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Playhead position snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Position {
    pub frame: u32,
    pub sample_rate: u32,
    /// Tempo in beats per minute.
    pub tempo_bpm: f64,
}

/// The transport payload of a sync packet.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TransportData {
    /// Did the transport state change this cycle?
    pub new_state: bool,
    pub timebase_master: TimebaseMaster,
    pub state: TransportState,
    pub position: Position,
}

const OFF_NEW_STATE: usize = 0;
const OFF_TIMEBASE: usize = 4;
const OFF_STATE: usize = 8;
const OFF_FRAME: usize = 12;
const OFF_SAMPLE_RATE: usize = 16;
const OFF_TEMPO: usize = 20;

const _: () = assert!(OFF_TEMPO + 8 == TRANSPORT_DATA_SIZE);

impl TransportData {
    pub fn encode(&self) -> [u8; TRANSPORT_DATA_SIZE] {
        let mut buf = [0; TRANSPORT_DATA_SIZE];

        buf[OFF_NEW_STATE..OFF_NEW_STATE + 4].copy_from_slice(&to_wire_u32(self.new_state as u32));
        buf[OFF_TIMEBASE..OFF_TIMEBASE + 4]
            .copy_from_slice(&to_wire_u32(self.timebase_master as u32));
        buf[OFF_STATE..OFF_STATE + 4].copy_from_slice(&to_wire_i32(self.state as i32));
        buf[OFF_FRAME..OFF_FRAME + 4].copy_from_slice(&to_wire_u32(self.position.frame));
        buf[OFF_SAMPLE_RATE..OFF_SAMPLE_RATE + 4]
            .copy_from_slice(&to_wire_u32(self.position.sample_rate));
        buf[OFF_TEMPO..OFF_TEMPO + 8].copy_from_slice(&to_wire_f64(self.position.tempo_bpm));

        buf
    }

    /// Parses a transport record. `None` when the payload is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < TRANSPORT_DATA_SIZE {
            return None;
        }

        let u32_at = |off: usize| {
            let mut b = [0; 4];
            b.copy_from_slice(&buf[off..off + 4]);
            from_wire_u32(b)
        };
        let i32_at = |off: usize| {
            let mut b = [0; 4];
            b.copy_from_slice(&buf[off..off + 4]);
            from_wire_i32(b)
        };
        let mut tempo = [0; 8];
        tempo.copy_from_slice(&buf[OFF_TEMPO..OFF_TEMPO + 8]);

        Some(Self {
            new_state: u32_at(OFF_NEW_STATE) != 0,
            timebase_master: TimebaseMaster::from_wire(u32_at(OFF_TIMEBASE)),
            state: TransportState::from_wire(i32_at(OFF_STATE)),
            position: Position {
                frame: u32_at(OFF_FRAME),
                sample_rate: u32_at(OFF_SAMPLE_RATE),
                tempo_bpm: from_wire_f64(tempo),
            },
        })
    }
}

impl fmt::Display for TransportData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transport {} at frame {} ({} Hz, {} bpm){}",
            self.state,
            self.position.frame,
            self.position.sample_rate,
            self.position.tempo_bpm,
            if self.new_state { " [state change]" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let t = TransportData {
            new_state: true,
            timebase_master: TimebaseMaster::Conditional,
            state: TransportState::Rolling,
            position: Position {
                frame: 480_000,
                sample_rate: 48_000,
                tempo_bpm: 117.5,
            },
        };
        assert_eq!(TransportData::decode(&t.encode()), Some(t));
    }

    #[test]
    fn short_payload_is_refused() {
        assert_eq!(TransportData::decode(&[0; TRANSPORT_DATA_SIZE - 1]), None);
    }

    #[test]
    fn unknown_discriminants_degrade_to_defaults() {
        let mut wire = TransportData::default().encode();
        wire[OFF_TIMEBASE + 3] = 9;
        wire[OFF_STATE + 3] = 77;
        let t = TransportData::decode(&wire).unwrap();
        assert_eq!(t.timebase_master, TimebaseMaster::NoChange);
        assert_eq!(t.state, TransportState::Stopped);
    }

    #[test]
    fn state_names() {
        assert_eq!(TransportState::Rolling.name(), "rolling");
        assert_eq!(TransportState::NetStarting.name(), "net starting");
    }
}
