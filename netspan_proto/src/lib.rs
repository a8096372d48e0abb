#![no_std]
//! On-wire types of the netspan transport and their byte-order codecs.
//!
//! Two packet families exist on the link:
//!
//! - *session parameter* packets, exchanged while a master and a slave
//!   negotiate a session (and reused as sync-phase carriers),
//! - *data* packets, a fixed 64-byte header followed by an audio, MIDI or
//!   sync payload.
//!
//! Every packet starts with a 7-byte ASCII tag. This not only distinguishes
//! the two families, it quickly eliminates any foreign traffic by inspecting
//! the first bytes only.
//!
//! Integer header fields are big-endian on the wire; sample payloads are
//! little-endian and never pass through this crate (see
//! `netspan_utils::wire_order` for the policy).

extern crate alloc;

pub mod header;
pub mod midi;
pub mod params;
pub mod transport;

pub use header::{DataType, Direction, PacketHeader, HEADER_SIZE};
pub use midi::{MidiStreamHeader, MIDI_STREAM_HEADER_SIZE};
pub use params::{SampleEncoder, SessionParams, SyncPhase, SESSION_PARAMS_SIZE};
pub use transport::{Position, TimebaseMaster, TransportData, TransportState, TRANSPORT_DATA_SIZE};

/// Protocol version spoken by both master and slave. A peer announcing
/// anything else is refused.
pub const PROTOCOL_VERSION: u8 = 4;

pub(crate) const PARAMS_TAG: [u8; 7] = *b"params\0";
pub(crate) const HEADER_TAG: [u8; 7] = *b"headr\0\0";

/// What the first bytes of a packet claim it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    SessionParams,
    Data,
    Invalid,
}

/// Classifies a received packet from its leading tag alone.
#[inline]
pub fn peek_kind(buf: &[u8]) -> PacketKind {
    match buf.get(..PARAMS_TAG.len()) {
        Some(tag) if tag == PARAMS_TAG => PacketKind::SessionParams,
        Some(tag) if tag == HEADER_TAG => PacketKind::Data,
        _ => PacketKind::Invalid,
    }
}

/// Payload bytes available per datagram once the header is accounted for.
/// The session layer refuses MTUs that cannot carry a header and at least
/// one payload byte, so a sane session never sees zero here.
#[inline(always)]
pub const fn payload_budget(mtu: u32) -> usize {
    (mtu as usize).saturating_sub(HEADER_SIZE)
}
