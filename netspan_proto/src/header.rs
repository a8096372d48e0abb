//! The fixed prefix of every data packet.

use core::fmt;

use netspan_utils::wire_order::{from_wire_u32, to_wire_u32};

use crate::HEADER_TAG;

/// Wire size of a data-packet header. The payload budget of a link is
/// always `mtu - HEADER_SIZE`.
pub const HEADER_SIZE: usize = 64;

/// Payload family carried behind a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Audio,
    Midi,
    Sync,
}

impl DataType {
    #[inline]
    const fn to_wire(self) -> u8 {
        match self {
            Self::Audio => b'a',
            Self::Midi => b'm',
            Self::Sync => b's',
        }
    }

    #[inline]
    const fn from_wire(c: u8) -> Option<Self> {
        match c {
            b'a' => Some(Self::Audio),
            b'm' => Some(Self::Midi),
            b's' => Some(Self::Sync),
            _ => None,
        }
    }
}

/// Which way the packet travels: send is master -> slave, return is
/// slave -> master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Return,
}

impl Direction {
    #[inline]
    const fn to_wire(self) -> u8 {
        match self {
            Self::Send => b's',
            Self::Return => b'r',
        }
    }

    #[inline]
    const fn from_wire(c: u8) -> Option<Self> {
        match c {
            b's' => Some(Self::Send),
            b'r' => Some(Self::Return),
            _ => None,
        }
    }
}

/// Header of one data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub data_type: DataType,
    pub direction: Direction,
    /// Must match the session's slave id.
    pub slave_id: u32,
    /// Number of data packets in this cycle.
    pub num_packets: u32,
    /// Payload size in bytes.
    pub packet_size: u32,
    /// Ports actually present in the payload.
    pub active_ports: u32,
    /// Process cycle counter, monotonic per direction.
    pub cycle: u32,
    /// Packet index within the cycle, in `[0, num_packets)`.
    pub sub_cycle: u32,
    /// Set on the final packet of a cycle.
    pub is_last_packet: bool,
}

/// Why a header was rejected. All of these drop the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    BadTag,
    UnknownDataType { got: u8 },
    UnknownDirection { got: u8 },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadTag => write!(f, "not a data packet header"),
            Self::UnknownDataType { got } => write!(f, "unknown data type {:?}", *got as char),
            Self::UnknownDirection { got } => write!(f, "unknown direction {:?}", *got as char),
        }
    }
}

impl core::error::Error for HeaderError {}

const OFF_DATA_TYPE: usize = 7;
const OFF_DIRECTION: usize = 8;
// Three reserved bytes keep the 32-bit fields at their aligned offsets.
const OFF_ID: usize = 12;
const OFF_NUM_PACKETS: usize = 16;
const OFF_PACKET_SIZE: usize = 20;
const OFF_ACTIVE_PORTS: usize = 24;
const OFF_CYCLE: usize = 28;
const OFF_SUB_CYCLE: usize = 32;
const OFF_IS_LAST: usize = 36;

const _: () = assert!(OFF_IS_LAST + 4 <= HEADER_SIZE);

#[inline]
fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&to_wire_u32(v));
}

#[inline]
fn get_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    from_wire_u32(b)
}

impl PacketHeader {
    /// Serializes to canonical wire form: tag, type chars, big-endian
    /// integers, zero padding up to [`HEADER_SIZE`].
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0; HEADER_SIZE];

        buf[..HEADER_TAG.len()].copy_from_slice(&HEADER_TAG);
        buf[OFF_DATA_TYPE] = self.data_type.to_wire();
        buf[OFF_DIRECTION] = self.direction.to_wire();
        put_u32(&mut buf, OFF_ID, self.slave_id);
        put_u32(&mut buf, OFF_NUM_PACKETS, self.num_packets);
        put_u32(&mut buf, OFF_PACKET_SIZE, self.packet_size);
        put_u32(&mut buf, OFF_ACTIVE_PORTS, self.active_ports);
        put_u32(&mut buf, OFF_CYCLE, self.cycle);
        put_u32(&mut buf, OFF_SUB_CYCLE, self.sub_cycle);
        put_u32(&mut buf, OFF_IS_LAST, self.is_last_packet as u32);

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_SIZE || buf[..HEADER_TAG.len()] != HEADER_TAG {
            return Err(HeaderError::BadTag);
        }

        let data_type = DataType::from_wire(buf[OFF_DATA_TYPE])
            .ok_or(HeaderError::UnknownDataType { got: buf[OFF_DATA_TYPE] })?;
        let direction = Direction::from_wire(buf[OFF_DIRECTION])
            .ok_or(HeaderError::UnknownDirection { got: buf[OFF_DIRECTION] })?;

        Ok(Self {
            data_type,
            direction,
            slave_id: get_u32(buf, OFF_ID),
            num_packets: get_u32(buf, OFF_NUM_PACKETS),
            packet_size: get_u32(buf, OFF_PACKET_SIZE),
            active_ports: get_u32(buf, OFF_ACTIVE_PORTS),
            cycle: get_u32(buf, OFF_CYCLE),
            sub_cycle: get_u32(buf, OFF_SUB_CYCLE),
            is_last_packet: get_u32(buf, OFF_IS_LAST) != 0,
        })
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} slave {} cycle {} sub {}/{} ({} bytes, {} ports{})",
            self.data_type,
            self.direction,
            self.slave_id,
            self.cycle,
            self.sub_cycle,
            self.num_packets,
            self.packet_size,
            self.active_ports,
            if self.is_last_packet { ", last" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{peek_kind, PacketKind};

    fn header() -> PacketHeader {
        PacketHeader {
            data_type: DataType::Audio,
            direction: Direction::Return,
            slave_id: 7,
            num_packets: 64,
            packet_size: 1024,
            active_ports: 16,
            cycle: 123456,
            sub_cycle: 63,
            is_last_packet: true,
        }
    }

    #[test]
    fn round_trip() {
        let h = header();
        let wire = h.encode();
        assert_eq!(wire.len(), HEADER_SIZE);
        assert_eq!(PacketHeader::decode(&wire), Ok(h));
        assert_eq!(peek_kind(&wire), PacketKind::Data);
    }

    #[test]
    fn padding_is_zero() {
        let wire = header().encode();
        assert!(wire[OFF_IS_LAST + 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn integers_are_big_endian() {
        let wire = header().encode();
        assert_eq!(&wire[OFF_CYCLE..OFF_CYCLE + 4], &123456u32.to_be_bytes());
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(PacketHeader::decode(b"headr\0\0"), Err(HeaderError::BadTag));

        let mut wire = header().encode();
        wire[OFF_DATA_TYPE] = b'x';
        assert_eq!(
            PacketHeader::decode(&wire),
            Err(HeaderError::UnknownDataType { got: b'x' })
        );

        let mut wire = header().encode();
        wire[OFF_DIRECTION] = b'q';
        assert_eq!(
            PacketHeader::decode(&wire),
            Err(HeaderError::UnknownDirection { got: b'q' })
        );
    }
}
