//! Session parameters: the record a master and a slave agree on once, which
//! then parameterizes every downstream component on both peers.

use alloc::string::String;
use core::fmt;

use netspan_utils::wire_order::{from_wire_i32, from_wire_u32, to_wire_i32, to_wire_u32};
use serde::{Deserialize, Serialize};

use crate::{PARAMS_TAG, PROTOCOL_VERSION};

/// Wire size of a session-parameters packet.
pub const SESSION_PARAMS_SIZE: usize = 608;

const SLAVE_NAME_SIZE: usize = 32;
const HOST_NAME_SIZE: usize = 256;

/// Sync phase carried by a session-parameters packet during negotiation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    #[default]
    Invalid = 0,
    /// A slave advertises itself.
    SlaveAvailable = 1,
    /// The master answers with the slave's setup.
    SlaveSetup = 2,
    /// The slave is ready, start the master.
    StartMaster = 3,
    /// The master is ready, activate the slave.
    StartSlave = 4,
    /// The master must stop.
    KillMaster = 5,
}

impl SyncPhase {
    #[inline]
    fn from_wire(v: u32) -> Self {
        match v {
            1 => Self::SlaveAvailable,
            2 => Self::SlaveSetup,
            3 => Self::StartMaster,
            4 => Self::StartSlave,
            5 => Self::KillMaster,
            _ => Self::Invalid,
        }
    }
}

/// Wire representation of the audio payload encoding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleEncoder {
    #[default]
    Float = 0,
    Int = 1,
    Celt = 2,
}

impl SampleEncoder {
    #[inline]
    fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Float),
            1 => Some(Self::Int),
            2 => Some(Self::Celt),
            _ => None,
        }
    }
}

impl fmt::Display for SampleEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Float => "float",
            Self::Int => "16-bit PCM",
            Self::Celt => "CELT",
        })
    }
}

/// Master/slave connection parameters, negotiated once per session and
/// read-only afterwards.
///
/// Names longer than their wire slot (31 bytes for the slave name, 255 for
/// host names) are truncated on encode.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Sync phase this packet carries (negotiation only).
    pub packet_id: SyncPhase,
    pub slave_name: String,
    pub master_host: String,
    pub slave_host: String,
    /// Connection MTU in bytes.
    pub mtu: u32,
    /// Slave id, assigned by the master.
    pub slave_id: u32,
    /// Is the slave linked to the master's transport?
    pub transport_sync: bool,
    /// master -> slave audio channels.
    pub send_audio_channels: i32,
    /// slave -> master audio channels.
    pub return_audio_channels: i32,
    /// master -> slave MIDI channels.
    pub send_midi_channels: i32,
    /// slave -> master MIDI channels.
    pub return_midi_channels: i32,
    pub sample_rate: u32,
    /// Samples per port per cycle.
    pub period_size: u32,
    pub sample_encoder: SampleEncoder,
    /// KB per second, meaningful for the CELT encoder only.
    pub kbps: u32,
    /// Is the slave driven in sync mode?
    pub slave_sync_mode: bool,
    /// Network latency in cycles.
    pub network_latency: u32,
}

/// Why a session-parameters packet was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsError {
    /// Packet does not carry the `"params"` tag or is too short.
    BadTag,
    /// Peer speaks another protocol version. Fatal to the connection.
    VersionMismatch { got: u8 },
    /// Unknown sample encoder discriminant.
    BadEncoder { got: u32 },
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadTag => write!(f, "not a session parameters packet"),
            Self::VersionMismatch { got } => {
                write!(f, "protocol version {got} (expected {PROTOCOL_VERSION})")
            }
            Self::BadEncoder { got } => write!(f, "unknown sample encoder {got}"),
        }
    }
}

impl core::error::Error for ParamsError {}

// Field offsets on the wire, matching the declaration order.
const OFF_VERSION: usize = 7;
const OFF_PACKET_ID: usize = 8;
const OFF_SLAVE_NAME: usize = 12;
const OFF_MASTER_HOST: usize = OFF_SLAVE_NAME + SLAVE_NAME_SIZE;
const OFF_SLAVE_HOST: usize = OFF_MASTER_HOST + HOST_NAME_SIZE;
const OFF_MTU: usize = OFF_SLAVE_HOST + HOST_NAME_SIZE;
const OFF_ID: usize = OFF_MTU + 4;
const OFF_TRANSPORT_SYNC: usize = OFF_ID + 4;
const OFF_SEND_AUDIO: usize = OFF_TRANSPORT_SYNC + 4;
const OFF_RETURN_AUDIO: usize = OFF_SEND_AUDIO + 4;
const OFF_SEND_MIDI: usize = OFF_RETURN_AUDIO + 4;
const OFF_RETURN_MIDI: usize = OFF_SEND_MIDI + 4;
const OFF_SAMPLE_RATE: usize = OFF_RETURN_MIDI + 4;
const OFF_PERIOD_SIZE: usize = OFF_SAMPLE_RATE + 4;
const OFF_ENCODER: usize = OFF_PERIOD_SIZE + 4;
const OFF_KBPS: usize = OFF_ENCODER + 4;
const OFF_SLAVE_SYNC: usize = OFF_KBPS + 4;
const OFF_LATENCY: usize = OFF_SLAVE_SYNC + 4;

const _: () = assert!(OFF_LATENCY + 4 == SESSION_PARAMS_SIZE);

#[inline]
fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&to_wire_u32(v));
}

#[inline]
fn put_i32(buf: &mut [u8], off: usize, v: i32) {
    buf[off..off + 4].copy_from_slice(&to_wire_i32(v));
}

#[inline]
fn get_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    from_wire_u32(b)
}

#[inline]
fn get_i32(buf: &[u8], off: usize) -> i32 {
    let mut b = [0; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    from_wire_i32(b)
}

/// NUL-padded, always NUL-terminated string field.
#[inline]
fn put_name(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
    dst[n..].fill(0);
}

#[inline]
fn get_name(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

impl SessionParams {
    /// Serializes to canonical wire form, big-endian integer fields.
    pub fn encode(&self) -> [u8; SESSION_PARAMS_SIZE] {
        let mut buf = [0; SESSION_PARAMS_SIZE];

        buf[..PARAMS_TAG.len()].copy_from_slice(&PARAMS_TAG);
        buf[OFF_VERSION] = PROTOCOL_VERSION;
        put_u32(&mut buf, OFF_PACKET_ID, self.packet_id as u32);
        put_name(&mut buf[OFF_SLAVE_NAME..OFF_MASTER_HOST], &self.slave_name);
        put_name(&mut buf[OFF_MASTER_HOST..OFF_SLAVE_HOST], &self.master_host);
        put_name(&mut buf[OFF_SLAVE_HOST..OFF_MTU], &self.slave_host);
        put_u32(&mut buf, OFF_MTU, self.mtu);
        put_u32(&mut buf, OFF_ID, self.slave_id);
        put_u32(&mut buf, OFF_TRANSPORT_SYNC, self.transport_sync as u32);
        put_i32(&mut buf, OFF_SEND_AUDIO, self.send_audio_channels);
        put_i32(&mut buf, OFF_RETURN_AUDIO, self.return_audio_channels);
        put_i32(&mut buf, OFF_SEND_MIDI, self.send_midi_channels);
        put_i32(&mut buf, OFF_RETURN_MIDI, self.return_midi_channels);
        put_u32(&mut buf, OFF_SAMPLE_RATE, self.sample_rate);
        put_u32(&mut buf, OFF_PERIOD_SIZE, self.period_size);
        put_u32(&mut buf, OFF_ENCODER, self.sample_encoder as u32);
        put_u32(&mut buf, OFF_KBPS, self.kbps);
        put_u32(&mut buf, OFF_SLAVE_SYNC, self.slave_sync_mode as u32);
        put_u32(&mut buf, OFF_LATENCY, self.network_latency);

        buf
    }

    /// Parses a session-parameters packet, refusing foreign tags and
    /// protocol versions other than [`PROTOCOL_VERSION`].
    pub fn decode(buf: &[u8]) -> Result<Self, ParamsError> {
        if buf.len() < SESSION_PARAMS_SIZE || buf[..PARAMS_TAG.len()] != PARAMS_TAG {
            return Err(ParamsError::BadTag);
        }
        if buf[OFF_VERSION] != PROTOCOL_VERSION {
            return Err(ParamsError::VersionMismatch { got: buf[OFF_VERSION] });
        }

        let encoder_raw = get_u32(buf, OFF_ENCODER);
        let sample_encoder =
            SampleEncoder::from_wire(encoder_raw).ok_or(ParamsError::BadEncoder { got: encoder_raw })?;

        Ok(Self {
            packet_id: SyncPhase::from_wire(get_u32(buf, OFF_PACKET_ID)),
            slave_name: get_name(&buf[OFF_SLAVE_NAME..OFF_MASTER_HOST]),
            master_host: get_name(&buf[OFF_MASTER_HOST..OFF_SLAVE_HOST]),
            slave_host: get_name(&buf[OFF_SLAVE_HOST..OFF_MTU]),
            mtu: get_u32(buf, OFF_MTU),
            slave_id: get_u32(buf, OFF_ID),
            transport_sync: get_u32(buf, OFF_TRANSPORT_SYNC) != 0,
            send_audio_channels: get_i32(buf, OFF_SEND_AUDIO),
            return_audio_channels: get_i32(buf, OFF_RETURN_AUDIO),
            send_midi_channels: get_i32(buf, OFF_SEND_MIDI),
            return_midi_channels: get_i32(buf, OFF_RETURN_MIDI),
            sample_rate: get_u32(buf, OFF_SAMPLE_RATE),
            period_size: get_u32(buf, OFF_PERIOD_SIZE),
            sample_encoder,
            kbps: get_u32(buf, OFF_KBPS),
            slave_sync_mode: get_u32(buf, OFF_SLAVE_SYNC) != 0,
            network_latency: get_u32(buf, OFF_LATENCY),
        })
    }

    /// Reads the sync phase out of an already-validated parameters packet.
    #[inline]
    pub fn peek_sync_phase(buf: &[u8]) -> SyncPhase {
        if buf.len() < OFF_PACKET_ID + 4 || buf[..PARAMS_TAG.len()] != PARAMS_TAG {
            return SyncPhase::Invalid;
        }
        SyncPhase::from_wire(get_u32(buf, OFF_PACKET_ID))
    }

    /// Stamps a new sync phase into an encoded parameters packet in place.
    /// Anything shorter than a parameters packet is left untouched.
    #[inline]
    pub fn set_sync_phase(buf: &mut [u8], phase: SyncPhase) {
        if buf.len() >= OFF_PACKET_ID + 4 {
            put_u32(buf, OFF_PACKET_ID, phase as u32);
        }
    }
}

impl fmt::Display for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session parameters:")?;
        writeln!(f, "  slave name   : {}", self.slave_name)?;
        writeln!(f, "  hosts        : {} -> {}", self.master_host, self.slave_host)?;
        writeln!(f, "  mtu          : {}", self.mtu)?;
        writeln!(f, "  slave id     : {}", self.slave_id)?;
        writeln!(
            f,
            "  audio ch     : {} send / {} return",
            self.send_audio_channels, self.return_audio_channels
        )?;
        writeln!(
            f,
            "  midi ch      : {} send / {} return",
            self.send_midi_channels, self.return_midi_channels
        )?;
        writeln!(f, "  sample rate  : {}", self.sample_rate)?;
        writeln!(f, "  period size  : {}", self.period_size)?;
        writeln!(f, "  encoder      : {}", self.sample_encoder)?;
        if let SampleEncoder::Celt = self.sample_encoder {
            writeln!(f, "  bitrate      : {} KB/s", self.kbps)?;
        }
        writeln!(f, "  slave mode   : {}", if self.slave_sync_mode { "sync" } else { "async" })?;
        writeln!(f, "  latency      : {} cycles", self.network_latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn params() -> SessionParams {
        SessionParams {
            packet_id: SyncPhase::SlaveSetup,
            slave_name: "renderer".to_string(),
            master_host: "studio-a".to_string(),
            slave_host: "rack-7".to_string(),
            mtu: 1500,
            slave_id: 3,
            transport_sync: true,
            send_audio_channels: 16,
            return_audio_channels: 2,
            send_midi_channels: 1,
            return_midi_channels: 1,
            sample_rate: 48000,
            period_size: 1024,
            sample_encoder: SampleEncoder::Celt,
            kbps: 64,
            slave_sync_mode: false,
            network_latency: 2,
        }
    }

    #[test]
    fn round_trip() {
        let p = params();
        let wire = p.encode();
        assert_eq!(SessionParams::decode(&wire), Ok(p));
    }

    #[test]
    fn integers_are_big_endian() {
        let wire = params().encode();
        // mtu = 1500 = 0x05DC at its fixed offset
        assert_eq!(&wire[OFF_MTU..OFF_MTU + 4], &[0, 0, 0x05, 0xDC]);
    }

    #[test]
    fn version_mismatch_is_refused() {
        let mut wire = params().encode();
        wire[OFF_VERSION] = 3;
        assert_eq!(
            SessionParams::decode(&wire),
            Err(ParamsError::VersionMismatch { got: 3 })
        );
    }

    #[test]
    fn foreign_tag_is_refused() {
        let mut wire = params().encode();
        wire[0] = b'q';
        assert_eq!(SessionParams::decode(&wire), Err(ParamsError::BadTag));
        assert_eq!(SessionParams::decode(&wire[..10]), Err(ParamsError::BadTag));
    }

    #[test]
    fn over_long_names_truncate_to_their_slot() {
        let mut p = params();
        p.slave_name = "x".repeat(100);
        let wire = p.encode();
        let back = SessionParams::decode(&wire).unwrap();
        assert_eq!(back.slave_name.len(), SLAVE_NAME_SIZE - 1);
    }

    #[test]
    fn sync_phase_peek_and_set() {
        let mut wire = params().encode();
        assert_eq!(SessionParams::peek_sync_phase(&wire), SyncPhase::SlaveSetup);
        SessionParams::set_sync_phase(&mut wire, SyncPhase::StartMaster);
        assert_eq!(SessionParams::peek_sync_phase(&wire), SyncPhase::StartMaster);
        assert_eq!(SessionParams::peek_sync_phase(b"junk"), SyncPhase::Invalid);
    }
}
