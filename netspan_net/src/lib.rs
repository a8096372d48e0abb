//! Framing core of the netspan transport: splitting one processing cycle of
//! audio and MIDI into MTU-bounded sub-cycle packets and reassembling them
//! on the far side.
//!
//! A cycle of `period_size` samples across `N` ports becomes `K` packets of
//! at most `mtu - HEADER_SIZE` payload bytes each. The sub-period length
//! (samples per port per packet) is derived in exactly one place,
//! [`sub_period_len`], and every framer obeys the same sub-cycle sequencing
//! gate: packets arrive with strictly increasing sub-cycle indices, any gap
//! is reported (never fatal), and the gate rearms at the cycle boundary.

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod midi;
pub mod sync;

pub use audio::{PackingMode, PortList};
pub use buffer::{CeltAudioBuffer, FloatAudioBuffer, IntAudioBuffer, NetAudioBuffer};
pub use codec::{BlockCodec, CodecError, CodecSpec};
pub use midi::{MidiEvent, MidiPortBuffer, NetMidiBuffer};
pub use sync::{parse_sync_payload, render_sync_payload};

/// Width of one uncompressed audio sample on the wire.
pub const SAMPLE_SIZE: usize = core::mem::size_of::<f32>();

/// Hard protocol cap on the active-port list carried by sync packets.
pub const MAX_ACTIVE_PORTS: usize = 512;

/// Recoverable per-packet conditions. None of these end the session; the
/// caller logs, drops or silences as the policy of each framer dictates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet(s) missing in cycle {cycle}: expected sub-cycle {expected}, got {got}")]
    SequenceGap { cycle: u32, expected: u32, got: u32 },
    #[error("payload of {got} bytes exceeds the {budget} byte budget")]
    PayloadTooLarge { got: usize, budget: usize },
    #[error("payload truncated: {got} bytes, needed {expected}")]
    PayloadTruncated { got: usize, expected: usize },
    #[error("sub-cycle {got} does not fit the period")]
    SubCycleOutOfRange { got: u32 },
    #[error("active port index {got} out of range (0..{nports})")]
    PortIndexOutOfRange { got: u32, nports: u32 },
    #[error("codec failed on port {port}")]
    EncoderFailure { port: u32 },
    #[error("MIDI cycle incomplete, discarding")]
    MidiCycleIncomplete,
}

/// Samples per port per packet.
///
/// The largest power of two that keeps `channels` slices of `sample_width`
/// bytes inside `budget`, capped at the period. Degenerate corners follow
/// the protocol: no channels means the whole period fits trivially (one
/// packet, no audio), and a budget too small for even one sample per
/// channel degrades to single-sample slices.
pub(crate) fn sub_period_len(
    period_size: u32,
    budget: usize,
    channels: u32,
    sample_width: usize,
) -> u32 {
    if channels == 0 {
        return period_size;
    }
    let per_channel = budget / (channels as usize * sample_width);
    match per_channel.checked_ilog2() {
        Some(pow) => period_size.min(1u32 << pow.min(31)),
        None => 1,
    }
}

/// Sub-cycle sequencing gate: one per direction per framer.
///
/// Received packets must satisfy `sub_cycle == last + 1`. A violation is
/// reported with both indices; the packet is still processed by the caller
/// so later packets of the cycle stay usable. [`reset`](Self::reset) rearms
/// the gate at the cycle boundary.
#[derive(Debug, Clone)]
pub struct SubCycleGate {
    last_sub_cycle: i64,
}

impl Default for SubCycleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SubCycleGate {
    #[inline]
    pub const fn new() -> Self {
        Self { last_sub_cycle: -1 }
    }

    /// Validates and records one received sub-cycle index.
    #[inline]
    pub fn check(&mut self, cycle: u32, sub_cycle: u32) -> Result<(), PacketError> {
        let expected = self.last_sub_cycle + 1;
        self.last_sub_cycle = i64::from(sub_cycle);

        if i64::from(sub_cycle) == expected {
            Ok(())
        } else {
            Err(PacketError::SequenceGap {
                cycle,
                expected: expected as u32,
                got: sub_cycle,
            })
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.last_sub_cycle = -1;
    }

    /// Last accepted sub-cycle, `-1` when rearmed.
    #[inline]
    pub const fn last_sub_cycle(&self) -> i64 {
        self.last_sub_cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_period_bounds() {
        // P=64, N=1, W=4, M=1500: a whole period fits in one packet
        assert_eq!(sub_period_len(64, 1436, 1, 4), 64);
        // P=1024, N=16, W=4, M=1500: 16*S*4 <= 1436 -> S=16
        assert_eq!(sub_period_len(1024, 1436, 16, 4), 16);
        // optimized with two active ports -> S=128
        assert_eq!(sub_period_len(1024, 1436, 2, 4), 128);
        // no channels: the period itself
        assert_eq!(sub_period_len(1024, 1436, 0, 4), 1024);
        // budget smaller than one frame of samples: degrade to 1
        assert_eq!(sub_period_len(1024, 100, 1000, 4), 1);
    }

    #[test]
    fn sub_period_is_power_of_two_and_fits() {
        for channels in 1..64u32 {
            for budget in [200usize, 700, 1436, 8936] {
                let s = sub_period_len(512, budget, channels, 4);
                assert!(s.is_power_of_two());
                assert!(s <= 512);
                if s > 1 {
                    assert!(channels as usize * s as usize * 4 <= budget);
                }
            }
        }
    }

    #[test]
    fn gate_accepts_in_order_and_reports_gaps() {
        let mut gate = SubCycleGate::new();
        assert_eq!(gate.check(9, 0), Ok(()));
        assert_eq!(gate.check(9, 1), Ok(()));
        assert_eq!(gate.check(9, 2), Ok(()));
        // jump from 2 to 4: gap {3} reported, state still advances
        assert_eq!(
            gate.check(9, 4),
            Err(PacketError::SequenceGap { cycle: 9, expected: 3, got: 4 })
        );
        assert_eq!(gate.last_sub_cycle(), 4);
        assert_eq!(gate.check(9, 5), Ok(()));

        gate.reset();
        assert_eq!(gate.last_sub_cycle(), -1);
        assert_eq!(gate.check(10, 0), Ok(()));
    }

    #[test]
    fn gate_flags_duplicates_as_loss() {
        let mut gate = SubCycleGate::new();
        gate.check(0, 0).unwrap();
        assert!(gate.check(0, 0).is_err());
    }
}
