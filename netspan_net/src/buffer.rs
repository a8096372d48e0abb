//! The audio buffer variants: one per wire sample representation, all
//! exposing the same operation set over the same sub-cycle geometry.
//!
//! The session's encoder field picks the variant once at session start;
//! every cycle after that is `render_from_local_ports`, `num_packets` sends
//! of `render_to_network` (or receives of `render_from_network`), then
//! `render_to_local_ports` at the boundary.

use netspan_proto::{payload_budget, SampleEncoder, SessionParams};
use netspan_utils::sample_type::{float_from_pcm16, pcm16_from_float};

use crate::audio::{PackingMode, PortBank, PortList};
use crate::codec::{BlockCodec, CodecError, CodecSpec};
use crate::{PacketError, SubCycleGate};

/// Width of one 16-bit PCM sample on the wire.
const PCM16_SIZE: usize = 2;

/// The audio buffer of one direction, variant chosen by the negotiated
/// encoder.
pub enum NetAudioBuffer {
    Float(FloatAudioBuffer),
    Int(IntAudioBuffer),
    Celt(CeltAudioBuffer),
}

impl NetAudioBuffer {
    /// Builds the variant the session negotiated. `make_codec` is consulted
    /// only for the CELT encoder, once per port.
    pub fn new(
        params: &SessionParams,
        nports: u32,
        mode: PackingMode,
        make_codec: impl FnMut(CodecSpec) -> Result<Box<dyn BlockCodec>, CodecError>,
    ) -> Result<Self, CodecError> {
        match params.sample_encoder {
            SampleEncoder::Float => Ok(Self::Float(FloatAudioBuffer::new(params, nports, mode))),
            SampleEncoder::Int => Ok(Self::Int(IntAudioBuffer::new(params, nports))),
            SampleEncoder::Celt => {
                CeltAudioBuffer::new(params, nports, make_codec).map(Self::Celt)
            }
        }
    }

    pub fn cycle_size(&self) -> usize {
        match self {
            Self::Float(b) => b.ports.cycle_size(),
            Self::Int(b) => b.cycle_size,
            Self::Celt(b) => b.cycle_size,
        }
    }

    pub fn cycle_duration(&self) -> f32 {
        match self {
            Self::Float(b) => b.ports.cycle_duration(),
            Self::Int(b) => b.cycle_duration,
            Self::Celt(b) => b.cycle_duration,
        }
    }

    pub fn num_packets(&mut self) -> u32 {
        match self {
            Self::Float(b) => b.ports.num_packets(),
            Self::Int(b) => b.num_packets,
            Self::Celt(b) => b.num_packets,
        }
    }

    pub fn set_buffer(&mut self, port: usize, samples: Option<&[f32]>) {
        match self {
            Self::Float(b) => b.ports.set_buffer(port, samples),
            Self::Int(b) => b.ports.set(port, samples),
            Self::Celt(b) => b.ports.set(port, samples),
        }
    }

    pub fn get_buffer(&self, port: usize) -> Option<&[f32]> {
        match self {
            Self::Float(b) => b.ports.get_buffer(port),
            Self::Int(b) => b.ports.get(port),
            Self::Celt(b) => b.ports.get(port),
        }
    }

    pub fn get_buffer_mut(&mut self, port: usize) -> Option<&mut [f32]> {
        match self {
            Self::Float(b) => b.ports.get_buffer_mut(port),
            Self::Int(b) => b.ports.get_mut(port),
            Self::Celt(b) => b.ports.get_mut(port),
        }
    }

    /// Per-cycle pre-pass on the sending side: sample conversion (Int) or
    /// block compression (CELT). A no-op for floats.
    pub fn render_from_local_ports(&mut self) {
        match self {
            Self::Float(_) => {}
            Self::Int(b) => b.render_from_local_ports(),
            Self::Celt(b) => b.render_from_local_ports(),
        }
    }

    /// Per-cycle post-pass on the receiving side: back-conversion (Int) or
    /// block decode (CELT), then rearming the sequencing gate everywhere.
    pub fn render_to_local_ports(&mut self) {
        match self {
            Self::Float(b) => b.ports.finish_cycle(),
            Self::Int(b) => b.render_to_local_ports(),
            Self::Celt(b) => b.render_to_local_ports(),
        }
    }

    /// Writes one sub-cycle's payload; returns (port count, payload bytes).
    pub fn render_to_network(&mut self, out: &mut [u8], sub_cycle: u32) -> (u32, usize) {
        match self {
            Self::Float(b) => b.ports.render_to_network(out, sub_cycle),
            Self::Int(b) => b.render_to_network(out, sub_cycle),
            Self::Celt(b) => b.render_to_network(out, sub_cycle),
        }
    }

    /// Accepts one received sub-cycle payload.
    pub fn render_from_network(
        &mut self,
        buf: &[u8],
        cycle: u32,
        sub_cycle: u32,
        port_num: u32,
    ) -> Result<(), PacketError> {
        match self {
            Self::Float(b) => b.ports.render_from_network(buf, cycle, sub_cycle, port_num),
            Self::Int(b) => b.render_from_network(buf, cycle, sub_cycle),
            Self::Celt(b) => b.render_from_network(buf, cycle, sub_cycle),
        }
    }

    /// Writes the active-port list for the sync packet. Non-optimized
    /// variants advertise every port and write nothing.
    pub fn active_ports_to_network(&self, out: &mut [u8]) -> u32 {
        match self {
            Self::Float(b) => match b.mode {
                PackingMode::Optimized => b.ports.active_ports_to_network(out),
                PackingMode::Dense => b.ports.nports() as u32,
            },
            Self::Int(b) => b.ports.len() as u32,
            Self::Celt(b) => b.ports.len() as u32,
        }
    }

    /// Applies a received active-port list. A no-op for non-optimized
    /// variants.
    pub fn active_ports_from_network(&mut self, buf: &[u8], port_num: u32) {
        if let Self::Float(b) = self {
            if let PackingMode::Optimized = b.mode {
                b.ports.active_ports_from_network(buf, port_num);
            }
        }
    }

    /// The packing policy in effect; only the float variant ever packs
    /// optimized.
    pub fn packing_mode(&self) -> PackingMode {
        match self {
            Self::Float(b) => b.mode,
            Self::Int(_) | Self::Celt(_) => PackingMode::Dense,
        }
    }

    /// Last accepted sub-cycle of the current cycle, `-1` at a boundary.
    pub fn last_sub_cycle(&self) -> i64 {
        match self {
            Self::Float(b) => b.ports.last_sub_cycle(),
            Self::Int(b) => b.gate.last_sub_cycle(),
            Self::Celt(b) => b.gate.last_sub_cycle(),
        }
    }
}

/// Raw float samples, dense or optimized packing.
pub struct FloatAudioBuffer {
    mode: PackingMode,
    ports: PortList,
}

impl FloatAudioBuffer {
    pub fn new(params: &SessionParams, nports: u32, mode: PackingMode) -> Self {
        Self {
            mode,
            ports: PortList::new(params, nports, mode),
        }
    }

    #[inline]
    pub fn port_list(&self) -> &PortList {
        &self.ports
    }

    #[inline]
    pub fn port_list_mut(&mut self) -> &mut PortList {
        &mut self.ports
    }
}

/// 16-bit linear PCM with gain compensation. Always dense; the sub-period
/// is not rounded to a power of two, so the final sub-cycle may carry a
/// shorter remainder slice.
pub struct IntAudioBuffer {
    sub_period: usize,
    last_sub_period: usize,
    num_packets: u32,
    cycle_size: usize,
    cycle_duration: f32,
    ports: PortBank,
    /// One period of converted samples per port, bound or not.
    pcm: Vec<Vec<i16>>,
    gate: SubCycleGate,
}

impl IntAudioBuffer {
    pub fn new(params: &SessionParams, nports: u32) -> Self {
        let period_size = params.period_size as usize;
        let budget = payload_budget(params.mtu);
        let channels = params
            .send_audio_channels
            .max(params.return_audio_channels)
            .max(0) as usize;

        let sub_period = if channels == 0 {
            period_size
        } else {
            (budget / (channels * PCM16_SIZE)).clamp(1, period_size)
        };
        let num_packets = period_size.div_ceil(sub_period);
        let last_sub_period = period_size - (num_packets - 1) * sub_period;

        Self {
            sub_period,
            last_sub_period,
            num_packets: num_packets as u32,
            cycle_size: params.mtu as usize * num_packets,
            cycle_duration: sub_period as f32 / params.sample_rate as f32,
            ports: PortBank::new(period_size, nports),
            pcm: (0..nports).map(|_| vec![0; period_size]).collect(),
            gate: SubCycleGate::new(),
        }
    }

    #[inline]
    pub fn sub_period(&self) -> usize {
        self.sub_period
    }

    #[inline]
    pub fn last_sub_period(&self) -> usize {
        self.last_sub_period
    }

    /// Samples per port carried by `sub_cycle`.
    #[inline]
    fn samples_at(&self, sub_cycle: u32) -> usize {
        if sub_cycle + 1 == self.num_packets {
            self.last_sub_period
        } else {
            self.sub_period
        }
    }

    fn render_from_local_ports(&mut self) {
        for (slot, pcm) in self.ports.slots.iter().zip(&mut self.pcm) {
            match slot {
                Some(buf) => {
                    for (dst, &src) in pcm.iter_mut().zip(buf) {
                        *dst = pcm16_from_float(src);
                    }
                }
                None => pcm.fill(0),
            }
        }
    }

    fn render_to_local_ports(&mut self) {
        for (slot, pcm) in self.ports.slots.iter_mut().zip(&self.pcm) {
            if let Some(buf) = slot {
                for (dst, &src) in buf.iter_mut().zip(pcm) {
                    *dst = float_from_pcm16(src);
                }
            }
        }
        self.gate.reset();
    }

    fn render_to_network(&mut self, out: &mut [u8], sub_cycle: u32) -> (u32, usize) {
        let samples = self.samples_at(sub_cycle);
        let from = sub_cycle as usize * self.sub_period;
        let slice_bytes = samples * PCM16_SIZE;

        for (idx, pcm) in self.pcm.iter().enumerate() {
            let dst = &mut out[idx * slice_bytes..][..slice_bytes];
            for (chunk, &s) in dst.chunks_exact_mut(PCM16_SIZE).zip(&pcm[from..from + samples]) {
                chunk.copy_from_slice(&s.to_le_bytes());
            }
        }

        (self.pcm.len() as u32, self.pcm.len() * slice_bytes)
    }

    fn render_from_network(
        &mut self,
        buf: &[u8],
        cycle: u32,
        sub_cycle: u32,
    ) -> Result<(), PacketError> {
        if sub_cycle >= self.num_packets {
            return Err(PacketError::SubCycleOutOfRange { got: sub_cycle });
        }
        let samples = self.samples_at(sub_cycle);
        let from = sub_cycle as usize * self.sub_period;
        let slice_bytes = samples * PCM16_SIZE;

        let expected = self.pcm.len() * slice_bytes;
        if buf.len() < expected {
            return Err(PacketError::PayloadTruncated { got: buf.len(), expected });
        }

        for (idx, pcm) in self.pcm.iter_mut().enumerate() {
            let src = &buf[idx * slice_bytes..][..slice_bytes];
            for (s, chunk) in pcm[from..from + samples].iter_mut().zip(src.chunks_exact(PCM16_SIZE)) {
                *s = i16::from_le_bytes([chunk[0], chunk[1]]);
            }
        }

        self.gate.check(cycle, sub_cycle)
    }
}

/// CELT-compressed blocks: one fixed-size compressed block per port per
/// period, sliced evenly across the cycle's packets with the remainder in
/// the final sub-cycle.
pub struct CeltAudioBuffer {
    compressed_size: usize,
    sub_period_bytes: usize,
    last_sub_period_bytes: usize,
    num_packets: u32,
    cycle_size: usize,
    cycle_duration: f32,
    ports: PortBank,
    codecs: Vec<Box<dyn BlockCodec>>,
    /// One compressed period per port, rebuilt (send) or reassembled
    /// (receive) every cycle.
    compressed: Vec<Vec<u8>>,
    /// Send side: did this port's encode succeed this cycle?
    encode_ok: Vec<bool>,
    /// Receive side: false once any sub-cycle of the cycle went missing.
    cycle_complete: bool,
    gate: SubCycleGate,
}

impl CeltAudioBuffer {
    pub fn new(
        params: &SessionParams,
        nports: u32,
        mut make_codec: impl FnMut(CodecSpec) -> Result<Box<dyn BlockCodec>, CodecError>,
    ) -> Result<Self, CodecError> {
        let period_size = params.period_size as usize;
        let budget = payload_budget(params.mtu).max(1);
        let compressed_size = params.kbps as usize * 1024 / 8;

        let num_packets = compressed_size.div_ceil(budget).max(1);
        let sub_period_bytes = compressed_size / num_packets;
        let last_sub_period_bytes = sub_period_bytes + compressed_size % num_packets;

        let spec = CodecSpec {
            sample_rate: params.sample_rate,
            frame_size: params.period_size,
            compressed_size,
        };
        let codecs = (0..nports)
            .map(|_| make_codec(spec))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            compressed_size,
            sub_period_bytes,
            last_sub_period_bytes,
            num_packets: num_packets as u32,
            cycle_size: params.mtu as usize * num_packets,
            cycle_duration: period_size as f32 / params.sample_rate as f32,
            ports: PortBank::new(period_size, nports),
            codecs,
            compressed: (0..nports).map(|_| vec![0; compressed_size]).collect(),
            encode_ok: vec![false; nports as usize],
            cycle_complete: true,
            gate: SubCycleGate::new(),
        })
    }

    #[inline]
    pub fn compressed_size(&self) -> usize {
        self.compressed_size
    }

    #[inline]
    pub fn sub_period_bytes(&self) -> usize {
        self.sub_period_bytes
    }

    #[inline]
    pub fn last_sub_period_bytes(&self) -> usize {
        self.last_sub_period_bytes
    }

    /// Compressed bytes per port carried by `sub_cycle`.
    #[inline]
    fn bytes_at(&self, sub_cycle: u32) -> usize {
        if sub_cycle + 1 == self.num_packets {
            self.last_sub_period_bytes
        } else {
            self.sub_period_bytes
        }
    }

    fn render_from_local_ports(&mut self) {
        for (idx, ((slot, codec), block)) in self
            .ports
            .slots
            .iter()
            .zip(&mut self.codecs)
            .zip(&mut self.compressed)
            .enumerate()
        {
            let ok = match slot {
                Some(buf) => match codec.encode_float(buf, block) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("port {idx}: {e}, sending silence");
                        false
                    }
                },
                None => false,
            };
            if !ok {
                block.fill(0);
            }
            self.encode_ok[idx] = ok;
        }
    }

    fn render_to_local_ports(&mut self) {
        let complete = self.cycle_complete;
        for (idx, ((slot, codec), block)) in self
            .ports
            .slots
            .iter_mut()
            .zip(&mut self.codecs)
            .zip(&self.compressed)
            .enumerate()
        {
            let Some(buf) = slot else { continue };
            let decoded = complete && codec.decode_float(block, buf).map_err(|e| {
                log::warn!("port {idx}: {e}, playing silence");
            }).is_ok();
            if !decoded {
                buf.fill(0.);
            }
        }

        self.cycle_complete = true;
        self.gate.reset();
    }

    fn render_to_network(&mut self, out: &mut [u8], sub_cycle: u32) -> (u32, usize) {
        let bytes = self.bytes_at(sub_cycle);
        let from = sub_cycle as usize * self.sub_period_bytes;

        for (idx, block) in self.compressed.iter().enumerate() {
            out[idx * bytes..][..bytes].copy_from_slice(&block[from..from + bytes]);
        }

        (self.compressed.len() as u32, self.compressed.len() * bytes)
    }

    fn render_from_network(
        &mut self,
        buf: &[u8],
        cycle: u32,
        sub_cycle: u32,
    ) -> Result<(), PacketError> {
        if sub_cycle >= self.num_packets {
            return Err(PacketError::SubCycleOutOfRange { got: sub_cycle });
        }
        let bytes = self.bytes_at(sub_cycle);
        let from = sub_cycle as usize * self.sub_period_bytes;

        let expected = self.compressed.len() * bytes;
        if buf.len() < expected {
            return Err(PacketError::PayloadTruncated { got: buf.len(), expected });
        }

        for (idx, block) in self.compressed.iter_mut().enumerate() {
            block[from..from + bytes].copy_from_slice(&buf[idx * bytes..][..bytes]);
        }

        self.gate.check(cycle, sub_cycle).inspect_err(|_| {
            // a hole anywhere in the compressed stream poisons the whole
            // cycle's decode
            self.cycle_complete = false;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::LoopbackCodec;

    fn params(encoder: SampleEncoder, mtu: u32, period: u32, channels: i32, kbps: u32) -> SessionParams {
        SessionParams {
            mtu,
            period_size: period,
            sample_rate: 48000,
            send_audio_channels: channels,
            return_audio_channels: channels,
            sample_encoder: encoder,
            kbps,
            ..SessionParams::default()
        }
    }

    fn no_codec(_: CodecSpec) -> Result<Box<dyn BlockCodec>, CodecError> {
        Err(CodecError("no codec in this test"))
    }

    fn loopback(spec: CodecSpec) -> Result<Box<dyn BlockCodec>, CodecError> {
        Ok(Box::new(LoopbackCodec { frame_size: spec.frame_size as usize }))
    }

    fn ramp(period: usize, seed: f32) -> Vec<f32> {
        (0..period).map(|i| seed + i as f32 / period as f32).collect()
    }

    #[test]
    fn variant_follows_the_negotiated_encoder() {
        let p = params(SampleEncoder::Int, 1500, 128, 2, 0);
        let buf = NetAudioBuffer::new(&p, 2, PackingMode::Dense, no_codec).unwrap();
        assert!(matches!(buf, NetAudioBuffer::Int(_)));
    }

    #[test]
    fn int_geometry_has_a_remainder_tail() {
        // P=512, C=3, B=1436: S = 1436/6 = 239, K = ceil(512/239) = 3,
        // last = 512 - 2*239 = 34
        let p = params(SampleEncoder::Int, 1500, 512, 3, 0);
        let b = IntAudioBuffer::new(&p, 3);
        assert_eq!(b.sub_period(), 239);
        assert_eq!(b.num_packets, 3);
        assert_eq!(b.last_sub_period(), 34);
        assert_eq!(2 * b.sub_period() + b.last_sub_period(), 512);
    }

    #[test]
    fn int_round_trip_with_saturation() {
        let p = params(SampleEncoder::Int, 1500, 512, 3, 0);
        let mut tx = NetAudioBuffer::new(&p, 3, PackingMode::Dense, no_codec).unwrap();
        let mut rx = NetAudioBuffer::new(&p, 3, PackingMode::Dense, no_codec).unwrap();

        let mut loud = ramp(512, 0.);
        loud[0] = 7.5; // clips to full scale
        tx.set_buffer(0, Some(&loud));
        tx.set_buffer(1, Some(&ramp(512, -0.9)));
        tx.set_buffer(2, Some(&ramp(512, 0.1)));
        for port in 0..3 {
            rx.set_buffer(port, Some(&[]));
        }

        tx.render_from_local_ports();
        let k = tx.num_packets();
        let mut staging = vec![0u8; 1436];
        for sub in 0..k {
            let (ports, bytes) = tx.render_to_network(&mut staging, sub);
            assert_eq!(ports, 3);
            assert!(bytes <= 1436);
            rx.render_from_network(&staging[..bytes], 0, sub, ports).unwrap();
        }
        rx.render_to_local_ports();

        let out = rx.get_buffer(0).unwrap();
        assert!((out[0] - 1.).abs() < 1e-4);
        for (got, want) in out.iter().zip(&loud).skip(1) {
            assert!((got - want).abs() < 1. / 32000.);
        }
        assert_eq!(rx.last_sub_cycle(), -1);
    }

    #[test]
    fn celt_geometry_matches_the_bitrate() {
        // kbps=64: 8192 compressed bytes, B=1436: K=6, slices 1365 + tail 1367
        let p = params(SampleEncoder::Celt, 1500, 512, 2, 64);
        let b = CeltAudioBuffer::new(&p, 2, loopback).unwrap();
        assert_eq!(b.compressed_size(), 8192);
        assert_eq!(b.num_packets, 6);
        assert_eq!(b.sub_period_bytes(), 1365);
        assert_eq!(b.last_sub_period_bytes(), 1367);
        assert_eq!(5 * b.sub_period_bytes() + b.last_sub_period_bytes(), 8192);
    }

    #[test]
    fn celt_round_trip() {
        let p = params(SampleEncoder::Celt, 1500, 512, 2, 16);
        let mut tx = NetAudioBuffer::new(&p, 2, PackingMode::Dense, loopback).unwrap();
        let mut rx = NetAudioBuffer::new(&p, 2, PackingMode::Dense, loopback).unwrap();

        tx.set_buffer(0, Some(&ramp(512, 0.5)));
        tx.set_buffer(1, Some(&ramp(512, -0.25)));
        rx.set_buffer(0, Some(&[]));
        rx.set_buffer(1, Some(&[]));

        tx.render_from_local_ports();
        let k = tx.num_packets();
        assert_eq!(k, 2); // 2048 bytes over a 1436 budget
        let mut staging = vec![0u8; 2 * 1436];
        for sub in 0..k {
            let (ports, bytes) = tx.render_to_network(&mut staging, sub);
            rx.render_from_network(&staging[..bytes], 0, sub, ports).unwrap();
        }
        rx.render_to_local_ports();

        // the loopback codec stores the first compressed_size/4 samples
        let stored = 2048 / 4;
        assert_eq!(&rx.get_buffer(0).unwrap()[..stored], &ramp(512, 0.5)[..stored]);
    }

    #[test]
    fn celt_gap_silences_the_cycle() {
        let p = params(SampleEncoder::Celt, 1500, 512, 1, 64);
        let mut tx = NetAudioBuffer::new(&p, 1, PackingMode::Dense, loopback).unwrap();
        let mut rx = NetAudioBuffer::new(&p, 1, PackingMode::Dense, loopback).unwrap();

        tx.set_buffer(0, Some(&ramp(512, 0.5)));
        rx.set_buffer(0, Some(&ramp(512, 0.9))); // stale content

        tx.render_from_local_ports();
        let k = tx.num_packets();
        let mut staging = vec![0u8; 1436];
        for sub in 0..k {
            if sub == 2 {
                continue; // drop one packet
            }
            let (ports, bytes) = tx.render_to_network(&mut staging, sub);
            let res = rx.render_from_network(&staging[..bytes], 0, sub, ports);
            assert_eq!(res.is_err(), sub == 3);
        }
        rx.render_to_local_ports();

        assert!(rx.get_buffer(0).unwrap().iter().all(|&s| s == 0.));
        assert_eq!(rx.last_sub_cycle(), -1);
    }

    #[test]
    fn celt_encode_failure_sends_silence() {
        struct FailingCodec;
        impl BlockCodec for FailingCodec {
            fn encode_float(&mut self, _: &[f32], _: &mut [u8]) -> Result<(), CodecError> {
                Err(CodecError("simulated"))
            }
            fn decode_float(&mut self, _: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
                out.fill(0.5); // anything non-silent
                Ok(())
            }
        }

        let p = params(SampleEncoder::Celt, 1500, 128, 1, 8);
        let mut tx =
            CeltAudioBuffer::new(&p, 1, |_| Ok(Box::new(FailingCodec) as Box<dyn BlockCodec>))
                .unwrap();
        tx.ports.set(0, Some(&ramp(128, 0.3)));
        tx.render_from_local_ports();
        assert!(tx.compressed[0].iter().all(|&b| b == 0));
        assert!(!tx.encode_ok[0]);
    }

    #[test]
    fn all_variants_share_packet_counts_across_directions() {
        for encoder in [SampleEncoder::Float, SampleEncoder::Int, SampleEncoder::Celt] {
            let p = params(encoder, 1500, 256, 2, 32);
            let mut send = NetAudioBuffer::new(&p, 2, PackingMode::Dense, loopback).unwrap();
            let mut ret = NetAudioBuffer::new(&p, 2, PackingMode::Dense, loopback).unwrap();
            assert_eq!(send.num_packets(), ret.num_packets());
        }
    }
}
