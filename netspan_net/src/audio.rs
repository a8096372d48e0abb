//! Audio framing: one cycle of per-port sample slices in and out of
//! MTU-bounded sub-cycle payloads.
//!
//! Two packing policies share one geometry:
//!
//! - [`PackingMode::Dense`]: every port is transmitted every sub-cycle, in
//!   port order, `"[--samples--][--samples--]..."`. The sub-period is fixed
//!   at negotiation time.
//! - [`PackingMode::Optimized`]: only ports with a bound buffer are
//!   transmitted, each slice prefixed by its 4-byte port index,
//!   `"[idx|--samples--][idx|--samples--]..."`. The sub-period is
//!   recomputed from the active count at every cycle start, and the active
//!   set itself travels once per cycle in the sync packet as 16-bit
//!   indices.
//!
//! Silence is transmitted by omission in optimized mode: the receiver zeroes
//! every bound port at sub-cycle 0 and only overwrites what arrives.

use arrayvec::ArrayVec;
use netspan_proto::{payload_budget, SessionParams};
use netspan_utils::sample_type::WireSample;

use crate::{sub_period_len, PacketError, SubCycleGate, MAX_ACTIVE_PORTS, SAMPLE_SIZE};

/// Byte width of the port index prefixing each optimized payload slice.
/// Distinct from the 16-bit indices of the sync-packet active list; the
/// asymmetry is part of the wire format.
const PORT_TAG_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingMode {
    Dense,
    Optimized,
}

/// Per-port sample storage shared by all encoder variants. A slot holds one
/// period of samples when the port is bound, nothing otherwise; binding is
/// what makes a port "active".
#[derive(Debug)]
pub(crate) struct PortBank {
    period_size: usize,
    pub(crate) slots: Vec<Option<Vec<f32>>>,
}

impl PortBank {
    pub(crate) fn new(period_size: usize, nports: u32) -> Self {
        Self {
            period_size,
            slots: (0..nports).map(|_| None).collect(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Binds a port with one cycle's samples (`None` unbinds). Slices
    /// shorter than a period are zero-extended, longer ones truncated.
    pub(crate) fn set(&mut self, port: usize, samples: Option<&[f32]>) {
        let Some(slot) = self.slots.get_mut(port) else {
            log::error!("set_buffer: port {port} out of range");
            return;
        };
        match samples {
            Some(src) => {
                let buf = slot.get_or_insert_with(|| vec![0.; self.period_size]);
                let n = src.len().min(self.period_size);
                buf[..n].copy_from_slice(&src[..n]);
                buf[n..].fill(0.);
            }
            None => *slot = None,
        }
    }

    #[inline]
    pub(crate) fn get(&self, port: usize) -> Option<&[f32]> {
        self.slots.get(port)?.as_deref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, port: usize) -> Option<&mut [f32]> {
        self.slots.get_mut(port)?.as_deref_mut()
    }

    /// Copies every bound port's full period into the caller's buffers.
    pub(crate) fn copy_ports(&self, dst: &mut [&mut [f32]]) {
        for (slot, out) in self.slots.iter().zip(dst) {
            if let Some(buf) = slot {
                let n = buf.len().min(out.len());
                out[..n].copy_from_slice(&buf[..n]);
            }
        }
    }
}

/// One direction's audio framer over float samples.
pub struct PortList {
    mode: PackingMode,
    period_size: usize,
    /// Samples per port per packet. Fixed in dense mode, tracking the
    /// active count in optimized mode.
    sub_period: usize,
    budget: usize,
    cycle_size: usize,
    cycle_duration: f32,
    ports: PortBank,
    /// Ports the peer advertised in its last sync packet.
    remote_active: Vec<bool>,
    gate: SubCycleGate,
}

impl PortList {
    pub fn new(params: &SessionParams, nports: u32, mode: PackingMode) -> Self {
        let period_size = params.period_size as usize;
        let budget = payload_budget(params.mtu);
        let channels = params
            .send_audio_channels
            .max(params.return_audio_channels)
            .max(0) as u32;

        let sub_period = sub_period_len(params.period_size, budget, channels, SAMPLE_SIZE) as usize;
        let num_packets = period_size / sub_period;

        Self {
            mode,
            period_size,
            sub_period,
            budget,
            cycle_size: params.mtu as usize * num_packets,
            cycle_duration: sub_period as f32 / params.sample_rate as f32,
            ports: PortBank::new(period_size, nports),
            remote_active: vec![false; nports as usize],
            gate: SubCycleGate::new(),
        }
    }

    #[inline]
    pub fn nports(&self) -> usize {
        self.ports.len()
    }

    /// Worst-case bytes moved per cycle (headers included).
    #[inline]
    pub fn cycle_size(&self) -> usize {
        self.cycle_size
    }

    /// Duration covered by one packet, in seconds.
    #[inline]
    pub fn cycle_duration(&self) -> f32 {
        self.cycle_duration
    }

    #[inline]
    pub fn sub_period(&self) -> usize {
        self.sub_period
    }

    #[inline]
    pub fn last_sub_cycle(&self) -> i64 {
        self.gate.last_sub_cycle()
    }

    /// Ports that take part in the cycle: locally bound, or advertised
    /// active by the peer.
    fn active_count(&self) -> u32 {
        self.ports
            .slots
            .iter()
            .zip(&self.remote_active)
            .filter(|(slot, &remote)| slot.is_some() || remote)
            .count() as u32
    }

    /// Packets per cycle per direction.
    ///
    /// In optimized mode this re-derives the sub-period from the current
    /// active count; call it at cycle start, before the first
    /// [`render_to_network`](Self::render_to_network).
    pub fn num_packets(&mut self) -> u32 {
        if let PackingMode::Optimized = self.mode {
            self.sub_period = sub_period_len(
                self.period_size as u32,
                self.budget,
                self.active_count(),
                SAMPLE_SIZE,
            ) as usize;
        }
        (self.period_size / self.sub_period) as u32
    }

    #[inline]
    pub fn set_buffer(&mut self, port: usize, samples: Option<&[f32]>) {
        self.ports.set(port, samples);
    }

    #[inline]
    pub fn get_buffer(&self, port: usize) -> Option<&[f32]> {
        self.ports.get(port)
    }

    #[inline]
    pub fn get_buffer_mut(&mut self, port: usize) -> Option<&mut [f32]> {
        self.ports.get_mut(port)
    }

    /// Copies every bound port's full period into the caller's buffers.
    pub fn copy_ports(&self, dst: &mut [&mut [f32]]) {
        self.ports.copy_ports(dst);
    }

    /// Writes one sub-cycle's payload. Returns the transmitted port count
    /// and the payload length in bytes.
    ///
    /// # Panics
    ///
    /// if `out` is shorter than the payload budget.
    pub fn render_to_network(&mut self, out: &mut [u8], sub_cycle: u32) -> (u32, usize) {
        let samples = self.sub_period;
        let from = sub_cycle as usize * samples;

        match self.mode {
            PackingMode::Dense => {
                let slice_bytes = samples * SAMPLE_SIZE;
                for (idx, slot) in self.ports.slots.iter().enumerate() {
                    let dst = &mut out[idx * slice_bytes..][..slice_bytes];
                    write_samples(dst, slot.as_deref().map(|b| &b[from..from + samples]));
                }
                (self.ports.len() as u32, self.ports.len() * slice_bytes)
            }
            PackingMode::Optimized => {
                let slice_bytes = samples * SAMPLE_SIZE + PORT_TAG_SIZE;
                let mut port_num = 0u32;
                for (idx, slot) in self.ports.slots.iter().enumerate() {
                    if let Some(buf) = slot {
                        let dst = &mut out[port_num as usize * slice_bytes..][..slice_bytes];
                        dst[..PORT_TAG_SIZE].copy_from_slice(&(idx as u32).to_le_bytes());
                        write_samples(&mut dst[PORT_TAG_SIZE..], Some(&buf[from..from + samples]));
                        port_num += 1;
                    }
                }
                (port_num, port_num as usize * slice_bytes)
            }
        }
    }

    /// Scatters one received sub-cycle back into the bound port buffers.
    ///
    /// A sequence gap is reported *after* the payload has been scattered, so
    /// the packet that revealed the gap is not lost too.
    pub fn render_from_network(
        &mut self,
        buf: &[u8],
        cycle: u32,
        sub_cycle: u32,
        port_num: u32,
    ) -> Result<(), PacketError> {
        match self.mode {
            PackingMode::Dense => self.scatter_dense(buf, cycle, sub_cycle),
            PackingMode::Optimized => self.scatter_optimized(buf, cycle, sub_cycle, port_num),
        }
    }

    fn scatter_dense(&mut self, buf: &[u8], cycle: u32, sub_cycle: u32) -> Result<(), PacketError> {
        let samples = self.sub_period;
        let from = self.checked_offset(sub_cycle)?;

        let slice_bytes = samples * SAMPLE_SIZE;
        let expected = self.ports.len() * slice_bytes;
        if buf.len() < expected {
            return Err(PacketError::PayloadTruncated { got: buf.len(), expected });
        }

        for (idx, slot) in self.ports.slots.iter_mut().enumerate() {
            if let Some(port_buf) = slot {
                let src = &buf[idx * slice_bytes..][..slice_bytes];
                read_samples(&mut port_buf[from..from + samples], src);
            }
        }

        self.gate.check(cycle, sub_cycle)
    }

    fn scatter_optimized(
        &mut self,
        buf: &[u8],
        cycle: u32,
        sub_cycle: u32,
        port_num: u32,
    ) -> Result<(), PacketError> {
        // Silence is transmitted by omission: clear everything we own at the
        // start of the cycle, then let the payloads overwrite.
        if sub_cycle == 0 {
            for slot in self.ports.slots.iter_mut().flatten() {
                slot.fill(0.);
            }
        }

        if port_num == 0 {
            return Ok(());
        }

        // The sender derived its slicing from its own active count, which
        // is the header's port count, not ours.
        let samples =
            sub_period_len(self.period_size as u32, self.budget, port_num, SAMPLE_SIZE) as usize;
        let from = sub_cycle as usize * samples;
        if from + samples > self.period_size {
            return Err(PacketError::SubCycleOutOfRange { got: sub_cycle });
        }

        let slice_bytes = samples * SAMPLE_SIZE + PORT_TAG_SIZE;
        let expected = port_num as usize * slice_bytes;
        if buf.len() < expected {
            return Err(PacketError::PayloadTruncated { got: buf.len(), expected });
        }

        for chunk in buf[..expected].chunks_exact(slice_bytes) {
            let mut tag = [0; PORT_TAG_SIZE];
            tag.copy_from_slice(&chunk[..PORT_TAG_SIZE]);
            let target = u32::from_le_bytes(tag) as usize;

            match self.ports.slots.get_mut(target) {
                None => {
                    let err = PacketError::PortIndexOutOfRange {
                        got: target as u32,
                        nports: self.remote_active.len() as u32,
                    };
                    log::error!("audio payload skipped: {err}");
                }
                Some(None) => {
                    // the peer sends a port we did not bind: drop its slice
                }
                Some(Some(port_buf)) => {
                    read_samples(&mut port_buf[from..from + samples], &chunk[PORT_TAG_SIZE..]);
                }
            }
        }

        self.gate.check(cycle, sub_cycle)
    }

    fn checked_offset(&self, sub_cycle: u32) -> Result<usize, PacketError> {
        let from = sub_cycle as usize * self.sub_period;
        if from + self.sub_period > self.period_size {
            Err(PacketError::SubCycleOutOfRange { got: sub_cycle })
        } else {
            Ok(from)
        }
    }

    /// The ordered set of locally bound port indices, as advertised in sync
    /// packets.
    ///
    /// # Panics
    ///
    /// if more than [`MAX_ACTIVE_PORTS`] ports are bound; the protocol caps
    /// the advertised list at 512 entries.
    pub fn active_ports(&self) -> ArrayVec<u16, MAX_ACTIVE_PORTS> {
        let mut list = ArrayVec::new();
        for (idx, slot) in self.ports.slots.iter().enumerate() {
            if slot.is_some() {
                list.push(idx as u16);
            }
        }
        list
    }

    /// Writes the active-port list into a sync-packet payload as 16-bit
    /// indices. Returns the entry count.
    pub fn active_ports_to_network(&self, out: &mut [u8]) -> u32 {
        let list = self.active_ports();
        for (i, idx) in list.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&idx.to_le_bytes());
        }
        list.len() as u32
    }

    /// Reads the peer's advertised active-port list from a sync packet.
    /// Out-of-range entries are skipped with a logged error.
    pub fn active_ports_from_network(&mut self, buf: &[u8], port_num: u32) {
        self.remote_active.fill(false);

        for i in 0..port_num as usize {
            let Some(chunk) = buf.get(i * 2..i * 2 + 2) else {
                log::error!("active port list truncated at entry {i} (of {port_num})");
                return;
            };
            let idx = u16::from_le_bytes([chunk[0], chunk[1]]) as usize;
            match self.remote_active.get_mut(idx) {
                Some(flag) => *flag = true,
                None => {
                    let err = PacketError::PortIndexOutOfRange {
                        got: idx as u32,
                        nports: self.ports.len() as u32,
                    };
                    log::error!("active port list entry skipped: {err}");
                }
            }
        }
    }

    /// True when the peer's last sync packet listed `port`.
    #[inline]
    pub fn is_remote_active(&self, port: usize) -> bool {
        self.remote_active.get(port).copied().unwrap_or(false)
    }

    /// Cycle boundary: rearm the sequencing gate for the next cycle.
    #[inline]
    pub fn finish_cycle(&mut self) {
        self.gate.reset();
    }
}

#[inline]
fn write_samples(dst: &mut [u8], src: Option<&[f32]>) {
    match src {
        Some(samples) => {
            for (chunk, &s) in dst.chunks_exact_mut(SAMPLE_SIZE).zip(samples) {
                s.write_le(chunk);
            }
        }
        None => dst.fill(0),
    }
}

#[inline]
fn read_samples(dst: &mut [f32], src: &[u8]) {
    for (s, chunk) in dst.iter_mut().zip(src.chunks_exact(SAMPLE_SIZE)) {
        *s = f32::read_le(chunk);
    }
}
