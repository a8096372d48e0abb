//! MIDI framing: variable-length events from up to `nports` ports, staged
//! into one linear per-cycle image, split across as few packets as the
//! volume allows.
//!
//! MIDI load is tiny in the overwhelming majority of cycles, so unlike
//! audio the transmission is *compact*: each port contributes its stream
//! header and only the bytes its events actually use. One packet carries
//! the whole cycle unless a burst spills over the budget.
//!
//! MIDI has no interpolation: a cycle with a missing sub-cycle is discarded
//! whole rather than delivered with holes.

use netspan_proto::{payload_budget, MidiStreamHeader, SessionParams, MIDI_STREAM_HEADER_SIZE};

use crate::{PacketError, SubCycleGate, SAMPLE_SIZE};

/// Bytes each event spends on its time and length prefix.
const EVENT_PREFIX_SIZE: usize = 8;

/// One MIDI event, timestamped within the period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    /// Frame offset within the period.
    pub time: u32,
    pub data: Vec<u8>,
}

/// One port's events for one cycle, capacity-bounded.
#[derive(Debug)]
pub struct MidiPortBuffer {
    capacity: usize,
    used: usize,
    events: Vec<MidiEvent>,
    lost_events: u32,
}

impl MidiPortBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            events: Vec::new(),
            lost_events: 0,
        }
    }

    /// Appends an event. A full buffer drops it and bumps the lost-events
    /// counter instead; the counter travels with the stream header so the
    /// far side learns about the loss.
    pub fn push(&mut self, time: u32, data: &[u8]) -> bool {
        let cost = EVENT_PREFIX_SIZE + data.len();
        if self.used + cost > self.capacity {
            self.lost_events += 1;
            return false;
        }
        self.used += cost;
        self.events.push(MidiEvent { time, data: data.to_vec() });
        true
    }

    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    #[inline]
    pub fn lost_events(&self) -> u32 {
        self.lost_events
    }

    /// Event bytes this port will occupy on the wire, header included.
    #[inline]
    fn wire_size(&self) -> usize {
        MIDI_STREAM_HEADER_SIZE + self.used
    }

    pub fn clear(&mut self) {
        self.used = 0;
        self.events.clear();
        self.lost_events = 0;
    }
}

/// The per-direction MIDI cycle buffer.
pub struct NetMidiBuffer {
    budget: usize,
    /// Upper bound of one cycle's staged MIDI, all ports.
    max_buf_size: usize,
    staging: Vec<u8>,
    /// Bytes of `staging` in use this cycle.
    cycle_size: usize,
    /// Receive side: bytes reassembled so far.
    recv_pos: usize,
    /// Receive side: false once a sub-cycle went missing.
    complete: bool,
    ports: Vec<MidiPortBuffer>,
    gate: SubCycleGate,
}

impl NetMidiBuffer {
    pub fn new(params: &SessionParams, nports: u32) -> Self {
        // One audio buffer's worth of bytes per port, the traditional
        // MIDI-buffer sizing.
        let port_capacity = params.period_size as usize * SAMPLE_SIZE;
        let max_buf_size = nports as usize * (MIDI_STREAM_HEADER_SIZE + port_capacity);

        Self {
            budget: payload_budget(params.mtu),
            max_buf_size,
            staging: vec![0; max_buf_size],
            cycle_size: 0,
            recv_pos: 0,
            complete: true,
            ports: (0..nports).map(|_| MidiPortBuffer::new(port_capacity)).collect(),
            gate: SubCycleGate::new(),
        }
    }

    #[inline]
    pub fn nports(&self) -> usize {
        self.ports.len()
    }

    #[inline]
    pub fn port(&self, index: usize) -> Option<&MidiPortBuffer> {
        self.ports.get(index)
    }

    #[inline]
    pub fn port_mut(&mut self, index: usize) -> Option<&mut MidiPortBuffer> {
        self.ports.get_mut(index)
    }

    /// Bytes the current cycle occupies on the wire.
    #[inline]
    pub fn cycle_size(&self) -> usize {
        self.cycle_size
    }

    /// Upper bound of [`cycle_size`](Self::cycle_size) for any cycle.
    #[inline]
    pub fn max_cycle_size(&self) -> usize {
        self.max_buf_size
    }

    #[inline]
    pub fn last_sub_cycle(&self) -> i64 {
        self.gate.last_sub_cycle()
    }

    /// Packets needed for the staged cycle; a quiet cycle still takes one.
    pub fn num_packets(&self) -> u32 {
        self.cycle_size.div_ceil(self.budget).max(1) as u32
    }

    /// Clears all port buffers and cycle state for the next cycle.
    pub fn reset(&mut self) {
        for port in &mut self.ports {
            port.clear();
        }
        self.cycle_size = 0;
        self.recv_pos = 0;
        self.complete = true;
        self.gate.reset();
    }

    /// Send side: lays the cycle's events out linearly. Returns the cycle
    /// size in bytes.
    pub fn render_from_local_ports(&mut self) -> usize {
        let mut pos = 0;

        for port in &self.ports {
            let header = MidiStreamHeader {
                event_count: port.events.len() as u32,
                used_size: port.used as u32,
                lost_events: port.lost_events,
            };
            self.staging[pos..pos + MIDI_STREAM_HEADER_SIZE].copy_from_slice(&header.encode());
            pos += MIDI_STREAM_HEADER_SIZE;

            for event in &port.events {
                self.staging[pos..pos + 4].copy_from_slice(&event.time.to_le_bytes());
                self.staging[pos + 4..pos + 8]
                    .copy_from_slice(&(event.data.len() as u32).to_le_bytes());
                pos += EVENT_PREFIX_SIZE;
                self.staging[pos..pos + event.data.len()].copy_from_slice(&event.data);
                pos += event.data.len();
            }
        }

        self.cycle_size = pos;
        pos
    }

    /// Send side: emits one sub-cycle's chunk of the staged image. The last
    /// chunk is the short one.
    pub fn render_to_network(&self, out: &mut [u8], sub_cycle: u32) -> usize {
        let from = (sub_cycle as usize * self.budget).min(self.cycle_size);
        let to = (from + self.budget).min(self.cycle_size);
        out[..to - from].copy_from_slice(&self.staging[from..to]);
        to - from
    }

    /// Receive side: appends one sub-cycle's chunk to the image under
    /// reassembly.
    pub fn render_from_network(
        &mut self,
        buf: &[u8],
        cycle: u32,
        sub_cycle: u32,
    ) -> Result<(), PacketError> {
        if buf.len() > self.budget {
            return Err(PacketError::PayloadTooLarge { got: buf.len(), budget: self.budget });
        }
        if self.recv_pos + buf.len() > self.max_buf_size {
            return Err(PacketError::PayloadTooLarge {
                got: self.recv_pos + buf.len(),
                budget: self.max_buf_size,
            });
        }

        self.staging[self.recv_pos..self.recv_pos + buf.len()].copy_from_slice(buf);
        self.recv_pos += buf.len();

        self.gate.check(cycle, sub_cycle).inspect_err(|_| {
            self.complete = false;
        })
    }

    /// Receive side, at the cycle boundary: scatters the reassembled image
    /// back into the per-port buffers. An incomplete or malformed cycle is
    /// discarded whole.
    pub fn render_to_local_ports(&mut self) -> Result<(), PacketError> {
        let image_len = self.recv_pos;
        let complete = self.complete;

        self.recv_pos = 0;
        self.complete = true;
        self.gate.reset();
        for port in &mut self.ports {
            port.clear();
        }

        if !complete {
            return Err(PacketError::MidiCycleIncomplete);
        }

        let mut pos = 0;
        for port_index in 0..self.ports.len() {
            let header = MidiStreamHeader::decode(&self.staging[pos..image_len.min(self.staging.len())])
                .ok_or(PacketError::PayloadTruncated {
                    got: image_len - pos,
                    expected: MIDI_STREAM_HEADER_SIZE,
                })?;
            pos += MIDI_STREAM_HEADER_SIZE;

            let stream_end = pos + header.used_size as usize;
            if stream_end > image_len {
                return Err(PacketError::PayloadTruncated {
                    got: image_len,
                    expected: stream_end,
                });
            }

            let port = &mut self.ports[port_index];
            port.lost_events = header.lost_events;

            for _ in 0..header.event_count {
                if pos + EVENT_PREFIX_SIZE > stream_end {
                    return Err(PacketError::PayloadTruncated {
                        got: stream_end,
                        expected: pos + EVENT_PREFIX_SIZE,
                    });
                }
                let time = u32::from_le_bytes([
                    self.staging[pos],
                    self.staging[pos + 1],
                    self.staging[pos + 2],
                    self.staging[pos + 3],
                ]);
                let len = u32::from_le_bytes([
                    self.staging[pos + 4],
                    self.staging[pos + 5],
                    self.staging[pos + 6],
                    self.staging[pos + 7],
                ]) as usize;
                pos += EVENT_PREFIX_SIZE;

                if pos + len > stream_end {
                    return Err(PacketError::PayloadTruncated {
                        got: stream_end,
                        expected: pos + len,
                    });
                }
                port.used += EVENT_PREFIX_SIZE + len;
                port.events.push(MidiEvent {
                    time,
                    data: self.staging[pos..pos + len].to_vec(),
                });
                pos += len;
            }

            // resynchronize on the header's accounting, not our own
            pos = stream_end;
        }

        Ok(())
    }

    /// Debug dump of the staged events.
    pub fn display_events(&self) {
        for (index, port) in self.ports.iter().enumerate() {
            for event in &port.events {
                log::debug!(
                    "midi port {index}: event at frame {} ({} bytes)",
                    event.time,
                    event.data.len()
                );
            }
            if port.lost_events > 0 {
                log::debug!("midi port {index}: {} event(s) lost", port.lost_events);
            }
        }
    }
}
