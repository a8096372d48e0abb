//! Sync-packet payload: the transport record, followed (master -> slave,
//! optimized packing only) by the active-port list for the coming cycle.

use netspan_proto::{TransportData, TRANSPORT_DATA_SIZE};

use crate::buffer::NetAudioBuffer;

/// Lays out one sync payload. Returns the advertised port count and the
/// payload length in bytes.
pub fn render_sync_payload(
    out: &mut [u8],
    transport: &TransportData,
    audio: &NetAudioBuffer,
) -> (u32, usize) {
    out[..TRANSPORT_DATA_SIZE].copy_from_slice(&transport.encode());
    let port_num = audio.active_ports_to_network(&mut out[TRANSPORT_DATA_SIZE..]);

    // non-optimized packing advertises a count, not a list
    let list_bytes = match audio.packing_mode() {
        crate::audio::PackingMode::Optimized => port_num as usize * 2,
        crate::audio::PackingMode::Dense => 0,
    };
    (port_num, TRANSPORT_DATA_SIZE + list_bytes)
}

/// Parses one received sync payload, applying the active-port list to the
/// audio buffer. `None` when the payload cannot hold a transport record.
pub fn parse_sync_payload(
    buf: &[u8],
    audio: &mut NetAudioBuffer,
    port_num: u32,
) -> Option<TransportData> {
    let transport = TransportData::decode(buf)?;
    audio.active_ports_from_network(&buf[TRANSPORT_DATA_SIZE..], port_num);
    Some(transport)
}
