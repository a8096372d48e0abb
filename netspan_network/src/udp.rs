//! UDP socket wrapper and peer bookkeeping.

use core::net::SocketAddr;
use core::time::Duration;
use std::net::UdpSocket;

use netspan_proto::{peek_kind, PacketKind, HEADER_SIZE};

use crate::NetError;

/// A bound UDP socket moving whole wire packets.
#[derive(Debug)]
pub struct Socket {
    sock: UdpSocket,
    mtu: usize,
}

impl Socket {
    /// Binds to `local_addr`. With a read timeout set, `recv_packet`
    /// reports [`NetError::Timeout`] instead of blocking forever; the
    /// cycle loop turns that into a loss event.
    pub fn bind(
        local_addr: SocketAddr,
        mtu: u32,
        read_timeout: Option<Duration>,
    ) -> Result<Self, NetError> {
        // anything smaller cannot carry a header plus one payload byte
        if (mtu as usize) <= HEADER_SIZE {
            return Err(NetError::BadMtu { mtu });
        }
        let sock = UdpSocket::bind(local_addr)?;
        sock.set_read_timeout(read_timeout)?;
        Ok(Self { sock, mtu: mtu as usize })
    }

    #[inline]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    #[inline]
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.sock.local_addr()?)
    }

    /// Sends one whole packet. Datagrams are all-or-nothing, so a short
    /// send is an error, not a retry point.
    pub fn send_packet(&self, packet: &[u8], dest: SocketAddr) -> Result<(), NetError> {
        if packet.len() > self.mtu {
            log::warn!("sending {} bytes over a {} byte mtu", packet.len(), self.mtu);
        }
        let sent = self.sock.send_to(packet, dest).map_err(NetError::from_io)?;
        if sent != packet.len() {
            return Err(NetError::ShortSend { sent, len: packet.len() });
        }
        Ok(())
    }

    /// Receives one packet into `buf`, returning the sender and the
    /// received bytes.
    pub fn recv_packet<'a>(
        &self,
        buf: &'a mut [u8],
    ) -> Result<(SocketAddr, &'a [u8]), NetError> {
        let (n, peer) = self.sock.recv_from(buf).map_err(NetError::from_io)?;
        Ok((peer, &buf[..n]))
    }

    /// Like [`recv_packet`](Self::recv_packet), but classifies the packet
    /// from its leading tag so the cycle loop can dispatch without looking
    /// at the bytes itself.
    pub fn recv_classified<'a>(
        &self,
        buf: &'a mut [u8],
    ) -> Result<(SocketAddr, PacketKind, &'a [u8]), NetError> {
        let (peer, packet) = self.recv_packet(buf)?;
        Ok((peer, peek_kind(packet), packet))
    }
}

/// Master-side map from assigned slave id to the peer's address.
#[derive(Debug, Default)]
pub struct PeerTable {
    map: rustc_hash::FxHashMap<u32, SocketAddr>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slave; returns the address it replaces, if any.
    pub fn insert(&mut self, slave_id: u32, addr: SocketAddr) -> Option<SocketAddr> {
        self.map.insert(slave_id, addr)
    }

    #[inline]
    pub fn addr_of(&self, slave_id: u32) -> Option<SocketAddr> {
        self.map.get(&slave_id).copied()
    }

    pub fn remove(&mut self, slave_id: u32) -> Option<SocketAddr> {
        self.map.remove(&slave_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, SocketAddr)> + '_ {
        self.map.iter().map(|(&id, &addr)| (id, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn packets_cross_the_loopback() {
        let a = Socket::bind(localhost(), 1500, Some(Duration::from_millis(200))).unwrap();
        let b = Socket::bind(localhost(), 1500, Some(Duration::from_millis(200))).unwrap();

        a.send_packet(b"headr\0\0payload", b.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 1500];
        let (peer, got) = b.recv_packet(&mut buf).unwrap();
        assert_eq!(peer, a.local_addr().unwrap());
        assert_eq!(got, b"headr\0\0payload");
    }

    #[test]
    fn classification_happens_at_the_socket() {
        let a = Socket::bind(localhost(), 1500, Some(Duration::from_millis(200))).unwrap();
        let b = Socket::bind(localhost(), 1500, Some(Duration::from_millis(200))).unwrap();

        a.send_packet(b"params\0...", b.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 1500];
        let (_, kind, _) = b.recv_classified(&mut buf).unwrap();
        assert_eq!(kind, PacketKind::SessionParams);
    }

    #[test]
    fn tiny_mtu_is_refused() {
        assert!(matches!(
            Socket::bind(localhost(), HEADER_SIZE as u32, None),
            Err(NetError::BadMtu { mtu: 64 })
        ));
    }

    #[test]
    fn timeout_is_its_own_error() {
        let s = Socket::bind(localhost(), 1500, Some(Duration::from_millis(10))).unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(s.recv_packet(&mut buf), Err(NetError::Timeout)));
    }

    #[test]
    fn peer_table_tracks_slaves() {
        let mut table = PeerTable::new();
        let addr: SocketAddr = "10.0.0.2:19000".parse().unwrap();
        assert!(table.is_empty());

        assert_eq!(table.insert(1, addr), None);
        assert_eq!(table.addr_of(1), Some(addr));
        assert_eq!(table.len(), 1);

        let moved: SocketAddr = "10.0.0.3:19000".parse().unwrap();
        assert_eq!(table.insert(1, moved), Some(addr));
        assert_eq!(table.addr_of(1), Some(moved));

        assert_eq!(table.remove(1), Some(moved));
        assert_eq!(table.addr_of(1), None);
    }
}
