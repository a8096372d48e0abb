//! Datagram transport consumed by the master and slave drivers: a thin UDP
//! socket wrapper moving whole wire packets, plus the master-side peer
//! table.
//!
//! The cycle loop distinguishes exactly one error beyond plain I/O
//! failure: a receive timeout, which it folds into the packet-loss
//! handling of the framing layer instead of tearing the session down.

pub mod udp;

pub use udp::{PeerTable, Socket};

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// No packet arrived within the configured read timeout. The cycle
    /// loop treats this as packet loss, not as a dead link.
    #[error("receive timed out")]
    Timeout,
    /// The OS sent fewer bytes than the packet holds.
    #[error("short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },
    /// The negotiated MTU cannot carry a header and a payload byte.
    #[error("unusable mtu of {mtu} bytes")]
    BadMtu { mtu: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Maps the two flavors of socket timeout onto [`NetError::Timeout`].
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}
