//! Seam to the external block codec used by the CELT encoder variant.
//!
//! The transport only requires a fixed-rate contract: one full period of
//! float samples in, exactly `compressed_size` bytes out, and back. Codec
//! construction, tuning and teardown belong to the host.

use core::fmt;

/// Parameters a codec instance is created with, one instance per port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSpec {
    pub sample_rate: u32,
    /// Samples per block, the session period size.
    pub frame_size: u32,
    /// Exact compressed block size in bytes (`kbps * 1024 / 8`).
    pub compressed_size: usize,
}

/// A codec collaborator failed; the affected port plays silence this cycle.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("codec: {0}")]
pub struct CodecError(pub &'static str);

/// Fixed-rate block encoder/decoder pair.
pub trait BlockCodec: Send {
    /// Compresses exactly one frame of samples, filling `out` completely.
    fn encode_float(&mut self, samples: &[f32], out: &mut [u8]) -> Result<(), CodecError>;

    /// Decompresses one block into exactly one frame of samples.
    fn decode_float(&mut self, block: &[u8], out: &mut [f32]) -> Result<(), CodecError>;
}

impl fmt::Debug for dyn BlockCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlockCodec")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Stores the frame verbatim (truncated or zero-padded to the block
    /// size) so tests can see exactly which bytes travelled.
    pub(crate) struct LoopbackCodec {
        pub frame_size: usize,
    }

    impl BlockCodec for LoopbackCodec {
        fn encode_float(&mut self, samples: &[f32], out: &mut [u8]) -> Result<(), CodecError> {
            if samples.len() != self.frame_size {
                return Err(CodecError("bad frame size"));
            }
            out.fill(0);
            for (chunk, s) in out.chunks_exact_mut(4).zip(samples) {
                chunk.copy_from_slice(&s.to_le_bytes());
            }
            Ok(())
        }

        fn decode_float(&mut self, block: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
            if out.len() != self.frame_size {
                return Err(CodecError("bad frame size"));
            }
            out.fill(0.);
            for (s, chunk) in out.iter_mut().zip(block.chunks_exact(4)) {
                let mut b = [0; 4];
                b.copy_from_slice(chunk);
                *s = f32::from_le_bytes(b);
            }
            Ok(())
        }
    }
}
