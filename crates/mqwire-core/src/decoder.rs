//! Pluggable materialization of wire strings and byte fields.
//!
//! The receiver reads length-prefixed fields off the transport through a
//! [`Decoder`], which decides how the bytes are owned: a fresh allocation
//! per field ([`AllocDecoder`]) or zero-copy views into one fixed scratch
//! buffer ([`ScratchDecoder`]).

use std::io::Read;

use bytes::{Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Strategy for materializing byte and string fields during decode.
pub trait Decoder {
    /// Reclaim scratch space. The receiver calls this once before each
    /// packet; fields handed out for the previous packet must be dropped
    /// (or copied) by then.
    fn reset(&mut self);

    /// Read exactly `len` bytes from `r`.
    fn decode_bytes(&mut self, r: &mut dyn Read, len: usize) -> Result<Bytes>;

    /// Read an MQTT string: big-endian u16 length prefix followed by that
    /// many bytes.
    fn decode_string(&mut self, r: &mut dyn Read) -> Result<Bytes> {
        let mut prefix = [0u8; 2];
        r.read_exact(&mut prefix)?;
        self.decode_bytes(r, u16::from_be_bytes(prefix) as usize)
    }
}

/// Allocates a fresh buffer for every decoded field.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocDecoder;

impl Decoder for AllocDecoder {
    fn reset(&mut self) {}

    fn decode_bytes(&mut self, r: &mut dyn Read, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// Decodes every field into one fixed-capacity scratch buffer.
///
/// Fields are zero-copy views (`split().freeze()`) of the single
/// allocation. The scratch never grows: a packet whose string fields sum
/// to more than the capacity fails with `BufferExceeded`. The capacity is
/// reclaimed on [`Decoder::reset`] once every view handed out has been
/// dropped; a view that outlives the reset forces a fresh allocation for
/// the next packet instead of aliasing its memory.
#[derive(Debug)]
pub struct ScratchDecoder {
    buf: BytesMut,
    capacity: usize,
    used: usize,
}

impl ScratchDecoder {
    /// A scratch sized for the string fields of the largest expected
    /// packet.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Scratch bytes still available for the current packet.
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }
}

impl Clone for ScratchDecoder {
    fn clone(&self) -> Self {
        Self::with_capacity(self.capacity)
    }
}

impl Decoder for ScratchDecoder {
    fn reset(&mut self) {
        self.used = 0;
    }

    fn decode_bytes(&mut self, r: &mut dyn Read, len: usize) -> Result<Bytes> {
        if len > self.free() {
            return Err(ProtocolError::BufferExceeded {
                needed: len,
                available: self.free(),
            }
            .into());
        }
        self.buf.resize(len, 0);
        r.read_exact(&mut self.buf[..])?;
        self.used += len;
        Ok(self.buf.split_to(len).freeze())
    }
}
