//! Bounded receive buffer that cuts the byte stream into SATL packets.

use crate::core::{FrameError, SATL_MIN_PACKET_SIZE, SATL_PREFIX_SIZE};

use super::frame::packet_size;

/// Accumulates link bytes until a complete packet is available.
#[derive(Debug)]
pub struct FrameBuffer {
    content: Vec<u8>,
    capacity: usize,
}

impl FrameBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            content: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes currently buffered.
    pub fn position(&self) -> usize {
        self.content.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if self.content.len() + bytes.len() > self.capacity {
            return Err(FrameError::Overflow {
                capacity: self.capacity,
            });
        }
        self.content.extend_from_slice(bytes);
        Ok(())
    }

    /// Remove and return the next complete packet, if any.
    ///
    /// The packet prefix is validated as soon as 8 bytes are buffered, so
    /// garbage is reported without waiting for a length that never arrives.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.content.len() < SATL_PREFIX_SIZE {
            return Ok(None);
        }
        let size = packet_size(&self.content)?;
        if size < SATL_MIN_PACKET_SIZE {
            return Err(FrameError::InvalidPayloadLength);
        }
        if size > self.capacity {
            return Err(FrameError::Overflow {
                capacity: self.capacity,
            });
        }
        if self.content.len() < size {
            return Ok(None);
        }
        Ok(Some(self.content.drain(..size).collect()))
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.content.clear();
    }
}
