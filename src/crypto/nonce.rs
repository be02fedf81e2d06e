//! 13-byte SATL nonce counters.

use std::cmp::Ordering;
use std::fmt;

use crate::core::NONCE_SIZE;

/// A little-endian 104-bit counter.
///
/// Every keyed frame carries a nonce one greater than the previous one sent
/// in the same direction. Ordering compares the numeric value, so byte 12 is
/// the most significant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// The zero nonce used before the first keyed frame.
    pub const ZERO: Nonce = Nonce([0u8; NONCE_SIZE]);

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of exactly 13 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Return the successor of this nonce.
    ///
    /// Wraps to zero after the maximum value; a session never gets close.
    pub fn next(&self) -> Nonce {
        let mut bytes = self.0;
        for byte in bytes.iter_mut() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
        Nonce(bytes)
    }

    /// Advance in place and return the new value.
    pub fn increment(&mut self) -> Nonce {
        *self = self.next();
        *self
    }
}

impl Ord for Nonce {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for Nonce {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_carries() {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        let nonce = Nonce::from_bytes(bytes).next();

        let mut expected = [0u8; NONCE_SIZE];
        expected[2] = 1;
        assert_eq!(nonce.as_bytes(), &expected);
    }

    #[test]
    fn test_increment_in_place() {
        let mut nonce = Nonce::ZERO;
        assert_eq!(nonce.increment().as_bytes()[0], 1);
        assert_eq!(nonce.increment().as_bytes()[0], 2);
        assert_eq!(nonce.as_bytes()[0], 2);
    }

    #[test]
    fn test_ordering_is_numeric_little_endian() {
        let mut low = [0u8; NONCE_SIZE];
        low[0] = 0xFF;
        let mut high = [0u8; NONCE_SIZE];
        high[1] = 0x01;

        // 0x01_00 > 0x00_FF even though byte 0 is smaller
        assert!(Nonce::from_bytes(high) > Nonce::from_bytes(low));
        assert!(Nonce::ZERO < Nonce::ZERO.next());
        assert_eq!(Nonce::ZERO.next().cmp(&Nonce::ZERO.next()), Ordering::Equal);
    }

    #[test]
    fn test_successor_always_greater() {
        let mut nonce = Nonce::ZERO;
        for _ in 0..600 {
            let next = nonce.next();
            assert!(next > nonce);
            nonce = next;
        }
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Nonce::from_slice(&[0u8; 12]).is_none());
        assert!(Nonce::from_slice(&[0u8; 13]).is_some());
    }
}
