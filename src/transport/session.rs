//! Keyed session state: the pairing data that survives restarts.

use crate::core::FrameError;
use crate::crypto::{Nonce, SessionKey};

use super::frame::{SatlCommand, SatlPacket, encode_packet};

/// Session keys, comm id and nonce counters established by pairing.
///
/// Owned by the connection task. Every change after pairing completed is
/// handed to the pairing store as a fresh copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingData {
    /// Nonce of the last frame sent.
    pub last_sent_nonce: Nonce,
    /// Nonce of the last frame accepted.
    pub last_received_nonce: Nonce,
    /// Session identifier assigned by the pump.
    pub comm_id: u32,
    /// Key for frames from the pump.
    pub incoming_key: SessionKey,
    /// Key for frames to the pump.
    pub outgoing_key: SessionKey,
}

impl PairingData {
    /// Fresh session state right after key derivation.
    pub fn new(comm_id: u32, incoming_key: SessionKey, outgoing_key: SessionKey) -> Self {
        Self {
            last_sent_nonce: Nonce::ZERO,
            last_received_nonce: Nonce::ZERO,
            comm_id,
            incoming_key,
            outgoing_key,
        }
    }

    /// Encrypt and authenticate `payload` under the next outgoing nonce.
    pub fn seal(&mut self, command: SatlCommand, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let nonce = self.last_sent_nonce.next();
        let packet = encode_packet(
            command,
            self.comm_id,
            payload,
            Some((&nonce, &self.outgoing_key)),
        )?;
        self.last_sent_nonce = nonce;
        Ok(packet)
    }

    /// Verify and decrypt a keyed packet from the pump.
    ///
    /// Rejects nonces not strictly greater than the last accepted one before
    /// touching the MAC; advances `last_received_nonce` on success.
    pub fn open(&mut self, packet: &SatlPacket) -> Result<Vec<u8>, FrameError> {
        if packet.nonce() <= self.last_received_nonce {
            return Err(FrameError::Replay);
        }
        let plaintext = packet.open_keyed(&self.incoming_key)?;
        if packet.comm_id() != self.comm_id {
            return Err(FrameError::CommIdMismatch {
                expected: self.comm_id,
                actual: packet.comm_id(),
            });
        }
        self.last_received_nonce = packet.nonce();
        Ok(plaintext)
    }
}
