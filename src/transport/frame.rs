//! SATL packet encoding and decoding.
//!
//! ```text
//! ┌──────────┬────────┬────────────┬─────────┬─────────┬──────────┬────────┬───────┬─────────┬─────────┐
//! │ preamble │ length │ length^FFFF│ version │ command │ data len │ comm id│ nonce │ payload │ trailer │
//! │    4     │ u16 LE │   u16 LE   │    1    │    1    │  u16 LE  │ u32 LE │  13   │    n    │    8    │
//! └──────────┴────────┴────────────┴─────────┴─────────┴──────────┴────────┴───────┴─────────┴─────────┘
//! ```
//!
//! Keyed frames carry an encrypted payload followed by the 8-byte MAC.
//! Unkeyed frames carry the plaintext payload and a CRC-16 inside the data
//! length, followed by 8 zero bytes.

use crate::core::{
    FrameError, MAC_SIZE, SATL_HEADER_SIZE, SATL_MIN_PACKET_SIZE, SATL_PAYLOAD_OFFSET,
    SATL_PREAMBLE, SATL_PREFIX_SIZE, SATL_TRAILER_SIZE, SATL_VERSION,
};
use crate::crypto::{Nonce, SessionKey, calculate_crc, calculate_mac, encrypt_or_decrypt};

/// SATL command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SatlCommand {
    /// Application layer payload.
    Data = 3,
    /// Pump-side error report.
    Error = 6,
    /// First pairing message.
    ConnectionRequest = 9,
    /// Answer to `ConnectionRequest`.
    ConnectionResponse = 10,
    /// RSA modulus and client random.
    KeyRequest = 12,
    /// Operator confirmed the verification code.
    VerifyConfirmRequest = 14,
    /// Encrypted pre-master secret and pump random.
    KeyResponse = 17,
    /// Ask the pump to display its verification code.
    VerifyDisplayRequest = 18,
    /// Pump displays the code.
    VerifyDisplayResponse = 20,
    /// Resume a paired session.
    SynRequest = 23,
    /// Answer to `SynRequest`.
    SynAckResponse = 24,
    /// Pump's pairing status.
    VerifyConfirmResponse = 30,
}

impl SatlCommand {
    /// Parse from a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            3 => Some(Self::Data),
            6 => Some(Self::Error),
            9 => Some(Self::ConnectionRequest),
            10 => Some(Self::ConnectionResponse),
            12 => Some(Self::KeyRequest),
            14 => Some(Self::VerifyConfirmRequest),
            17 => Some(Self::KeyResponse),
            18 => Some(Self::VerifyDisplayRequest),
            20 => Some(Self::VerifyDisplayResponse),
            23 => Some(Self::SynRequest),
            24 => Some(Self::SynAckResponse),
            30 => Some(Self::VerifyConfirmResponse),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Inspect the first 8 bytes of a packet and return its total size.
///
/// Fails on a bad preamble or a length that disagrees with its complement.
pub fn packet_size(prefix: &[u8]) -> Result<usize, FrameError> {
    if prefix.len() < SATL_PREFIX_SIZE {
        return Err(FrameError::TooShort {
            expected: SATL_PREFIX_SIZE,
            actual: prefix.len(),
        });
    }
    if prefix[..4] != SATL_PREAMBLE {
        return Err(FrameError::InvalidPreamble(hex::encode(&prefix[..4])));
    }
    let length = u16::from_le_bytes([prefix[4], prefix[5]]);
    let length_xor = u16::from_le_bytes([prefix[6], prefix[7]]);
    if length != length_xor ^ 0xFFFF {
        return Err(FrameError::LengthMismatch);
    }
    Ok(length as usize + SATL_PREFIX_SIZE)
}

/// The part of a packet both sides hash into the verification code:
/// everything between the 8-byte prefix and the 8-byte trailer.
pub fn transcript(packet: &[u8]) -> &[u8] {
    let end = packet.len().saturating_sub(SATL_TRAILER_SIZE);
    &packet[SATL_PREFIX_SIZE.min(end)..end]
}

/// Build a SATL packet.
///
/// With `seal = Some((nonce, key))` the payload is encrypted and
/// authenticated; otherwise it is sent in the clear with a CRC.
pub fn encode_packet(
    command: SatlCommand,
    comm_id: u32,
    payload: &[u8],
    seal: Option<(&Nonce, &SessionKey)>,
) -> Result<Vec<u8>, FrameError> {
    let (nonce, data_length, body_size) = match seal {
        Some((nonce, _)) => (*nonce, payload.len(), payload.len()),
        None => (Nonce::ZERO, payload.len() + 2, payload.len() + 2),
    };
    // the length field counts everything after the prefix, trailer included
    let length = SATL_HEADER_SIZE + body_size + SATL_TRAILER_SIZE;
    let length_field =
        u16::try_from(length).map_err(|_| FrameError::InvalidPayloadLength)?;

    let mut packet = Vec::with_capacity(length + SATL_PREFIX_SIZE);
    packet.extend_from_slice(&SATL_PREAMBLE);
    packet.extend_from_slice(&length_field.to_le_bytes());
    packet.extend_from_slice(&(length_field ^ 0xFFFF).to_le_bytes());
    packet.push(SATL_VERSION);
    packet.push(command.as_byte());
    packet.extend_from_slice(&(data_length as u16).to_le_bytes());
    packet.extend_from_slice(&comm_id.to_le_bytes());
    packet.extend_from_slice(nonce.as_bytes());

    match seal {
        Some((nonce, key)) => {
            let header = header_of(&packet);
            packet.extend_from_slice(&encrypt_or_decrypt(payload, key, nonce)?);
            packet.extend_from_slice(&calculate_mac(nonce, payload, &header, key)?);
        }
        None => {
            packet.extend_from_slice(payload);
            let crc = calculate_crc(&packet[SATL_PREFIX_SIZE..]);
            packet.extend_from_slice(&crc.to_le_bytes());
            packet.extend_from_slice(&[0u8; SATL_TRAILER_SIZE]);
        }
    }
    Ok(packet)
}

fn header_of(packet: &[u8]) -> [u8; SATL_HEADER_SIZE] {
    let mut header = [0u8; SATL_HEADER_SIZE];
    header.copy_from_slice(&packet[SATL_PREFIX_SIZE..SATL_PAYLOAD_OFFSET]);
    header
}

/// A structurally valid SATL packet whose payload has not been opened yet.
#[derive(Debug, Clone)]
pub struct SatlPacket {
    bytes: Vec<u8>,
    command: u8,
    data_length: usize,
    comm_id: u32,
    nonce: Nonce,
}

impl SatlPacket {
    /// Validate framing fields of a complete packet.
    pub fn parse(bytes: Vec<u8>) -> Result<Self, FrameError> {
        if bytes.len() < SATL_MIN_PACKET_SIZE {
            return Err(FrameError::TooShort {
                expected: SATL_MIN_PACKET_SIZE,
                actual: bytes.len(),
            });
        }
        let size = packet_size(&bytes)?;
        if size != bytes.len() {
            return Err(FrameError::InvalidPayloadLength);
        }
        let version = bytes[8];
        if version != SATL_VERSION {
            return Err(FrameError::InvalidVersion(version));
        }
        let data_length = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
        if data_length + SATL_HEADER_SIZE + SATL_TRAILER_SIZE != size - SATL_PREFIX_SIZE {
            return Err(FrameError::InvalidPayloadLength);
        }
        let comm_id = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let nonce = Nonce::from_slice(&bytes[16..SATL_PAYLOAD_OFFSET])
            .ok_or(FrameError::InvalidPayloadLength)?;

        Ok(Self {
            command: bytes[9],
            bytes,
            data_length,
            comm_id,
            nonce,
        })
    }

    /// Raw command byte.
    pub fn command_byte(&self) -> u8 {
        self.command
    }

    /// Decoded command.
    pub fn command(&self) -> Result<SatlCommand, FrameError> {
        SatlCommand::from_byte(self.command).ok_or(FrameError::UnknownCommand(self.command))
    }

    /// Comm id from the header.
    pub fn comm_id(&self) -> u32 {
        self.comm_id
    }

    /// Nonce from the header.
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// The whole packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// See [`transcript`].
    pub fn transcript(&self) -> &[u8] {
        transcript(&self.bytes)
    }

    /// Verify the CRC of an unkeyed frame and return its payload.
    pub fn open_unkeyed(&self) -> Result<Vec<u8>, FrameError> {
        if self.data_length < 2 {
            return Err(FrameError::InvalidPayloadLength);
        }
        let crc_offset = SATL_PAYLOAD_OFFSET + self.data_length - 2;
        let received = u16::from_le_bytes([self.bytes[crc_offset], self.bytes[crc_offset + 1]]);
        let calculated = calculate_crc(&self.bytes[SATL_PREFIX_SIZE..crc_offset]);
        if received != calculated {
            return Err(FrameError::InvalidCrc {
                expected: calculated,
                actual: received,
            });
        }
        Ok(self.bytes[SATL_PAYLOAD_OFFSET..crc_offset].to_vec())
    }

    /// Decrypt a keyed frame and verify its MAC.
    ///
    /// Nonce ordering and comm id are checked by the caller.
    pub fn open_keyed(&self, key: &SessionKey) -> Result<Vec<u8>, FrameError> {
        let mac_offset = SATL_PAYLOAD_OFFSET + self.data_length;
        let plaintext =
            encrypt_or_decrypt(&self.bytes[SATL_PAYLOAD_OFFSET..mac_offset], key, &self.nonce)?;
        let expected = calculate_mac(&self.nonce, &plaintext, &header_of(&self.bytes), key)?;
        if self.bytes[mac_offset..mac_offset + MAC_SIZE] != expected {
            return Err(FrameError::InvalidMac);
        }
        Ok(plaintext)
    }
}
