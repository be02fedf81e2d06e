//! Wire constants of the pump protocol.
//!
//! These values are fixed by the pump firmware and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Size of the Twofish session keys.
pub const SESSION_KEY_SIZE: usize = 16;

/// Size of a SATL nonce.
pub const NONCE_SIZE: usize = 13;

/// Size of the truncated CBC-MAC trailer.
pub const MAC_SIZE: usize = 8;

/// RSA modulus size in bits for the ephemeral pairing key.
pub const RSA_KEY_BITS: usize = 2048;

/// RSA modulus size in bytes as sent in `KEY_REQUEST`.
pub const RSA_MODULUS_SIZE: usize = 256;

/// RSA public exponent.
pub const RSA_PUBLIC_EXPONENT: u32 = 65537;

/// Size of the handshake random blobs exchanged by both sides.
pub const HANDSHAKE_RANDOM_SIZE: usize = 28;

/// Seed label for session key derivation.
pub const KEY_SEED: &[u8] = b"master secret";

/// Seed label for the verification code.
pub const VERIFICATION_SEED: &[u8] = b"finished";

/// Seed label for service password hashing.
pub const SERVICE_PASSWORD_SEED: &[u8] = b"service pwd";

/// Size of a service challenge salt.
pub const SERVICE_SALT_SIZE: usize = 16;

/// Size of a service password hash.
pub const SERVICE_PASSWORD_HASH_SIZE: usize = 16;

// =============================================================================
// SATL FRAMING
// =============================================================================

/// Magic bytes that open every SATL packet.
pub const SATL_PREAMBLE: [u8; 4] = [0x88, 0xCC, 0xEE, 0xFF];

/// SATL protocol version.
pub const SATL_VERSION: u8 = 32;

/// Bytes before the header covered by the length field (preamble + length + xor).
pub const SATL_PREFIX_SIZE: usize = 8;

/// Header bytes authenticated by the MAC (version .. nonce).
pub const SATL_HEADER_SIZE: usize = 21;

/// Offset of the payload inside a packet.
pub const SATL_PAYLOAD_OFFSET: usize = SATL_PREFIX_SIZE + SATL_HEADER_SIZE;

/// Size of the trailer (MAC, or CRC padding for unkeyed frames).
pub const SATL_TRAILER_SIZE: usize = 8;

/// Smallest packet that can be parsed.
pub const SATL_MIN_PACKET_SIZE: usize = SATL_PAYLOAD_OFFSET + SATL_TRAILER_SIZE;

/// Comm id used for `CONNECTION_REQUEST`.
pub const COMM_ID_CONNECTION_REQUEST: u32 = 0;

/// Comm id used for `KEY_REQUEST`.
pub const COMM_ID_KEY_REQUEST: u32 = 1;

/// Payload size of `KEY_REQUEST` and `KEY_RESPONSE`.
pub const KEY_EXCHANGE_PAYLOAD_SIZE: usize = 288;

/// Offset of the RSA modulus / encrypted pre-master secret in key exchange payloads.
pub const KEY_EXCHANGE_BLOB_OFFSET: usize = 32;

// =============================================================================
// PAIRING STATUS (VERIFY_CONFIRM)
// =============================================================================

/// Pump has not yet confirmed the verification code.
pub const PAIRING_PENDING: u16 = 1683;

/// Pump rejected the verification code.
pub const PAIRING_REJECTED: u16 = 7850;

/// Verification code confirmed.
pub const PAIRING_CONFIRMED: u16 = 11835;

// =============================================================================
// APPLICATION LAYER
// =============================================================================

/// Application layer protocol version.
pub const APP_VERSION: u8 = 32;

/// Application request header size (version + service + command).
pub const APP_REQUEST_HEADER_SIZE: usize = 4;

/// Application response header size (version + service + command + error).
pub const APP_RESPONSE_HEADER_SIZE: usize = 6;

/// `CONNECT` command id.
pub const APP_CONNECT: u16 = 61451;

/// `DISCONNECT` command id.
pub const APP_DISCONNECT: u16 = 61460;

/// `ACTIVATE_SERVICE` command id.
pub const APP_ACTIVATE_SERVICE: u16 = 61687;

/// `BIND` command id.
pub const APP_BIND: u16 = 62413;

/// `SERVICE_CHALLENGE` command id.
pub const APP_SERVICE_CHALLENGE: u16 = 62418;

/// Size of the zero-padded model number sent with `BIND`.
pub const MODEL_NUMBER_SIZE: usize = 68;

/// Disconnect reason sent with `DISCONNECT`.
pub const REGULAR_TERMINATION: u16 = 24579;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Time a sent frame may stay unanswered.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Interval between `VERIFY_CONFIRM_REQUEST` retries while the pump is pending.
pub const DEFAULT_VERIFICATION_HEARTBEAT: Duration = Duration::from_millis(1000);

/// Back-off before reconnecting a paired session.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(1000);

/// Receive buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Bytes requested per link read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Model number announced to the pump.
pub const DEFAULT_MODEL_NUMBER: &str = "mobile client";
