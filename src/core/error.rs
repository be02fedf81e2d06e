//! Error types for the pump communication stack.

use std::fmt;

use thiserror::Error;

use super::ConnectionState;

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The pre-master secret could not be decrypted.
    #[error("invalid cipher text")]
    InvalidCipherText,

    /// A key had the wrong size.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// HMAC could not be keyed.
    #[error("invalid HMAC key")]
    InvalidHmacKey,

    /// A message is too long for the 16-bit block counter.
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),
}

/// Error codes carried by SATL `ERROR` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatlErrorCode {
    /// Unspecified error.
    Undefined,
    /// Protocol version not supported by the pump.
    IncompatibleVersion,
    /// Unknown communication id.
    InvalidCommId,
    /// MAC verification failed on the pump.
    InvalidMac,
    /// CRC verification failed on the pump.
    InvalidCrc,
    /// Packet could not be parsed.
    InvalidPacket,
    /// Decryption or verification failed.
    DecryptVerifyFailed,
    /// Pump is already in a compatible state.
    CompatibleState,
    /// Request does not fit the pump's state.
    WrongState,
    /// Unknown message type.
    InvalidMessageType,
    /// Payload length does not match.
    InvalidPayloadLength,
    /// No error.
    None,
}

impl SatlErrorCode {
    /// Parse from a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Undefined),
            1 => Some(Self::IncompatibleVersion),
            2 => Some(Self::InvalidCommId),
            3 => Some(Self::InvalidMac),
            4 => Some(Self::InvalidCrc),
            5 => Some(Self::InvalidPacket),
            7 => Some(Self::DecryptVerifyFailed),
            8 => Some(Self::CompatibleState),
            16 => Some(Self::WrongState),
            51 => Some(Self::InvalidMessageType),
            60 => Some(Self::InvalidPayloadLength),
            255 => Some(Self::None),
            _ => Option::None,
        }
    }

    /// Convert to the wire byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::IncompatibleVersion => 1,
            Self::InvalidCommId => 2,
            Self::InvalidMac => 3,
            Self::InvalidCrc => 4,
            Self::InvalidPacket => 5,
            Self::DecryptVerifyFailed => 7,
            Self::CompatibleState => 8,
            Self::WrongState => 16,
            Self::InvalidMessageType => 51,
            Self::InvalidPayloadLength => 60,
            Self::None => 255,
        }
    }
}

impl fmt::Display for SatlErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.as_byte())
    }
}

/// Errors raised while framing or parsing SATL packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Packet does not start with the SATL preamble.
    #[error("invalid preamble: {0}")]
    InvalidPreamble(String),

    /// Length field and its complement disagree.
    #[error("packet length xor mismatch")]
    LengthMismatch,

    /// Unsupported protocol version.
    #[error("invalid version: {0}")]
    InvalidVersion(u8),

    /// Declared data length does not fit the packet length.
    #[error("invalid payload length")]
    InvalidPayloadLength,

    /// Packet shorter than its header.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// CRC of an unkeyed frame is wrong.
    #[error("invalid CRC: expected {expected:#06x}, got {actual:#06x}")]
    InvalidCrc {
        /// Computed CRC.
        expected: u16,
        /// Received CRC.
        actual: u16,
    },

    /// MAC of a keyed frame is wrong.
    #[error("invalid MAC")]
    InvalidMac,

    /// Nonce not strictly greater than the last accepted one.
    #[error("replayed or stale nonce")]
    Replay,

    /// Comm id does not belong to this session.
    #[error("comm id mismatch: expected {expected}, got {actual}")]
    CommIdMismatch {
        /// Session comm id.
        expected: u32,
        /// Received comm id.
        actual: u32,
    },

    /// Unknown SATL command byte.
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    /// Receive buffer would overflow.
    #[error("buffer overflow: capacity {capacity} bytes")]
    Overflow {
        /// Buffer capacity.
        capacity: usize,
    },

    /// Crypto failure while sealing or opening a frame.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Errors in application layer responses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppLayerError {
    /// Response shorter than its header.
    #[error("invalid payload length")]
    InvalidPayloadLength,

    /// Unsupported application version.
    #[error("invalid version: {0}")]
    InvalidVersion(u8),

    /// Response belongs to another service.
    #[error("invalid service: expected {expected}, got {actual}")]
    InvalidService {
        /// Expected service id.
        expected: u8,
        /// Received service id.
        actual: u8,
    },

    /// Response belongs to another command.
    #[error("invalid command: expected {expected}, got {actual}")]
    InvalidCommand {
        /// Expected command id.
        expected: u16,
        /// Received command id.
        actual: u16,
    },

    /// Body length does not match the command's response length.
    #[error("unexpected response length: expected {expected}, got {actual}")]
    UnexpectedLength {
        /// Expected body length.
        expected: usize,
        /// Received body length.
        actual: usize,
    },

    /// Response CRC is wrong.
    #[error("invalid CRC")]
    InvalidCrc,

    /// Pump answered a connection-level request with an error code.
    #[error("pump returned error {0:#06x}")]
    ErrorCode(u16),
}

/// Response decoding failures reported by command implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Body has the wrong length.
    #[error("unexpected length: expected {expected}, got {actual}")]
    UnexpectedLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A field holds a value the decoder does not understand.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Failures that tear down the current session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed or unauthenticated frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Crypto failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed application response.
    #[error("application layer error: {0}")]
    App(#[from] AppLayerError),

    /// No response within the response timeout.
    #[error("timeout")]
    Timeout,

    /// A frame arrived that the current state does not expect.
    #[error("unexpected {message} in state {state}")]
    WrongState {
        /// What arrived.
        message: &'static str,
        /// State at arrival.
        state: ConnectionState,
    },

    /// The state machine attempted an illegal transition.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// Pump does not speak our SATL version.
    #[error("incompatible version")]
    IncompatibleVersion,

    /// Pump rejected the verification code.
    #[error("verification code rejected")]
    PairingRejected,

    /// Pump answered `VERIFY_CONFIRM` with an unknown status.
    #[error("invalid pairing status: {0}")]
    InvalidPairingStatus(u16),

    /// Pump sent an `ERROR` frame.
    #[error("received error message: {0}")]
    Remote(SatlErrorCode),

    /// Pump sent an `ERROR` frame with an unknown code.
    #[error("unknown error code: {0}")]
    UnknownRemoteError(u8),

    /// Radio could not be enabled.
    #[error("failed to enable radio")]
    RadioUnavailable,

    /// The link reached end of stream.
    #[error("link closed")]
    LinkClosed,

    /// Link I/O failed.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns true if this error ends a first-time pairing attempt for good.
    pub fn is_pairing_failure(&self) -> bool {
        matches!(
            self,
            SessionError::IncompatibleVersion
                | SessionError::PairingRejected
                | SessionError::InvalidPairingStatus(_)
        )
    }

    /// Returns true if the link itself failed rather than the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_) | SessionError::LinkClosed | SessionError::RadioUnavailable
        )
    }

    /// Returns true if the failure involved frame authentication.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            SessionError::Frame(FrameError::InvalidMac)
                | SessionError::Frame(FrameError::Replay)
                | SessionError::Frame(FrameError::CommIdMismatch { .. })
        )
    }
}

/// Result of a queued command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Session was not connected, or was torn down before the response.
    #[error("not connected")]
    NotConnected,

    /// Pump answered with an application error code.
    #[error("pump returned error code {0:#06x}")]
    App(u16),

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors from the pump handle itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpError {
    /// The connection task has stopped.
    #[error("connection task stopped")]
    Stopped,

    /// The operation is not valid in the current state.
    #[error("not allowed in state {0}")]
    WrongState(ConnectionState),
}

/// Result type for session handling.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satl_error_codes() {
        for byte in [0u8, 1, 2, 3, 4, 5, 7, 8, 16, 51, 60, 255] {
            let code = SatlErrorCode::from_byte(byte).unwrap();
            assert_eq!(code.as_byte(), byte);
        }
        assert!(SatlErrorCode::from_byte(6).is_none());
        assert!(SatlErrorCode::from_byte(200).is_none());
    }

    #[test]
    fn test_session_error_classification() {
        assert!(SessionError::PairingRejected.is_pairing_failure());
        assert!(SessionError::IncompatibleVersion.is_pairing_failure());
        assert!(!SessionError::Timeout.is_pairing_failure());

        assert!(SessionError::LinkClosed.is_transport());
        assert!(!SessionError::Frame(FrameError::InvalidMac).is_transport());

        assert!(SessionError::Frame(FrameError::Replay).is_security_error());
        assert!(!SessionError::Frame(FrameError::LengthMismatch).is_security_error());
    }

    #[test]
    fn test_error_messages() {
        let err = SessionError::Remote(SatlErrorCode::InvalidMac);
        assert_eq!(err.to_string(), "received error message: InvalidMac (3)");

        let err = CommandError::App(0xF003);
        assert_eq!(err.to_string(), "pump returned error code 0xf003");
    }
}
