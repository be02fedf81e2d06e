//! Typed application commands.

use std::fmt;

use crate::core::DecodeError;

use super::service::Service;

/// A request/response pair addressed to a pump service.
///
/// Implementors describe the wire shape of one command; the connection task
/// takes care of service activation, framing and completion.
///
/// # Example
///
/// ```
/// use insight_link::app::{AppCommand, Service};
/// use insight_link::core::DecodeError;
///
/// struct ReadBatteryLevel;
///
/// impl AppCommand for ReadBatteryLevel {
///     type Response = u8;
///
///     fn service(&self) -> Service {
///         Service::Status
///     }
///
///     fn command_id(&self) -> u16 {
///         0x0331
///     }
///
///     fn response_length(&self) -> Option<usize> {
///         Some(1)
///     }
///
///     fn encode_request(&self) -> Vec<u8> {
///         Vec::new()
///     }
///
///     fn decode_response(&self, body: &[u8]) -> Result<u8, DecodeError> {
///         Ok(body[0])
///     }
/// }
/// ```
pub trait AppCommand: Send + 'static {
    /// Decoded response type.
    type Response: Send + 'static;

    /// Target service.
    fn service(&self) -> Service;

    /// Command id.
    fn command_id(&self) -> u16;

    /// Expected response body length, if fixed.
    fn response_length(&self) -> Option<usize>;

    /// Whether the request carries a CRC.
    fn request_crc(&self) -> bool {
        false
    }

    /// Whether the response carries a CRC.
    fn response_crc(&self) -> bool {
        false
    }

    /// Encode the request payload.
    fn encode_request(&self) -> Vec<u8>;

    /// Decode a successful response body.
    fn decode_response(&self, body: &[u8]) -> Result<Self::Response, DecodeError>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A command given as raw bytes; the response body is returned unchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct RawCommand {
    /// Target service.
    pub service: Service,
    /// Command id.
    pub command_id: u16,
    /// Request payload.
    pub payload: Vec<u8>,
    /// Expected response body length.
    pub response_length: Option<usize>,
    /// Request carries a CRC.
    pub request_crc: bool,
    /// Response carries a CRC.
    pub response_crc: bool,
}

impl RawCommand {
    /// A command without CRCs and without a fixed response length.
    pub fn new(service: Service, command_id: u16, payload: Vec<u8>) -> Self {
        Self {
            service,
            command_id,
            payload,
            response_length: None,
            request_crc: false,
            response_crc: false,
        }
    }

    /// Require a response body of exactly `length` bytes.
    pub fn with_response_length(mut self, length: usize) -> Self {
        self.response_length = Some(length);
        self
    }

    /// Enable CRCs on request and response.
    pub fn with_crc(mut self) -> Self {
        self.request_crc = true;
        self.response_crc = true;
        self
    }
}

impl fmt::Debug for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCommand")
            .field("service", &self.service)
            .field("command_id", &format_args!("{:#06x}", self.command_id))
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl AppCommand for RawCommand {
    type Response = Vec<u8>;

    fn service(&self) -> Service {
        self.service
    }

    fn command_id(&self) -> u16 {
        self.command_id
    }

    fn response_length(&self) -> Option<usize> {
        self.response_length
    }

    fn request_crc(&self) -> bool {
        self.request_crc
    }

    fn response_crc(&self) -> bool {
        self.response_crc
    }

    fn encode_request(&self) -> Vec<u8> {
        self.payload.clone()
    }

    fn decode_response(&self, body: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(body.to_vec())
    }

    fn name(&self) -> &'static str {
        "RawCommand"
    }
}
