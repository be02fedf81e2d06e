//! Application layer message framing.
//!
//! Request:  `version | service | command u16 LE | payload | [crc u16 LE]`
//! Response: `version | service | command u16 LE | error u16 LE | payload | [crc u16 LE]`
//!
//! The optional CRC covers the payload only.

use crate::core::{
    APP_ACTIVATE_SERVICE, APP_BIND, APP_CONNECT, APP_DISCONNECT, APP_REQUEST_HEADER_SIZE,
    APP_RESPONSE_HEADER_SIZE, APP_SERVICE_CHALLENGE, APP_VERSION, AppLayerError, MODEL_NUMBER_SIZE,
    REGULAR_TERMINATION, SERVICE_PASSWORD_HASH_SIZE,
};
use crate::crypto::calculate_crc;

use super::service::Service;

/// Body length of a `BIND` response.
pub const BIND_RESPONSE_LENGTH: usize = 16;

/// Body length of a `CONNECT` response.
pub const CONNECT_RESPONSE_LENGTH: usize = 8;

/// Body length of a `DISCONNECT` response.
pub const DISCONNECT_RESPONSE_LENGTH: usize = 0;

/// Body length of a `SERVICE_CHALLENGE` response (the salt).
pub const SERVICE_CHALLENGE_RESPONSE_LENGTH: usize = 16;

/// Body length of an `ACTIVATE_SERVICE` response.
pub const ACTIVATE_SERVICE_RESPONSE_LENGTH: usize = 3;

/// Outcome of a well-formed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppResponse {
    /// Error code zero; the response body.
    Success(Vec<u8>),
    /// The pump's non-zero error code.
    Error(u16),
}

/// Frame an application request.
pub fn encode_request(service: Service, command: u16, payload: &[u8], crc: bool) -> Vec<u8> {
    let mut message = Vec::with_capacity(APP_REQUEST_HEADER_SIZE + payload.len() + 2);
    message.push(APP_VERSION);
    message.push(service.id());
    message.extend_from_slice(&command.to_le_bytes());
    message.extend_from_slice(payload);
    if crc {
        message.extend_from_slice(&calculate_crc(payload).to_le_bytes());
    }
    message
}

/// Validate a response for `service`/`command` and split off its body.
///
/// A non-zero error code is returned as [`AppResponse::Error`] before the
/// length and CRC are checked.
pub fn check_response(
    data: &[u8],
    service: Service,
    command: u16,
    length: Option<usize>,
    crc: bool,
) -> Result<AppResponse, AppLayerError> {
    let overhead = APP_RESPONSE_HEADER_SIZE + if crc { 2 } else { 0 };
    if data.len() < overhead {
        return Err(AppLayerError::InvalidPayloadLength);
    }
    if data[0] != APP_VERSION {
        return Err(AppLayerError::InvalidVersion(data[0]));
    }
    if data[1] != service.id() {
        return Err(AppLayerError::InvalidService {
            expected: service.id(),
            actual: data[1],
        });
    }
    let received_command = u16::from_le_bytes([data[2], data[3]]);
    if received_command != command {
        return Err(AppLayerError::InvalidCommand {
            expected: command,
            actual: received_command,
        });
    }
    let error = u16::from_le_bytes([data[4], data[5]]);
    if error != 0 {
        return Ok(AppResponse::Error(error));
    }
    let body_len = data.len() - overhead;
    if let Some(expected) = length {
        if body_len != expected {
            return Err(AppLayerError::UnexpectedLength {
                expected,
                actual: body_len,
            });
        }
    }
    let body = &data[APP_RESPONSE_HEADER_SIZE..APP_RESPONSE_HEADER_SIZE + body_len];
    if crc {
        let received = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        if received != calculate_crc(body) {
            return Err(AppLayerError::InvalidCrc);
        }
    }
    Ok(AppResponse::Success(body.to_vec()))
}

/// Like [`check_response`] for connection-level exchanges, where any pump
/// error code ends the session.
pub fn expect_success(
    data: &[u8],
    command: u16,
    length: usize,
) -> Result<Vec<u8>, AppLayerError> {
    match check_response(data, Service::Connection, command, Some(length), false)? {
        AppResponse::Success(body) => Ok(body),
        AppResponse::Error(code) => Err(AppLayerError::ErrorCode(code)),
    }
}

/// `BIND` with the zero-padded model number.
pub fn bind_request(model_number: &str) -> Vec<u8> {
    let mut padded = [0u8; MODEL_NUMBER_SIZE];
    let bytes = model_number.as_bytes();
    let len = bytes.len().min(MODEL_NUMBER_SIZE);
    padded[..len].copy_from_slice(&bytes[..len]);
    encode_request(Service::Connection, APP_BIND, &padded, false)
}

/// `CONNECT` for a resumed session.
pub fn connect_request() -> Vec<u8> {
    encode_request(Service::Connection, APP_CONNECT, &[0u8; 8], false)
}

/// `DISCONNECT` with the regular termination reason.
pub fn disconnect_request() -> Vec<u8> {
    encode_request(
        Service::Connection,
        APP_DISCONNECT,
        &REGULAR_TERMINATION.to_le_bytes(),
        false,
    )
}

/// `SERVICE_CHALLENGE` for a password protected service.
pub fn service_challenge_request(service: Service) -> Vec<u8> {
    let payload = [service.id(), service.version_major(), service.version_minor()];
    encode_request(Service::Connection, APP_SERVICE_CHALLENGE, &payload, false)
}

/// `ACTIVATE_SERVICE`; the hash is all zeros for services without password.
pub fn activate_service_request(
    service: Service,
    password_hash: Option<&[u8; SERVICE_PASSWORD_HASH_SIZE]>,
) -> Vec<u8> {
    let mut payload = vec![service.id(), service.version_major(), service.version_minor()];
    match password_hash {
        Some(hash) => payload.extend_from_slice(hash),
        None => payload.extend_from_slice(&[0u8; SERVICE_PASSWORD_HASH_SIZE]),
    }
    encode_request(Service::Connection, APP_ACTIVATE_SERVICE, &payload, false)
}
