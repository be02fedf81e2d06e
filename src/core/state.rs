//! Connection lifecycle states.

use std::fmt;

/// The single current state of a pump connection.
///
/// ```text
/// Disconnected ─► EnablingRadio ─► Connecting ─┬─► ConnectionRequest ─► KeyRequest
///                                              │     ─► VerifyDisplayRequest
///                                              │     ─► WaitingForCodeConfirmation
///                                              │     ─► VerifyConfirmRequest ─► AppBind ─┐
///                                              └─► SynRequest ─► AppConnect ─────────────┤
///                                                                                        ▼
///                           Connecting / EnablingRadio ◄── AppDisconnect ◄──────── Connected
/// ```
///
/// Any state may fall back to `Disconnected` or `Recovering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link, nothing scheduled.
    Disconnected,
    /// Waiting for the radio to come up.
    EnablingRadio,
    /// Opening the link.
    Connecting,
    /// `CONNECTION_REQUEST` sent.
    ConnectionRequest,
    /// `KEY_REQUEST` sent.
    KeyRequest,
    /// `VERIFY_DISPLAY_REQUEST` sent.
    VerifyDisplayRequest,
    /// Verification code shown, waiting for the operator.
    WaitingForCodeConfirmation,
    /// `VERIFY_CONFIRM_REQUEST` sent.
    VerifyConfirmRequest,
    /// `SYN_REQUEST` sent on a paired session.
    SynRequest,
    /// Application `CONNECT` sent.
    AppConnect,
    /// Application `BIND` sent.
    AppBind,
    /// Ready for commands.
    Connected,
    /// Application `DISCONNECT` sent.
    AppDisconnect,
    /// Waiting out the back-off before reconnecting.
    Recovering,
}

impl ConnectionState {
    /// Returns true if the transition `self -> next` is allowed.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if matches!(next, Disconnected | Recovering) {
            return true;
        }

        matches!(
            (self, next),
            (Disconnected, EnablingRadio | Connecting)
                | (EnablingRadio, Connecting)
                | (Recovering, Connecting | EnablingRadio)
                | (Connecting, ConnectionRequest | SynRequest)
                | (ConnectionRequest, KeyRequest)
                | (KeyRequest, VerifyDisplayRequest)
                | (VerifyDisplayRequest, WaitingForCodeConfirmation)
                | (WaitingForCodeConfirmation, VerifyConfirmRequest)
                | (VerifyConfirmRequest, VerifyConfirmRequest | AppBind)
                | (SynRequest, AppConnect)
                | (AppConnect, Connected)
                | (AppBind, Connected)
                | (Connected, AppDisconnect)
                | (AppDisconnect, Connecting | EnablingRadio)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::EnablingRadio => "ENABLING_RADIO",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::ConnectionRequest => "CONNECTION_REQUEST",
            ConnectionState::KeyRequest => "KEY_REQUEST",
            ConnectionState::VerifyDisplayRequest => "VERIFY_DISPLAY_REQUEST",
            ConnectionState::WaitingForCodeConfirmation => "WAITING_FOR_CODE_CONFIRMATION",
            ConnectionState::VerifyConfirmRequest => "VERIFY_CONFIRM_REQUEST",
            ConnectionState::SynRequest => "SYN_REQUEST",
            ConnectionState::AppConnect => "APP_CONNECT",
            ConnectionState::AppBind => "APP_BIND",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::AppDisconnect => "APP_DISCONNECT",
            ConnectionState::Recovering => "RECOVERING",
        };
        f.write_str(name)
    }
}
