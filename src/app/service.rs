//! Pump services that commands are addressed to.

use std::fmt;

/// A pump-side service.
///
/// Every service except [`Service::Connection`] must be activated once per
/// session before its commands are accepted; some require a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Connection management (bind, connect, activation).
    Connection,
    /// Read-only status queries.
    Status,
    /// Therapy parameters.
    Parameter,
    /// Event history.
    History,
    /// Pump configuration.
    Configuration,
    /// Remote control (boluses, TBRs).
    RemoteControl,
}

impl Service {
    /// All services.
    pub const ALL: [Service; 6] = [
        Service::Connection,
        Service::Status,
        Service::Parameter,
        Service::History,
        Service::Configuration,
        Service::RemoteControl,
    ];

    /// Wire id.
    pub fn id(self) -> u8 {
        match self {
            Service::Connection => 0,
            Service::Status => 15,
            Service::Parameter => 51,
            Service::History => 60,
            Service::Configuration => 85,
            Service::RemoteControl => 102,
        }
    }

    /// Major protocol version of the service.
    pub fn version_major(self) -> u8 {
        match self {
            Service::Connection => 0,
            Service::Status | Service::RemoteControl => 1,
            Service::Parameter | Service::History | Service::Configuration => 2,
        }
    }

    /// Minor protocol version of the service.
    pub fn version_minor(self) -> u8 {
        0
    }

    /// Activation password, if the service is protected.
    pub fn password(self) -> Option<&'static str> {
        match self {
            Service::Configuration => Some("u+5Fhz6Gw4j1Kkas"),
            Service::RemoteControl => Some("MAbcV2X6PVjxuz+R"),
            _ => None,
        }
    }

    /// Look up a service by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|service| service.id() == id)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.id())
    }
}
