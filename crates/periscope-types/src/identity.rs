//! Connection Identity
//!
//! Identity types for connected apps and devices, plus the shared
//! connection state machine.

use serde::{Deserialize, Serialize};

/// Handshake metadata describing one connected remote application instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppQuery {
    /// Application name (e.g. bundle id)
    pub app: String,

    /// Operating system of the hosting device
    pub os: String,

    /// Device title or model
    pub device: String,

    /// Stable device identifier (serial)
    pub device_id: String,

    /// Version of the in-app SDK that opened the connection
    #[serde(default)]
    pub sdk_version: u32,
}

/// Identity of a physical or virtual machine hosting zero or more apps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub os: String,
    pub title: String,
    pub serial: String,
}

impl DeviceIdentity {
    pub fn new(
        os: impl Into<String>,
        title: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            os: os.into(),
            title: title.into(),
            serial: serial.into(),
        }
    }
}

/// Kind of machine a device represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Physical,
    Emulator,
}

/// Connection lifecycle of a session, device, or plugin instance
///
/// `Disconnected` is reversible only by replacing the object with a new
/// connection of the same identity, never by flipping the state back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake received, not yet serving traffic
    Connecting = 0,
    /// Live connection
    Connected = 1,
    /// Connection lost; object retained for its in-memory state
    Disconnected = 2,
    /// Terminal; all owned state released
    Destroyed = 3,
}

impl ConnectionState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Disconnected,
            _ => Self::Destroyed,
        }
    }

    /// Check whether this state can never be left again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Destroyed)
    }

    /// Check whether the connection is live
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Destroyed => write!(f, "destroyed"),
        }
    }
}
