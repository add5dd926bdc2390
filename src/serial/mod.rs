pub mod interface;
pub mod link;
pub mod protocol;

pub use interface::{LineTransport, SerialInterface};
pub use link::{ConnectionState, Link, LinkBuilder, LinkNotice};
pub use protocol::{DecodeError, Field, Frame, OnBadToken};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Idle read from a transport. `SerialInterface` reports this as `Ok(None)`;
    /// either way the link never surfaces it to the consumer.
    #[error("Read timed out")]
    ReadTimeout,

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Link is not connected")]
    NotConnected,

    #[error("Link is already open")]
    AlreadyOpen,

    #[error("Expected {expected} fields, got {actual}")]
    WrongFieldCount { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    Serialport(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
