use serde::{Deserialize, Serialize};

use crate::serial::protocol::{DecodeError, Frame};

/// Link connection state, owned by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Opening,
    Connected,
    /// Unexpected loss of the device. Terminal for this link instance.
    Lost,
}

impl ConnectionState {
    /// A worker is running (or about to) for this state
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Opening | ConnectionState::Connected)
    }
}

/// Observability events broadcast to notice subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotice {
    StateChanged(ConnectionState),
    OpenFailed { port: String, reason: String },
    DecodeFailed { line: String, error: DecodeError },
    WriteFailed { line: String, reason: String },
    Disconnected { reason: String },
}

pub type FrameCallback = Box<dyn FnMut(Frame) + Send>;
pub type EventCallback = Box<dyn FnMut(String) + Send>;

/// Consumer hooks, invoked on the worker thread. They must not block.
pub struct Callbacks {
    pub on_frame: FrameCallback,
    pub on_event: EventCallback,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_frame: Box::new(|_| {}),
            on_event: Box::new(|_| {}),
        }
    }
}
