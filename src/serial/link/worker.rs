//! Link worker: sole owner of the serial handle for the lifetime of one link.
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use super::mailbox::SharedLinkState;
use super::types::{Callbacks, ConnectionState, LinkNotice};
use crate::config::LinkConfig;
use crate::serial::interface::LineTransport;
use crate::serial::protocol::{classify, decode, LineKind};
use crate::serial::{LinkError, Result};

/// Opens the transport for a port. Called on the worker thread.
pub type TransportFactory = Arc<dyn Fn(&str, &LinkConfig) -> Result<Box<dyn LineTransport>> + Send + Sync>;

pub(crate) struct SerialWorker {
    pub port: String,
    pub config: LinkConfig,
    pub shared: SharedLinkState,
    pub notices: broadcast::Sender<LinkNotice>,
    pub callbacks: Arc<Mutex<Callbacks>>,
}

/// Marks the link lost if the worker thread unwinds, e.g. from a panicking callback.
struct UnwindGuard<'a> {
    worker: &'a SerialWorker,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("Link worker for {} panicked", self.worker.port);
            self.worker.transition(ConnectionState::Lost);
            self.worker.notify(LinkNotice::Disconnected {
                reason: "link worker panicked".to_string(),
            });
        }
    }
}

impl SerialWorker {
    pub fn run(self, open: TransportFactory) {
        let _unwind = UnwindGuard { worker: &self };

        let mut transport = match open(&self.port, &self.config) {
            Ok(transport) => transport,
            Err(e) => {
                log::error!("Failed to open {}: {}", self.port, e);
                self.transition(ConnectionState::Disconnected);
                self.notify(LinkNotice::OpenFailed {
                    port: self.port.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.transition(ConnectionState::Connected);
        let timeout = self.config.read_timeout();

        loop {
            let poll = self.shared.poll();
            // Anything queued before the quit flag (the shutdown sentinel) still goes out
            if let Some(line) = poll.outbound {
                self.write(transport.as_mut(), line);
            }
            if poll.quit {
                break;
            }

            match transport.read_line(timeout) {
                Ok(Some(line)) => self.dispatch(&line),
                Ok(None) | Err(LinkError::ReadTimeout) => {}
                Err(e) => {
                    log::error!("Lost connection to {}: {}", self.port, e);
                    self.transition(ConnectionState::Lost);
                    self.notify(LinkNotice::Disconnected { reason: e.to_string() });
                    return;
                }
            }
        }

        drop(transport);
        self.transition(ConnectionState::Disconnected);
    }

    fn write(&self, transport: &mut dyn LineTransport, line: String) {
        match transport.write_line(&line) {
            Ok(()) => log::debug!("Sent to {}: {}", self.port, line),
            Err(e) => {
                // At-most-once: the line is not retried or requeued
                log::warn!("Failed to write {:?} to {}: {}", line, self.port, e);
                self.notify(LinkNotice::WriteFailed {
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn dispatch(&self, line: &str) {
        match classify(line) {
            LineKind::Blank => {}
            LineKind::Event => {
                log::info!("Device event from {}: {}", self.port, line.trim());
                let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                (callbacks.on_event)(line.to_string());
            }
            LineKind::Telemetry => match decode(line, self.config.inbound_len, &self.config.codec) {
                Ok(frame) => {
                    log::trace!("Frame from {}: {}", self.port, line);
                    let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                    (callbacks.on_frame)(frame);
                }
                Err(error) => {
                    log::warn!("Dropping line {:?} from {}: {}", line, self.port, error);
                    self.notify(LinkNotice::DecodeFailed {
                        line: line.to_string(),
                        error,
                    });
                }
            },
        }
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self.shared.set_state(state);
        if previous != state {
            log::info!("Link {} {:?} -> {:?}", self.port, previous, state);
            self.notify(LinkNotice::StateChanged(state));
        }
    }

    fn notify(&self, notice: LinkNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}
