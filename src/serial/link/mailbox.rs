use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::ConnectionState;
use crate::serial::{LinkError, Result};

/// Single-slot holder for the next outbound line. A new value replaces any
/// value that has not been taken yet.
#[derive(Debug, Default)]
pub struct OutboundMailbox {
    pending: Option<String>,
}

impl OutboundMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `line`, returning the unsent line it replaced, if any
    pub fn set(&mut self, line: String) -> Option<String> {
        self.pending.replace(line)
    }

    pub fn take(&mut self) -> Option<String> {
        self.pending.take()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }
}

#[derive(Debug, Default)]
struct LinkShared {
    mailbox: OutboundMailbox,
    state: ConnectionState,
    quit: bool,
}

/// What the worker does next, read under one lock.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct WorkerPoll {
    pub quit: bool,
    pub outbound: Option<String>,
}

/// Mailbox, connection state and quit flag behind a single mutex, so no side
/// ever sees one of them change without the others.
#[derive(Debug, Clone, Default)]
pub struct SharedLinkState {
    inner: Arc<Mutex<LinkShared>>,
}

impl SharedLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkShared> {
        // Every critical section is a plain field update, so a poisoned guard is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the pending outbound line
    pub fn set_outbound(&self, line: String) {
        if let Some(dropped) = self.lock().mailbox.set(line) {
            log::debug!("Superseded unsent line {:?}", dropped);
        }
    }

    pub fn take_outbound(&self) -> Option<String> {
        self.lock().mailbox.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn quit_requested(&self) -> bool {
        self.lock().quit
    }

    pub(crate) fn request_quit(&self) {
        self.lock().quit = true;
    }

    /// Set the state, returning the previous one
    pub(crate) fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut self.lock().state, state)
    }

    /// Queue `line` only while connected and not shutting down
    pub(crate) fn send_if_connected(&self, line: String) -> Result<()> {
        let mut shared = self.lock();
        if shared.state != ConnectionState::Connected || shared.quit {
            return Err(LinkError::NotConnected);
        }
        if let Some(dropped) = shared.mailbox.set(line) {
            log::debug!("Superseded unsent line {:?}", dropped);
        }
        Ok(())
    }

    /// Fresh slate for a new worker
    pub(crate) fn begin_open(&self) {
        let mut shared = self.lock();
        shared.mailbox.take();
        shared.quit = false;
        shared.state = ConnectionState::Opening;
    }

    pub(crate) fn poll(&self) -> WorkerPoll {
        let mut shared = self.lock();
        WorkerPoll {
            quit: shared.quit,
            outbound: shared.mailbox.take(),
        }
    }
}
