//! Consumer-facing link handle.
//!
//! A [`Link`] owns at most one worker thread at a time. The worker holds the
//! serial handle; the consumer talks to it only through the shared
//! mailbox/state lock and the notice channel:
//!
//! - [`Link::send`] encodes a frame into the single-slot outbound mailbox
//! - [`Link::connection_state`] reads the state snapshot
//! - [`Link::subscribe_notices`] delivers state changes and dropped lines
//! - `on_frame` / `on_event` callbacks run on the worker thread
//!
//! ```ignore
//! let mut link = LinkBuilder::new(LinkConfig::v1(OnBadToken::Fail))
//!     .on_frame(|frame| println!("{:?}", frame))
//!     .on_event(|line| eprintln!("alarm: {}", line))
//!     .build();
//! link.open("/dev/ttyACM0")?;
//! // ...
//! link.shutdown();
//! ```

pub mod mailbox;
pub mod types;
pub mod worker;

pub use mailbox::{OutboundMailbox, SharedLinkState};
pub use types::{Callbacks, ConnectionState, EventCallback, FrameCallback, LinkNotice};
pub use worker::TransportFactory;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::broadcast;

use self::worker::SerialWorker;
use super::interface::{LineTransport, SerialInterface};
use super::protocol::{encode, Field, Frame};
use super::{LinkError, Result};
use crate::config::LinkConfig;

pub struct LinkBuilder {
    config: LinkConfig,
    callbacks: Callbacks,
    transport: Option<TransportFactory>,
}

impl LinkBuilder {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            callbacks: Callbacks::default(),
            transport: None,
        }
    }

    pub fn on_frame(mut self, callback: impl FnMut(Frame) + Send + 'static) -> Self {
        self.callbacks.on_frame = Box::new(callback);
        self
    }

    pub fn on_event(mut self, callback: impl FnMut(String) + Send + 'static) -> Self {
        self.callbacks.on_event = Box::new(callback);
        self
    }

    /// Replace the serial port with another transport (used by tests and simulators)
    pub fn transport<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, &LinkConfig) -> Result<Box<dyn LineTransport>> + Send + Sync + 'static,
    {
        let factory: TransportFactory = Arc::new(factory);
        self.transport = Some(factory);
        self
    }

    pub fn build(self) -> Link {
        let (notices, _) = broadcast::channel(self.config.notice_capacity.max(1));
        let transport: TransportFactory = match self.transport {
            Some(factory) => factory,
            None => Arc::new(SerialInterface::open_boxed),
        };
        Link {
            config: self.config,
            shared: SharedLinkState::new(),
            notices,
            callbacks: Arc::new(Mutex::new(self.callbacks)),
            transport,
            worker: None,
            port: None,
        }
    }
}

pub struct Link {
    config: LinkConfig,
    shared: SharedLinkState,
    notices: broadcast::Sender<LinkNotice>,
    callbacks: Arc<Mutex<Callbacks>>,
    transport: TransportFactory,
    worker: Option<JoinHandle<()>>,
    port: Option<String>,
}

impl Link {
    /// Start a worker for `port`. Failure to acquire the port is reported
    /// asynchronously through the state and an `OpenFailed` notice.
    pub fn open(&mut self, port: &str) -> Result<()> {
        if self.connection_state().is_active() {
            return Err(LinkError::AlreadyOpen);
        }
        // A previous worker has already exited (Lost or Disconnected); reap it
        self.join_worker();

        log::info!("Opening link on {}", port);
        self.shared.begin_open();
        let _ = self.notices.send(LinkNotice::StateChanged(ConnectionState::Opening));

        let worker = SerialWorker {
            port: port.to_string(),
            config: self.config.clone(),
            shared: self.shared.clone(),
            notices: self.notices.clone(),
            callbacks: self.callbacks.clone(),
        };
        let factory = self.transport.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("link-{}", port))
            .spawn(move || worker.run(factory));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.port = Some(port.to_string());
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                Err(LinkError::Io(e))
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Port of the current or most recent worker
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Encode `fields` and make it the next line to send, replacing any line
    /// that has not gone out yet.
    pub fn send(&self, fields: &[Field]) -> Result<()> {
        if fields.len() != self.config.outbound_len {
            return Err(LinkError::WrongFieldCount {
                expected: self.config.outbound_len,
                actual: fields.len(),
            });
        }
        let line = encode(fields, &self.config.codec);
        self.shared.send_if_connected(line)
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send(frame.fields())
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<LinkNotice> {
        self.notices.subscribe()
    }

    /// Send the shutdown sentinel, give it time to go out, then stop and join
    /// the worker. The port is closed when this returns.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.worker.is_none() {
            return;
        }

        self.shared.set_outbound(self.config.shutdown_sentinel.clone());
        if self.shared.state() == ConnectionState::Connected {
            std::thread::sleep(self.config.shutdown_grace());
        }
        self.shared.request_quit();
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Link worker panicked");
                self.shared.set_state(ConnectionState::Lost);
            }
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop();
    }
}
