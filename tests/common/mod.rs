//! Scripted in-memory device for driving a link without hardware

#![allow(dead_code)] // Not every helper is used by every test file

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thermolink_lib::serial::{LineTransport, LinkError};
use thermolink_lib::{LinkConfig, LinkNotice, OnBadToken};

/// What the simulated device does next
pub enum Script {
    Line(String),
    /// Fail the next read as if the cable was pulled
    Unplug(String),
    /// Report the next read as timed out through the error path
    Timeout,
}

/// Shared view of the simulated device, kept by the test
#[derive(Clone)]
pub struct DeviceSim {
    tx: Sender<Script>,
    rx: Arc<Mutex<Option<Receiver<Script>>>>,
    pub written: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
    pub opens: Arc<AtomicUsize>,
    pub fail_writes: Arc<AtomicBool>,
}

impl DeviceSim {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            written: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn send_line(&self, line: &str) {
        // The link may already be gone; that is what some tests check
        let _ = self.tx.send(Script::Line(line.to_string()));
    }

    pub fn unplug(&self, reason: &str) {
        let _ = self.tx.send(Script::Unplug(reason.to_string()));
    }

    pub fn time_out_once(&self) {
        let _ = self.tx.send(Script::Timeout);
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    /// Transport factory for `LinkBuilder::transport`. The device can be opened
    /// once; later opens fail like a port that is still held elsewhere.
    pub fn factory(&self) -> impl Fn(&str, &LinkConfig) -> Result<Box<dyn LineTransport>, LinkError> + Send + Sync + 'static {
        let sim = self.clone();
        move |port: &str, _config: &LinkConfig| {
            sim.opens.fetch_add(1, Ordering::SeqCst);
            let Some(rx) = sim.rx.lock().unwrap().take() else {
                return Err(LinkError::OpenFailed {
                    port: port.to_string(),
                    reason: "port busy".to_string(),
                });
            };
            Ok(Box::new(ScriptedTransport {
                rx,
                written: sim.written.clone(),
                closed: sim.closed.clone(),
                fail_writes: sim.fail_writes.clone(),
            }) as Box<dyn LineTransport>)
        }
    }
}

struct ScriptedTransport {
    rx: Receiver<Script>,
    written: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl LineTransport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::WriteFailed("simulated write failure".to_string()));
        }
        self.written.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Script::Line(line)) => Ok(Some(line)),
            Ok(Script::Unplug(reason)) => Err(LinkError::Disconnected(reason)),
            Ok(Script::Timeout) => Err(LinkError::ReadTimeout),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// v1 layout with short timeouts so tests run quickly
pub fn fast_config(on_bad_token: OnBadToken) -> LinkConfig {
    let mut config = LinkConfig::v1(on_bad_token);
    config.read_timeout_ms = 20;
    config.shutdown_grace_ms = 100;
    config
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn drain_notices(rx: &mut tokio::sync::broadcast::Receiver<LinkNotice>) -> Vec<LinkNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}
