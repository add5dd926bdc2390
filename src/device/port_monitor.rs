use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::serial::{Result, SerialDeviceInfo, SerialInterface};

/// Events emitted by the port watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A serial port was added
    PortAdded(String),
    /// A serial port was removed
    PortRemoved(String),
}

type PortLister = Box<dyn FnMut() -> Result<Vec<SerialDeviceInfo>> + Send>;

/// Detects serial ports appearing and disappearing by diffing successive
/// listings. Drives the caller's poll-and-reopen policy; it never opens a port.
pub struct PortWatcher {
    known: BTreeSet<String>,
    list: PortLister,
}

impl PortWatcher {
    pub fn new() -> Self {
        Self::with_lister(SerialInterface::discover_ports)
    }

    pub fn with_lister(list: impl FnMut() -> Result<Vec<SerialDeviceInfo>> + Send + 'static) -> Self {
        Self {
            known: BTreeSet::new(),
            list: Box::new(list),
        }
    }

    /// List ports once and report what changed since the previous call.
    /// The first call reports every present port as added.
    pub fn poll(&mut self) -> Result<Vec<PortEvent>> {
        let current: BTreeSet<String> = (self.list)()?.into_iter().map(|info| info.port_name).collect();

        let mut events: Vec<PortEvent> = self
            .known
            .difference(&current)
            .map(|name| PortEvent::PortRemoved(name.clone()))
            .collect();
        events.extend(current.difference(&self.known).map(|name| PortEvent::PortAdded(name.clone())));

        for event in &events {
            log::debug!("Port event: {:?}", event);
        }
        self.known = current;
        Ok(events)
    }

    /// Ports seen by the last poll, in name order
    pub fn known_ports(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }
}

impl Default for PortWatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `watcher` every `interval` on the tokio runtime and forward changes.
/// The task ends when the receiver is dropped.
pub fn watch_ports(mut watcher: PortWatcher, interval: Duration) -> mpsc::Receiver<PortEvent> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let events = match watcher.poll() {
                Ok(events) => events,
                Err(e) => {
                    log::warn!("Failed to list serial ports: {}", e);
                    continue;
                }
            };
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn port(name: &str) -> SerialDeviceInfo {
        SerialDeviceInfo {
            port_name: name.to_string(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    fn scripted(listings: Vec<Vec<&'static str>>) -> PortWatcher {
        let mut listings: VecDeque<Vec<&'static str>> = listings.into();
        PortWatcher::with_lister(move || {
            let names = listings.pop_front().unwrap_or_default();
            Ok(names.into_iter().map(port).collect())
        })
    }

    #[test]
    fn test_poll_reports_changes() {
        let mut watcher = scripted(vec![
            vec!["COM3"],
            vec!["COM3", "COM4"],
            vec!["COM4"],
            vec!["COM4"],
        ]);
        assert_eq!(watcher.poll().unwrap(), vec![PortEvent::PortAdded("COM3".into())]);
        assert_eq!(watcher.poll().unwrap(), vec![PortEvent::PortAdded("COM4".into())]);
        assert_eq!(watcher.poll().unwrap(), vec![PortEvent::PortRemoved("COM3".into())]);
        assert!(watcher.poll().unwrap().is_empty());
        assert_eq!(watcher.known_ports().collect::<Vec<_>>(), vec!["COM4"]);
    }

    #[tokio::test]
    async fn test_watch_ports_forwards_events() {
        let watcher = scripted(vec![vec![], vec!["/dev/ttyACM0"]]);
        let mut rx = watch_ports(watcher, Duration::from_millis(5));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event, Some(PortEvent::PortAdded("/dev/ttyACM0".into())));
    }
}
