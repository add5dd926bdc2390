pub mod port_monitor;

pub use port_monitor::{watch_ports, PortEvent, PortWatcher};

use crate::serial::{Result, SerialDeviceInfo, SerialInterface};

/// List the serial ports currently present
pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
    let ports = SerialInterface::discover_ports()?;
    log::debug!("Found {} serial ports", ports.len());
    Ok(ports)
}
