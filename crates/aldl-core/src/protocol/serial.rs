//! Serial port handling
//!
//! Host-side serial transport for ALDL cables (usually FTDI or CH340 USB
//! adapters).

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Write};
use tracing::{debug, warn};

use super::transport::{read_available, OpenOptions, Transport, TransportProvider};
use super::ConnectionConfig;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key putting USB serial adapters first:
///  - ttyUSB* (sorted numerically), where FTDI/CH340 ALDL cables show up
///  - then ttyACM* (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: pick up /dev/ttyUSB* and /dev/ttyACM* the enumerator missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open `name` at `baud_rate`, 8N1, with reads bounded by the configured timeout
pub fn open_port(config: &ConnectionConfig, baud_rate: u32) -> io::Result<Box<dyn SerialPort>> {
    let port = serialport::new(&config.port_name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(config.read_timeout)
        .open()?;

    // Stale bytes from a previous session would be read as the first response
    if let Err(e) = port.clear(serialport::ClearBuffer::All) {
        warn!(port = %config.port_name, "failed to clear buffers: {e} (continuing)");
    }
    debug!(port = %config.port_name, baud_rate, "serial port opened");
    Ok(port)
}

/// Serial port transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    buf_len: usize,
}

impl SerialTransport {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>, buf_len: usize) -> Self {
        Self { port, buf_len }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read(&mut self) -> io::Result<Vec<u8>> {
        read_available(&mut self.port, self.buf_len)
    }
}

/// Opens [`SerialTransport`]s on the configured port
#[derive(Debug, Clone)]
pub struct SerialProvider {
    config: ConnectionConfig,
}

impl SerialProvider {
    /// Provider for `config.port_name`
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl TransportProvider for SerialProvider {
    fn open(&mut self, options: &OpenOptions) -> io::Result<Box<dyn Transport>> {
        let port = open_port(&self.config, options.baud_rate)?;
        Ok(Box::new(SerialTransport::new(port, self.config.read_buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyUSB10",
        ];
        names.sort_by_key(|n| port_sort_key(n));

        assert_eq!(
            names,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = ConnectionConfig {
            port_name: "/dev/does-not-exist-aldl".into(),
            ..ConnectionConfig::default()
        };
        let mut provider = SerialProvider::new(config);
        assert!(provider.open(&OpenOptions::default()).is_err());
    }
}
