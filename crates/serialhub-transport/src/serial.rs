use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, SerialPortType, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{PortOpener, PortStream};

/// Default line speed when a connect request does not name one.
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// Prefix for raw TCP serial bridges (`socket://host:port`).
pub const SOCKET_URL_PREFIX: &str = "socket://";

/// Read timeout applied when a port is first opened.
const OPEN_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Parity setting, spelled the pyserial way on the wire (`"N"`, `"E"`, `"O"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N", alias = "none")]
    None,
    #[serde(rename = "E", alias = "even")]
    Even,
    #[serde(rename = "O", alias = "odd")]
    Odd,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Line attributes for a serial port.
///
/// Missing keys take their defaults (9600 8N1, no flow control); unknown
/// keys are rejected so a typo never silently opens a port at the wrong speed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortAttributes {
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: Parity,
    pub stopbits: u8,
    pub xonxoff: bool,
    pub rtscts: bool,
}

impl Default for PortAttributes {
    fn default() -> Self {
        Self {
            baudrate: DEFAULT_BAUDRATE,
            bytesize: 8,
            parity: Parity::None,
            stopbits: 1,
            xonxoff: false,
            rtscts: false,
        }
    }
}

impl PortAttributes {
    /// Attributes with the given speed and defaults elsewhere.
    pub fn with_baudrate(baudrate: u32) -> Self {
        Self {
            baudrate,
            ..Self::default()
        }
    }

    /// Check that the attributes map onto a real line configuration.
    pub fn validate(&self) -> Result<()> {
        if self.baudrate == 0 {
            return Err(TransportError::InvalidAttributes(
                "baudrate must be greater than zero".to_string(),
            ));
        }
        data_bits(self.bytesize)?;
        stop_bits(self.stopbits)?;
        flow_control(self.xonxoff, self.rtscts)?;
        Ok(())
    }
}

fn data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(TransportError::InvalidAttributes(format!(
            "bytesize must be 5-8 (got {other})"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(TransportError::InvalidAttributes(format!(
            "stopbits must be 1 or 2 (got {other})"
        ))),
    }
}

fn flow_control(xonxoff: bool, rtscts: bool) -> Result<FlowControl> {
    match (xonxoff, rtscts) {
        (false, false) => Ok(FlowControl::None),
        (true, false) => Ok(FlowControl::Software),
        (false, true) => Ok(FlowControl::Hardware),
        (true, true) => Err(TransportError::InvalidAttributes(
            "xonxoff and rtscts are mutually exclusive".to_string(),
        )),
    }
}

/// A port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub device: String,
    pub port_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut out = PortInfo {
            device: info.port_name,
            port_type: "unknown".to_string(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        };
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                out.port_type = "usb".to_string();
                out.vid = Some(usb.vid);
                out.pid = Some(usb.pid);
                out.serial_number = usb.serial_number;
                out.manufacturer = usb.manufacturer;
                out.product = usb.product;
            }
            SerialPortType::PciPort => out.port_type = "pci".to_string(),
            SerialPortType::BluetoothPort => out.port_type = "bluetooth".to_string(),
            SerialPortType::Unknown => {}
        }
        out
    }
}

/// Enumerate serial ports visible to the host.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(TransportError::Enumerate)?;
    debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Open a serial device path or a `socket://host:port` bridge.
pub fn open_port(path: &str, attributes: &PortAttributes) -> Result<PortStream> {
    attributes.validate()?;

    if let Some(addr) = path.strip_prefix(SOCKET_URL_PREFIX) {
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        info!(%addr, "connected to serial bridge");
        return Ok(PortStream::from_tcp(stream));
    }

    let port = serialport::new(path, attributes.baudrate)
        .data_bits(data_bits(attributes.bytesize)?)
        .parity(attributes.parity.into())
        .stop_bits(stop_bits(attributes.stopbits)?)
        .flow_control(flow_control(attributes.xonxoff, attributes.rtscts)?)
        .timeout(OPEN_READ_TIMEOUT)
        .open()
        .map_err(|source| TransportError::Open {
            path: path.to_string(),
            source,
        })?;
    info!(%path, baudrate = attributes.baudrate, "opened serial port");
    Ok(PortStream::from_serial(port))
}

/// The host's real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn available(&self) -> Result<Vec<PortInfo>> {
        available_ports()
    }

    fn open(&self, path: &str, attributes: &PortAttributes) -> Result<PortStream> {
        open_port(path, attributes)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn attributes_fill_defaults() {
        let attrs: PortAttributes = serde_json::from_str(r#"{"baudrate": 115200}"#).unwrap();
        assert_eq!(attrs.baudrate, 115200);
        assert_eq!(attrs.bytesize, 8);
        assert_eq!(attrs.parity, Parity::None);
        assert_eq!(attrs.stopbits, 1);
        assert!(!attrs.xonxoff && !attrs.rtscts);
    }

    #[test]
    fn attributes_reject_unknown_keys() {
        let err = serde_json::from_str::<PortAttributes>(r#"{"baud": 9600}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn parity_accepts_pyserial_and_long_names() {
        let short: PortAttributes = serde_json::from_str(r#"{"parity": "E"}"#).unwrap();
        let long: PortAttributes = serde_json::from_str(r#"{"parity": "odd"}"#).unwrap();
        assert_eq!(short.parity, Parity::Even);
        assert_eq!(long.parity, Parity::Odd);
        assert_eq!(serde_json::to_value(Parity::None).unwrap(), "N");
    }

    #[test]
    fn validate_rejects_unrepresentable_lines() {
        let bad_size = PortAttributes {
            bytesize: 9,
            ..PortAttributes::default()
        };
        let bad_stop = PortAttributes {
            stopbits: 3,
            ..PortAttributes::default()
        };
        let both_flows = PortAttributes {
            xonxoff: true,
            rtscts: true,
            ..PortAttributes::default()
        };
        for attrs in [bad_size, bad_stop, both_flows, PortAttributes::with_baudrate(0)] {
            assert!(matches!(
                attrs.validate(),
                Err(TransportError::InvalidAttributes(_))
            ));
        }
        assert!(PortAttributes::default().validate().is_ok());
    }

    #[test]
    fn flow_control_mapping() {
        assert!(matches!(flow_control(false, false), Ok(FlowControl::None)));
        assert!(matches!(flow_control(true, false), Ok(FlowControl::Software)));
        assert!(matches!(flow_control(false, true), Ok(FlowControl::Hardware)));
    }

    #[test]
    fn usb_port_info_conversion() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: Some("A1".to_string()),
                manufacturer: Some("FTDI".to_string()),
                product: None,
            }),
        };
        let port = PortInfo::from(info);
        assert_eq!(port.device, "/dev/ttyUSB0");
        assert_eq!(port.port_type, "usb");
        assert_eq!(port.vid, Some(0x0403));
        assert_eq!(port.manufacturer.as_deref(), Some("FTDI"));

        let json = serde_json::to_value(&port).unwrap();
        assert!(json.get("product").is_none());
    }

    #[test]
    fn open_socket_url_connects_to_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 3];
            conn.read_exact(&mut buf).unwrap();
            buf
        });

        let mut stream =
            open_port(&format!("socket://{addr}"), &PortAttributes::default()).unwrap();
        assert_eq!(stream.transport_name(), "tcp");
        stream.write_all(b"hi\n").unwrap();

        assert_eq!(&server.join().unwrap(), b"hi\n");
    }

    #[test]
    fn open_missing_device_fails() {
        let err = open_port("/dev/serialhub-does-not-exist", &PortAttributes::default())
            .unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn open_validates_before_touching_device() {
        let attrs = PortAttributes {
            stopbits: 0,
            ..PortAttributes::default()
        };
        let err = open_port("/dev/serialhub-does-not-exist", &attrs).unwrap_err();
        assert!(matches!(err, TransportError::InvalidAttributes(_)));
    }
}
