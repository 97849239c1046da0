use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::serial::{PortAttributes, PortInfo};

/// A connected serial byte stream, readable and writable.
///
/// This is the fundamental I/O type returned by transport operations.
/// Reads honour the timeout set with [`PortStream::set_read_timeout`] and
/// report an idle line as `TimedOut` or `WouldBlock`.
pub struct PortStream {
    inner: PortStreamInner,
}

enum PortStreamInner {
    Serial(Box<dyn serialport::SerialPort>),
    Tcp(std::net::TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for PortStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            PortStreamInner::Serial(port) => port.read(buf),
            PortStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            PortStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for PortStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            PortStreamInner::Serial(port) => port.write(buf),
            PortStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            PortStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            PortStreamInner::Serial(port) => port.flush(),
            PortStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            PortStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl PortStream {
    /// Wrap an opened serial device.
    pub fn from_serial(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: PortStreamInner::Serial(port),
        }
    }

    /// Wrap a connected TCP serial bridge.
    pub fn from_tcp(stream: std::net::TcpStream) -> Self {
        Self {
            inner: PortStreamInner::Tcp(stream),
        }
    }

    /// Wrap one end of a Unix socket pair.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: PortStreamInner::Unix(stream),
        }
    }

    /// Set the read timeout on the underlying stream.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            PortStreamInner::Serial(port) => port
                .set_timeout(timeout)
                .map_err(|err| std::io::Error::from(err).into()),
            PortStreamInner::Tcp(stream) => {
                stream.set_read_timeout(Some(timeout)).map_err(Into::into)
            }
            #[cfg(unix)]
            PortStreamInner::Unix(stream) => {
                stream.set_read_timeout(Some(timeout)).map_err(Into::into)
            }
        }
    }

    /// Set the write timeout on the underlying stream.
    ///
    /// A serial handle has a single timeout covering reads and writes, so
    /// call this on the handle that only writes.
    pub fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            PortStreamInner::Serial(port) => port
                .set_timeout(timeout)
                .map_err(|err| std::io::Error::from(err).into()),
            PortStreamInner::Tcp(stream) => {
                stream.set_write_timeout(Some(timeout)).map_err(Into::into)
            }
            #[cfg(unix)]
            PortStreamInner::Unix(stream) => {
                stream.set_write_timeout(Some(timeout)).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (creates a new handle to the same port).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            PortStreamInner::Serial(port) => {
                PortStreamInner::Serial(port.try_clone().map_err(std::io::Error::from)?)
            }
            PortStreamInner::Tcp(stream) => PortStreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            PortStreamInner::Unix(stream) => PortStreamInner::Unix(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            PortStreamInner::Serial(_) => "serial",
            PortStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            PortStreamInner::Unix(_) => "unix",
        }
    }
}

impl std::fmt::Debug for PortStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

/// Host-side access to serial ports.
///
/// The port manager opens every session through this seam so tests and
/// simulators can hand out socket pairs instead of real devices.
pub trait PortOpener: Send + Sync {
    /// Enumerate ports visible to the host.
    fn available(&self) -> Result<Vec<PortInfo>>;

    /// Open `path` with the given line attributes.
    fn open(&self, path: &str, attributes: &PortAttributes) -> Result<PortStream>;
}
