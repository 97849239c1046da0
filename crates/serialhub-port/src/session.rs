use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serialhub_frame::{LineProtocol, ProtocolConfig, ProtocolLimits};
use serialhub_transport::{PortAttributes, PortStream};
use tracing::{debug, info, warn};

use crate::error::{PortError, Result};

/// Reader thread settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long one read may block before the stop flag is checked again.
    pub poll_interval: Duration,
    /// Size of the read buffer.
    pub read_chunk: usize,
    /// How long one write may stall, e.g. under flow control.
    pub write_timeout: Duration,
    /// Line and queue bounds for the port's protocol.
    pub limits: ProtocolLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            read_chunk: 1024,
            write_timeout: Duration::from_secs(5),
            limits: ProtocolLimits::default(),
        }
    }
}

/// One open serial port: a reader thread feeding a line protocol.
///
/// Dropping the session stops the reader and fails any in-flight command, so
/// the port is released as soon as that command returns.
pub struct PortSession {
    path: String,
    attributes: PortAttributes,
    protocol: Arc<LineProtocol<PortStream>>,
    alive: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl PortSession {
    /// Start a session over an already opened stream.
    pub fn start(
        path: &str,
        attributes: PortAttributes,
        protocol_config: ProtocolConfig,
        mut stream: PortStream,
        config: &SessionConfig,
    ) -> Result<Self> {
        let mut reader_stream = stream.try_clone()?;
        reader_stream.set_read_timeout(config.poll_interval)?;
        stream.set_write_timeout(config.write_timeout)?;
        let protocol = Arc::new(LineProtocol::with_limits(
            stream,
            protocol_config,
            config.limits,
        )?);

        let alive = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let thread_path = path.to_string();
            let protocol = Arc::clone(&protocol);
            let alive = Arc::clone(&alive);
            let stop = Arc::clone(&stop);
            let chunk = config.read_chunk.max(1);
            thread::Builder::new()
                .name(format!("serialhub-reader:{path}"))
                .spawn(move || {
                    read_loop(&thread_path, reader_stream, &protocol, &alive, &stop, chunk)
                })
                .map_err(|source| PortError::Spawn {
                    path: path.to_string(),
                    source,
                })?
        };

        info!(%path, "port session started");
        Ok(Self {
            path: path.to_string(),
            attributes,
            protocol,
            alive,
            stop,
            reader: Some(reader),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attributes(&self) -> &PortAttributes {
        &self.attributes
    }

    pub fn protocol(&self) -> &Arc<LineProtocol<PortStream>> {
        &self.protocol
    }

    /// False once the reader has hit end of stream or a hard read error.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Stop the reader and release the port.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.protocol.close();
        if reader.join().is_err() {
            warn!(path = %self.path, "reader thread panicked");
        }
        self.alive.store(false, Ordering::Release);
        info!(path = %self.path, "port session closed");
    }
}

impl Drop for PortSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("path", &self.path)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn read_loop(
    path: &str,
    mut stream: PortStream,
    protocol: &LineProtocol<PortStream>,
    alive: &AtomicBool,
    stop: &AtomicBool,
    chunk: usize,
) {
    let mut buf = vec![0u8; chunk];
    while !stop.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => {
                warn!(%path, "port closed by peer");
                break;
            }
            Ok(n) => {
                protocol.feed(&buf[..n]);
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(err) => {
                warn!(%path, error = %err, "port read failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
    protocol.close();
    debug!(%path, "reader stopped");
}
