use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialhub_frame::{BatchResponse, LineProtocol, ProtocolConfig};
use serialhub_transport::{PortAttributes, PortInfo, PortOpener, PortStream, SystemPorts};
use tracing::{debug, info};

use crate::error::{PortError, Result};
use crate::session::{PortSession, SessionConfig};

/// Snapshot of one attached port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedPort {
    pub comport: String,
    pub alive: bool,
    pub attributes: PortAttributes,
    pub protocol: ProtocolConfig,
}

/// Owns every open port session on a device, keyed by path.
pub struct PortManager<O: PortOpener = SystemPorts> {
    opener: O,
    config: SessionConfig,
    sessions: Mutex<HashMap<String, PortSession>>,
}

impl PortManager<SystemPorts> {
    /// Manager over the host's real serial ports.
    pub fn new() -> Self {
        Self::with_opener(SystemPorts)
    }
}

impl Default for PortManager<SystemPorts> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: PortOpener> PortManager<O> {
    pub fn with_opener(opener: O) -> Self {
        Self::with_config(opener, SessionConfig::default())
    }

    pub fn with_config(opener: O, config: SessionConfig) -> Self {
        Self {
            opener,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Ports visible to the host.
    pub fn list_available(&self) -> Result<Vec<PortInfo>> {
        Ok(self.opener.available()?)
    }

    /// Every open session, ordered by path.
    pub fn list_attached(&self) -> Vec<AttachedPort> {
        let sessions = self.lock();
        let mut attached: Vec<_> = sessions
            .values()
            .map(|session| AttachedPort {
                comport: session.path().to_string(),
                alive: session.is_alive(),
                attributes: session.attributes().clone(),
                protocol: session.protocol().config().clone(),
            })
            .collect();
        attached.sort_by(|a, b| a.comport.cmp(&b.comport));
        attached
    }

    pub fn is_attached(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    /// True while `path` is open and its reader is running.
    pub fn is_alive(&self, path: &str) -> bool {
        self.lock().get(path).is_some_and(PortSession::is_alive)
    }

    /// Line protocol of an open session, for callers that watch unsolicited
    /// output.
    pub fn protocol(&self, path: &str) -> Option<Arc<LineProtocol<PortStream>>> {
        self.lock()
            .get(path)
            .map(|session| Arc::clone(session.protocol()))
    }

    /// Open `path` and start its reader. An existing session on the same
    /// path is closed first.
    pub fn connect(
        &self,
        path: &str,
        attributes: PortAttributes,
        protocol: ProtocolConfig,
    ) -> Result<()> {
        attributes.validate()?;
        protocol.validate()?;

        let displaced = self.lock().remove(path);
        if let Some(previous) = displaced {
            info!(%path, "replacing existing port session");
            previous.close();
        }

        let stream = self.opener.open(path, &attributes)?;
        debug!(%path, transport = stream.transport_name(), "port opened");
        let session = PortSession::start(path, attributes, protocol, stream, &self.config)?;

        let raced = self.lock().insert(path.to_string(), session);
        if let Some(raced) = raced {
            raced.close();
        }
        Ok(())
    }

    /// Stop the reader on `path` and release the port.
    pub fn close(&self, path: &str) -> Result<()> {
        let session = self
            .lock()
            .remove(path)
            .ok_or_else(|| PortError::NotAttached(path.to_string()))?;
        session.close();
        Ok(())
    }

    /// Close every open session.
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.lock().drain().map(|(_, session)| session).collect();
        for session in sessions {
            session.close();
        }
    }

    /// Run one enveloped command on `path`.
    ///
    /// The port table lock is released before the command is written, so a
    /// slow device only blocks callers of the same port.
    pub fn dispatch(
        &self,
        path: &str,
        session_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<BatchResponse> {
        let protocol = {
            let sessions = self.lock();
            match sessions.get(path) {
                Some(session) if session.is_alive() => Arc::clone(session.protocol()),
                _ => return Err(PortError::ConnectionDead(path.to_string())),
            }
        };
        debug!(%path, session = session_id, "dispatching command");
        Ok(protocol.send(session_id, command, timeout)?)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PortSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::thread;

    use serialhub_frame::FrameError;
    use serialhub_transport::TransportError;

    use super::*;

    /// Hands out socket pairs instead of real devices and keeps the device
    /// ends for the test to drive.
    #[derive(Default)]
    pub(crate) struct PairOpener {
        pub(crate) devices: Mutex<Vec<(String, UnixStream)>>,
    }

    impl PairOpener {
        pub(crate) fn take_device(&self, path: &str) -> UnixStream {
            let mut devices = self.devices.lock().unwrap();
            let idx = devices.iter().rposition(|(p, _)| p == path).unwrap();
            devices.remove(idx).1
        }
    }

    impl PortOpener for PairOpener {
        fn available(&self) -> serialhub_transport::Result<Vec<PortInfo>> {
            Ok(vec![PortInfo {
                device: "/dev/fake0".to_string(),
                port_type: "unknown".to_string(),
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            }])
        }

        fn open(
            &self,
            path: &str,
            _attributes: &PortAttributes,
        ) -> serialhub_transport::Result<PortStream> {
            if path.contains("missing") {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such device",
                )));
            }
            let (host, device) = UnixStream::pair()?;
            self.devices
                .lock()
                .unwrap()
                .push((path.to_string(), device));
            Ok(PortStream::from_unix(host))
        }
    }

    pub(crate) fn fast_manager() -> PortManager<PairOpener> {
        PortManager::with_config(
            PairOpener::default(),
            SessionConfig {
                poll_interval: Duration::from_millis(10),
                read_chunk: 64,
                ..SessionConfig::default()
            },
        )
    }

    /// Device that answers every envelope with the given body lines.
    pub(crate) fn spawn_device(device: UnixStream, body: &'static str) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut reader = BufReader::new(device.try_clone().unwrap());
            let mut writer = device;
            loop {
                let mut begin = String::new();
                if reader.read_line(&mut begin).unwrap_or(0) == 0 {
                    return;
                }
                let mut skip = String::new();
                reader.read_line(&mut skip).unwrap();
                skip.clear();
                reader.read_line(&mut skip).unwrap();
                let id = begin.trim_end().trim_start_matches("!BEGIN ").to_string();
                let reply = format!("!BEGIN {id}\n{body}\n!END {id}\n");
                if writer.write_all(reply.as_bytes()).is_err() {
                    return;
                }
            }
        })
    }

    #[test]
    fn connect_dispatch_close() {
        let manager = fast_manager();
        manager
            .connect("/dev/fake0", PortAttributes::default(), ProtocolConfig::default())
            .unwrap();
        let device = spawn_device(manager.opener.take_device("/dev/fake0"), "OK");

        let response = manager
            .dispatch("/dev/fake0", "s1", "STATUS", Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.result, "OK");
        assert_eq!(response.events.len(), 2);

        manager.close("/dev/fake0").unwrap();
        assert!(manager.list_attached().is_empty());
        device.join().unwrap();
    }

    #[test]
    fn connect_twice_keeps_one_session() {
        let manager = fast_manager();
        manager
            .connect("/dev/fake0", PortAttributes::default(), ProtocolConfig::default())
            .unwrap();
        let first = manager.opener.take_device("/dev/fake0");
        manager
            .connect(
                "/dev/fake0",
                PortAttributes::with_baudrate(115200),
                ProtocolConfig::default(),
            )
            .unwrap();

        let attached = manager.list_attached();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].comport, "/dev/fake0");
        assert_eq!(attached[0].attributes.baudrate, 115200);
        assert!(attached[0].alive);

        // The displaced session released its port before the new one opened.
        first
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!((&first).read(&mut buf).unwrap(), 0);
        assert_eq!(manager.opener.devices.lock().unwrap().len(), 1);
    }

    #[test]
    fn close_during_dispatch_fails_it_and_releases_port() {
        let manager = Arc::new(fast_manager());
        manager
            .connect("/dev/fake0", PortAttributes::default(), ProtocolConfig::default())
            .unwrap();
        let device = manager.opener.take_device("/dev/fake0");

        let in_flight = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let started = std::time::Instant::now();
                let result = manager.dispatch("/dev/fake0", "s1", "SLOW", Duration::from_secs(10));
                (result, started.elapsed())
            })
        };

        let mut reader = BufReader::new(device.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "!BEGIN s1\n");

        manager.close("/dev/fake0").unwrap();
        let (result, elapsed) = in_flight.join().unwrap();
        assert!(matches!(
            result,
            Err(PortError::Frame(FrameError::ConnectionClosed))
        ));
        assert!(elapsed < Duration::from_secs(2));

        device
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut rest = Vec::new();
        assert!(reader.read_to_end(&mut rest).is_ok());
        assert_eq!(rest, b"SLOW\n!END s1\n");
    }

    #[test]
    fn list_attached_is_sorted() {
        let manager = fast_manager();
        for path in ["/dev/fake2", "/dev/fake0", "/dev/fake1"] {
            manager
                .connect(path, PortAttributes::default(), ProtocolConfig::default())
                .unwrap();
        }
        let paths: Vec<_> = manager
            .list_attached()
            .into_iter()
            .map(|port| port.comport)
            .collect();
        assert_eq!(paths, vec!["/dev/fake0", "/dev/fake1", "/dev/fake2"]);

        manager.close_all();
        assert!(manager.list_attached().is_empty());
    }

    #[test]
    fn close_unknown_path_is_not_attached() {
        let manager = fast_manager();
        let err = manager.close("/dev/nothing").unwrap_err();
        assert_eq!(err.to_string(), "/dev/nothing not attached");
    }

    #[test]
    fn dispatch_unknown_path_is_connection_dead() {
        let manager = fast_manager();
        let err = manager
            .dispatch("/dev/nothing", "s1", "X", Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err.to_string(), "/dev/nothing connection dead");
    }

    #[test]
    fn dispatch_after_device_hangup_is_connection_dead() {
        let manager = fast_manager();
        manager
            .connect("/dev/fake0", PortAttributes::default(), ProtocolConfig::default())
            .unwrap();
        drop(manager.opener.take_device("/dev/fake0"));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while manager.list_attached()[0].alive && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let err = manager
            .dispatch("/dev/fake0", "s1", "X", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, PortError::ConnectionDead(_)));
    }

    #[test]
    fn dispatch_timeout_keeps_session_usable() {
        let manager = fast_manager();
        manager
            .connect("/dev/fake0", PortAttributes::default(), ProtocolConfig::default())
            .unwrap();
        let device = manager.opener.take_device("/dev/fake0");

        let err = manager
            .dispatch("/dev/fake0", "s1", "STATUS", Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, PortError::Frame(FrameError::Timeout(_))));
        assert!(manager.is_attached("/dev/fake0"));

        // Drain the unanswered envelope before the device starts replying.
        let mut reader = BufReader::new(device.try_clone().unwrap());
        let mut line = String::new();
        for _ in 0..3 {
            line.clear();
            reader.read_line(&mut line).unwrap();
        }
        let responder = spawn_device(device, "READY");
        let response = manager
            .dispatch("/dev/fake0", "s2", "STATUS", Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.result, "READY");

        manager.close_all();
        responder.join().unwrap();
    }

    #[test]
    fn connect_failure_leaves_no_session() {
        let manager = fast_manager();
        let err = manager
            .connect("/dev/missing", PortAttributes::default(), ProtocolConfig::default())
            .unwrap_err();
        assert!(matches!(err, PortError::Transport(_)));
        assert!(!manager.is_attached("/dev/missing"));
    }

    #[test]
    fn connect_rejects_bad_attributes_before_opening() {
        let manager = fast_manager();
        let attributes = PortAttributes {
            bytesize: 4,
            ..PortAttributes::default()
        };
        assert!(manager
            .connect("/dev/fake0", attributes, ProtocolConfig::default())
            .is_err());
        assert!(manager.opener.devices.lock().unwrap().is_empty());
    }
}
