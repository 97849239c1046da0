use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::codec::{encode_envelope, LineDecoder, ProtocolConfig, DEFAULT_MAX_LINE};
use crate::envelope::{EnvelopeTracker, ProtocolEvent};
use crate::error::{FrameError, Result};

/// Output of one enveloped command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Response lines received during the exchange, joined by the terminator.
    pub result: String,
    /// Every event observed, ending with the command's own END.
    pub events: Vec<ProtocolEvent>,
}

const WRITE_RETRY_PAUSE: Duration = Duration::from_millis(5);

/// Most response lines or events kept queued before the oldest are dropped.
pub const DEFAULT_MAX_QUEUED: usize = 4096;

/// Memory bounds for one protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolLimits {
    /// Longest partial line buffered while waiting for a terminator.
    pub max_line: usize,
    /// Capacity of each of the response-line and event queues.
    pub max_queued: usize,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            max_line: DEFAULT_MAX_LINE,
            max_queued: DEFAULT_MAX_QUEUED,
        }
    }
}

#[derive(Debug)]
struct ProtocolState {
    decoder: LineDecoder,
    envelope: EnvelopeTracker,
    responses: VecDeque<String>,
    events: VecDeque<ProtocolEvent>,
    closed: bool,
}

/// Line protocol bound to one port's write half.
///
/// The port's reader pushes raw bytes in with [`LineProtocol::feed`]; callers
/// run commands with [`LineProtocol::send`], which holds the writer for the
/// whole exchange so envelopes from concurrent callers never interleave.
pub struct LineProtocol<W> {
    config: ProtocolConfig,
    max_queued: usize,
    state: Mutex<ProtocolState>,
    events_ready: Condvar,
    writer: Mutex<W>,
}

impl<W: Write> LineProtocol<W> {
    /// Create a protocol with default configuration.
    pub fn new(writer: W) -> Self {
        Self::build(writer, ProtocolConfig::default(), ProtocolLimits::default())
    }

    /// Create a protocol with explicit configuration.
    pub fn with_config(writer: W, config: ProtocolConfig) -> Result<Self> {
        Self::with_limits(writer, config, ProtocolLimits::default())
    }

    /// Create a protocol with explicit configuration and memory bounds.
    pub fn with_limits(writer: W, config: ProtocolConfig, limits: ProtocolLimits) -> Result<Self> {
        config.validate()?;
        if limits.max_line == 0 || limits.max_queued == 0 {
            return Err(FrameError::InvalidConfig(
                "line and queue limits must be greater than zero".to_string(),
            ));
        }
        Ok(Self::build(writer, config, limits))
    }

    fn build(writer: W, config: ProtocolConfig, limits: ProtocolLimits) -> Self {
        Self {
            state: Mutex::new(ProtocolState {
                decoder: LineDecoder::with_max_line(&config, limits.max_line),
                envelope: EnvelopeTracker::new(),
                responses: VecDeque::new(),
                events: VecDeque::new(),
                closed: false,
            }),
            events_ready: Condvar::new(),
            writer: Mutex::new(writer),
            max_queued: limits.max_queued,
            config,
        }
    }

    /// Push raw bytes read from the port. Never blocks on I/O.
    ///
    /// Returns the number of complete lines the bytes produced.
    pub fn feed(&self, bytes: &[u8]) -> usize {
        let mut state = self.lock_state();
        let lines = state.decoder.decode(bytes);
        let mut produced_event = false;

        for line in &lines {
            trace!(%line, "line received");
            match state.envelope.observe(line, self.config.marker) {
                Some(event) => {
                    push_bounded(&mut state.events, event, self.max_queued, "event");
                    produced_event = true;
                }
                None => {
                    push_bounded(&mut state.responses, line.clone(), self.max_queued, "line")
                }
            }
        }

        drop(state);
        if produced_event {
            self.events_ready.notify_all();
        }
        lines.len()
    }

    /// Send `command` wrapped in a `session_id` envelope and collect its output.
    ///
    /// Waits until the END event for `session_id` arrives. If `timeout`
    /// passes without any new event the exchange is abandoned with
    /// [`FrameError::Timeout`] and the open envelope is cleared, so the next
    /// command starts clean. Once [`LineProtocol::close`] has been called,
    /// pending and later sends fail with [`FrameError::ConnectionClosed`].
    pub fn send(&self, session_id: &str, command: &str, timeout: Duration) -> Result<BatchResponse> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(FrameError::ConnectionClosed);
            }
            let stale = state.responses.len() + state.events.len();
            state.decoder.clear();
            state.envelope.reset();
            state.responses.clear();
            state.events.clear();
            if stale > 0 {
                debug!(stale, "discarded unsolicited output before send");
            }
        }

        let mut wire = BytesMut::new();
        encode_envelope(&self.config, session_id, command, &mut wire);
        write_all(&mut *writer, &wire, timeout)?;
        debug!(session = session_id, bytes = wire.len(), "envelope written");

        let mut events = Vec::new();
        let mut state = self.lock_state();
        loop {
            let deadline = Instant::now() + timeout;
            while state.events.is_empty() {
                if state.closed {
                    state.envelope.reset();
                    debug!(session = session_id, "port closed during exchange");
                    return Err(FrameError::ConnectionClosed);
                }
                let now = Instant::now();
                if now >= deadline {
                    state.envelope.reset();
                    warn!(session = session_id, ?timeout, "no response from device");
                    return Err(FrameError::Timeout(timeout));
                }
                let (guard, _) = self
                    .events_ready
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            }

            if let Some(event) = state.events.pop_front() {
                let done = event.is_end_of(session_id);
                events.push(event);
                if done {
                    break;
                }
            }
        }

        let lines: Vec<String> = state.responses.drain(..).collect();
        Ok(BatchResponse {
            result: lines.join(&self.config.terminator),
            events,
        })
    }

    /// Mark the port gone and wake any exchange waiting on it.
    ///
    /// Events already queued are still delivered to a waiting send.
    pub fn close(&self) {
        self.lock_state().closed = true;
        self.events_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Drain response lines queued since the last send or drain.
    pub fn take_responses(&self) -> Vec<String> {
        self.lock_state().responses.drain(..).collect()
    }

    /// Drain events queued since the last send or drain.
    pub fn take_events(&self) -> Vec<ProtocolEvent> {
        self.lock_state().events.drain(..).collect()
    }

    /// Id of the batch the device currently has open.
    pub fn open_session(&self) -> Option<String> {
        self.lock_state().envelope.open_session().map(str::to_string)
    }

    /// Current protocol configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, ProtocolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize, what: &'static str) {
    if queue.len() >= cap {
        queue.pop_front();
        debug!(cap, what, "queue full, dropped oldest entry");
    }
    queue.push_back(item);
}

/// Write the whole buffer, retrying stalled writes until `timeout` passes.
fn write_all<W: Write>(writer: &mut W, buf: &[u8], timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let stalled = |err: &std::io::Error| {
        matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    };

    let mut offset = 0usize;
    while offset < buf.len() {
        match writer.write(&buf[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if stalled(&err) && Instant::now() < deadline => {
                trace!(written = offset, "write stalled, retrying");
                thread::sleep(WRITE_RETRY_PAUSE);
            }
            Err(err) if stalled(&err) => return Err(FrameError::Timeout(timeout)),
            Err(err) => return Err(FrameError::Io(err)),
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if stalled(&err) && Instant::now() < deadline => {
                thread::sleep(WRITE_RETRY_PAUSE);
            }
            Err(err) if stalled(&err) => return Err(FrameError::Timeout(timeout)),
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
