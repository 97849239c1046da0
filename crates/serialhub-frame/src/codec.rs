use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FrameError, Result};
use crate::marker::{BEGIN_KEYWORD, END_KEYWORD};

/// Default prefix for envelope control lines.
pub const DEFAULT_MARKER: char = '!';

/// Default line terminator.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Longest partial line kept while waiting for a terminator.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Text encoding used on the serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// 7-bit ASCII. Outgoing non-ASCII characters become `?`, incoming
    /// high bytes become U+FFFD.
    #[default]
    #[serde(rename = "ascii")]
    Ascii,
    /// UTF-8, decoded lossily.
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
}

impl Encoding {
    /// Decode one complete line.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Encode text onto the wire buffer.
    pub fn encode(self, text: &str, dst: &mut BytesMut) {
        match self {
            Encoding::Ascii => {
                dst.reserve(text.len());
                for ch in text.chars() {
                    dst.put_u8(if ch.is_ascii() { ch as u8 } else { b'?' });
                }
            }
            Encoding::Utf8 => dst.put_slice(text.as_bytes()),
        }
    }
}

/// Framing configuration for one port session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Prefix that marks envelope control lines.
    pub marker: char,
    /// Line terminator, matched byte-for-byte.
    pub terminator: String,
    /// Text encoding on the wire.
    pub encoding: Encoding,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            terminator: DEFAULT_TERMINATOR.to_string(),
            encoding: Encoding::Ascii,
        }
    }
}

impl ProtocolConfig {
    /// Check that lines can be framed with this configuration.
    pub fn validate(&self) -> Result<()> {
        if self.terminator.is_empty() {
            return Err(FrameError::InvalidConfig(
                "terminator must not be empty".to_string(),
            ));
        }
        if self.terminator.contains(self.marker) {
            return Err(FrameError::InvalidConfig(format!(
                "marker {:?} must not appear in the terminator",
                self.marker
            )));
        }
        if self.encoding == Encoding::Ascii
            && !(self.marker.is_ascii() && self.terminator.is_ascii())
        {
            return Err(FrameError::InvalidConfig(
                "marker and terminator must be ASCII for the ascii encoding".to_string(),
            ));
        }
        Ok(())
    }

    /// Terminator bytes as they appear on the wire.
    pub fn terminator_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encoding.encode(&self.terminator, &mut buf);
        buf.to_vec()
    }
}

/// Encode a command wrapped in a BEGIN/END envelope.
///
/// Wire format (default marker and terminator):
/// ```text
/// !BEGIN <session>\n
/// <command>\n
/// !END <session>\n
/// ```
pub fn encode_envelope(
    config: &ProtocolConfig,
    session_id: &str,
    command: &str,
    dst: &mut BytesMut,
) {
    let marker = config.marker;
    let term = &config.terminator;
    let text = format!(
        "{marker}{BEGIN_KEYWORD}{session_id}{term}{command}{term}{marker}{END_KEYWORD}{session_id}{term}"
    );
    config.encoding.encode(&text, dst);
}

/// Splits an arbitrarily chunked byte stream into complete lines.
///
/// Bytes are buffered until a full terminator is seen, so chunk boundaries
/// falling inside a terminator or a multi-byte character do not change the
/// decoded lines. A line that grows past `max_line` bytes without a
/// terminator is dropped whole, up to and including its terminator.
#[derive(Debug)]
pub struct LineDecoder {
    buf: BytesMut,
    terminator: Vec<u8>,
    encoding: Encoding,
    max_line: usize,
    /// Prefix of `buf` already searched for a terminator.
    scanned: usize,
    discarding: bool,
}

impl LineDecoder {
    /// Create a decoder for the given configuration.
    pub fn new(config: &ProtocolConfig) -> Self {
        Self::with_max_line(config, DEFAULT_MAX_LINE)
    }

    /// Create a decoder with an explicit partial-line limit.
    pub fn with_max_line(config: &ProtocolConfig, max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            terminator: config.terminator_bytes(),
            encoding: config.encoding,
            max_line: max_line.max(1),
            scanned: 0,
            discarding: false,
        }
    }

    /// Append bytes and return every line they complete.
    pub fn decode(&mut self, src: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(src);
        let mut lines = Vec::new();
        while let Some(line) = self.next_line() {
            lines.push(line);
        }
        lines
    }

    /// Pop the next complete line from the buffer, if any.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.find_terminator() else {
                self.enforce_limit();
                return None;
            };
            let line = self.buf.split_to(pos);
            self.buf.advance(self.terminator.len());
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                debug!("end of oversized line skipped");
                continue;
            }
            return Some(self.encoding.decode(&line));
        }
    }

    /// Bytes of the trailing incomplete line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Discard the trailing incomplete line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.discarding = false;
    }

    fn find_terminator(&mut self) -> Option<usize> {
        // A terminator may straddle the old end of the buffer.
        let start = self
            .scanned
            .saturating_sub(self.terminator.len().saturating_sub(1));
        match find(&self.buf[start..], &self.terminator) {
            Some(pos) => Some(start + pos),
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    fn enforce_limit(&mut self) {
        if self.buf.len() <= self.max_line {
            return;
        }
        let keep = self.terminator.len().saturating_sub(1);
        let dropped = self.buf.len() - keep;
        self.buf.advance(dropped);
        self.scanned = self.buf.len();
        if !self.discarding {
            warn!(limit = self.max_line, "line exceeds maximum length, dropping it");
            self.discarding = true;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
