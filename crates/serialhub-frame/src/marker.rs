//! Marker line classification.
//!
//! Lines starting with the configured marker are envelope control lines.
//! Everything else is opaque response payload.

/// Keyword (with its separating space) that opens a batch.
pub const BEGIN_KEYWORD: &str = "BEGIN ";

/// Keyword (with its separating space) that closes a batch.
pub const END_KEYWORD: &str = "END ";

/// A decoded line, classified by its marker prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Ordinary response payload.
    Response(&'a str),
    /// `<marker>BEGIN <id>`.
    Begin(&'a str),
    /// `<marker>END <id>`.
    End(&'a str),
    /// Marker-prefixed line of unrecognized shape.
    UnknownMark,
}

/// Classify a line against the marker character.
pub fn classify(line: &str, marker: char) -> Line<'_> {
    let Some(rest) = line.strip_prefix(marker) else {
        return Line::Response(line);
    };
    if let Some(id) = rest.strip_prefix(BEGIN_KEYWORD) {
        Line::Begin(id)
    } else if let Some(id) = rest.strip_prefix(END_KEYWORD) {
        Line::End(id)
    } else {
        Line::UnknownMark
    }
}
