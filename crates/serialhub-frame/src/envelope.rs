use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::marker::{classify, Line};

/// Ways a device can break the envelope discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// BEGIN while another batch is open.
    NestedBegin,
    /// END with no open batch.
    EndWithoutBegin,
    /// END whose id differs from the open batch.
    UnknownId,
    /// Marker line that is neither BEGIN nor END.
    UnknownMark,
}

impl FaultKind {
    fn label(self) -> &'static str {
        match self {
            FaultKind::NestedBegin => "nested BEGIN",
            FaultKind::EndWithoutBegin => "END without BEGIN",
            FaultKind::UnknownId => "unknown id",
            FaultKind::UnknownMark => "unknown mark",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        [
            FaultKind::NestedBegin,
            FaultKind::EndWithoutBegin,
            FaultKind::UnknownId,
            FaultKind::UnknownMark,
        ]
        .into_iter()
        .find(|kind| kind.label() == label)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Faulty response ({})", self.label())
    }
}

/// Structured event derived from a marker line.
///
/// Serialized as `{"event": "begin"|"end", "identifier": ...}` or, for
/// faults, `{"error": "Faulty response (...)", "trace": <line>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EventRecord", try_from = "EventRecord")]
pub enum ProtocolEvent {
    Begin { identifier: String },
    End { identifier: String },
    Fault { kind: FaultKind, trace: String },
}

impl ProtocolEvent {
    /// True for the END event closing `session_id`.
    pub fn is_end_of(&self, session_id: &str) -> bool {
        matches!(self, ProtocolEvent::End { identifier } if identifier == session_id)
    }

    /// True for fault events.
    pub fn is_fault(&self) -> bool {
        matches!(self, ProtocolEvent::Fault { .. })
    }

    fn fault(kind: FaultKind, line: &str) -> Self {
        warn!(fault = kind.label(), trace = line, "envelope fault");
        ProtocolEvent::Fault {
            kind,
            trace: line.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

impl From<ProtocolEvent> for EventRecord {
    fn from(event: ProtocolEvent) -> Self {
        match event {
            ProtocolEvent::Begin { identifier } => EventRecord {
                event: Some("begin".to_string()),
                identifier: Some(identifier),
                error: None,
                trace: None,
            },
            ProtocolEvent::End { identifier } => EventRecord {
                event: Some("end".to_string()),
                identifier: Some(identifier),
                error: None,
                trace: None,
            },
            ProtocolEvent::Fault { kind, trace } => EventRecord {
                event: None,
                identifier: None,
                error: Some(kind.to_string()),
                trace: Some(trace),
            },
        }
    }
}

impl TryFrom<EventRecord> for ProtocolEvent {
    type Error = String;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        if let Some(error) = record.error {
            let kind = error
                .strip_prefix("Faulty response (")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(FaultKind::from_label)
                .ok_or_else(|| format!("unknown fault: {error}"))?;
            return Ok(ProtocolEvent::Fault {
                kind,
                trace: record.trace.unwrap_or_default(),
            });
        }
        let identifier = record.identifier.unwrap_or_default();
        match record.event.as_deref() {
            Some("begin") => Ok(ProtocolEvent::Begin { identifier }),
            Some("end") => Ok(ProtocolEvent::End { identifier }),
            Some(other) => Err(format!("unknown event: {other}")),
            None => Err("event record has neither event nor error".to_string()),
        }
    }
}

/// Tracks the single open batch envelope of one port session.
#[derive(Debug, Default)]
pub struct EnvelopeTracker {
    open: Option<String>,
}

impl EnvelopeTracker {
    /// Create a tracker with no open batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded line. Returns the event it produces, or `None` for
    /// ordinary response lines.
    pub fn observe(&mut self, line: &str, marker: char) -> Option<ProtocolEvent> {
        match classify(line, marker) {
            Line::Response(_) => None,
            Line::Begin(id) => Some(self.begin(id, line)),
            Line::End(id) => Some(self.end(id, line)),
            Line::UnknownMark => Some(ProtocolEvent::fault(FaultKind::UnknownMark, line)),
        }
    }

    fn begin(&mut self, id: &str, line: &str) -> ProtocolEvent {
        if self.open.take().is_some() {
            // The device lost track of its own envelope; drop ours too.
            return ProtocolEvent::fault(FaultKind::NestedBegin, line);
        }
        self.open = Some(id.to_string());
        ProtocolEvent::Begin {
            identifier: id.to_string(),
        }
    }

    fn end(&mut self, id: &str, line: &str) -> ProtocolEvent {
        match self.open.take() {
            None => ProtocolEvent::fault(FaultKind::EndWithoutBegin, line),
            Some(open) if open != id => ProtocolEvent::fault(FaultKind::UnknownId, line),
            Some(open) => ProtocolEvent::End { identifier: open },
        }
    }

    /// Id of the currently open batch.
    pub fn open_session(&self) -> Option<&str> {
        self.open.as_deref()
    }

    /// Forget any open batch.
    pub fn reset(&mut self) {
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str]) -> (EnvelopeTracker, Vec<ProtocolEvent>) {
        let mut tracker = EnvelopeTracker::new();
        let events = lines
            .iter()
            .filter_map(|line| tracker.observe(line, '!'))
            .collect();
        (tracker, events)
    }

    #[test]
    fn well_formed_batch() {
        let (tracker, events) = run(&["!BEGIN A", "OK", "!END A"]);
        assert_eq!(
            events,
            vec![
                ProtocolEvent::Begin {
                    identifier: "A".to_string()
                },
                ProtocolEvent::End {
                    identifier: "A".to_string()
                },
            ]
        );
        assert!(tracker.open_session().is_none());
    }

    #[test]
    fn nested_begin_faults_and_clears() {
        let (tracker, events) = run(&["!BEGIN A", "!BEGIN B"]);
        let faults: Vec<_> = events.iter().filter(|e| e.is_fault()).collect();
        assert_eq!(faults.len(), 1);
        assert!(matches!(
            faults[0],
            ProtocolEvent::Fault {
                kind: FaultKind::NestedBegin,
                ..
            }
        ));
        assert!(tracker.open_session().is_none());
    }

    #[test]
    fn end_without_begin_leaves_state() {
        let (tracker, events) = run(&["!END A"]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ProtocolEvent::Fault { kind: FaultKind::EndWithoutBegin, trace } if trace == "!END A"
        ));
        assert!(tracker.open_session().is_none());
    }

    #[test]
    fn mismatched_end_faults_and_clears() {
        let (tracker, events) = run(&["!BEGIN A", "!END B"]);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            ProtocolEvent::Fault {
                kind: FaultKind::UnknownId,
                ..
            }
        ));
        assert!(tracker.open_session().is_none());
    }

    #[test]
    fn unknown_mark_does_not_touch_open_batch() {
        let (tracker, events) = run(&["!BEGIN A", "!PING"]);
        assert!(matches!(
            events[1],
            ProtocolEvent::Fault {
                kind: FaultKind::UnknownMark,
                ..
            }
        ));
        assert_eq!(tracker.open_session(), Some("A"));
    }

    #[test]
    fn recovers_after_fault() {
        let (_, events) = run(&["!BEGIN A", "!BEGIN B", "!BEGIN C", "!END C"]);
        assert!(events.last().unwrap().is_end_of("C"));
    }

    #[test]
    fn events_serialize_in_wire_shape() {
        let begin = ProtocolEvent::Begin {
            identifier: "s1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&begin).unwrap(),
            serde_json::json!({"event": "begin", "identifier": "s1"})
        );

        let fault = ProtocolEvent::Fault {
            kind: FaultKind::EndWithoutBegin,
            trace: "!END s1".to_string(),
        };
        let value = serde_json::to_value(&fault).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"error": "Faulty response (END without BEGIN)", "trace": "!END s1"})
        );
        let back: ProtocolEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, fault);
    }

    #[test]
    fn rejects_unknown_event_records() {
        let err = serde_json::from_value::<ProtocolEvent>(serde_json::json!({"event": "tick"}));
        assert!(err.is_err());
    }
}
