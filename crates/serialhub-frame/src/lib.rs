//! Line framing with batch envelopes for serial peripherals.
//!
//! A peripheral speaks plain text lines. Commands sent through this layer are
//! wrapped in an envelope so their output can be told apart from unsolicited
//! chatter:
//! - `!BEGIN <session>` opens a batch
//! - any number of ordinary response lines
//! - `!END <session>` closes it
//!
//! Malformed envelopes never raise; they surface as fault events and leave
//! the protocol ready for the next command.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod marker;
pub mod protocol;

pub use codec::{
    encode_envelope, Encoding, LineDecoder, ProtocolConfig, DEFAULT_MARKER, DEFAULT_MAX_LINE,
    DEFAULT_TERMINATOR,
};
pub use envelope::{EnvelopeTracker, FaultKind, ProtocolEvent};
pub use error::{FrameError, Result};
pub use marker::{classify, Line, BEGIN_KEYWORD, END_KEYWORD};
pub use protocol::{BatchResponse, LineProtocol, ProtocolLimits, DEFAULT_MAX_QUEUED};
