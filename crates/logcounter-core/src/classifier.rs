// Envelope classification for load-test messages.
//
// Test producers emit bodies of the exact form
//     "<prefix> guid: <36-char run guid> msg: <sequence>"
// and the classifier relies on those fixed offsets. Nothing is trimmed or
// searched for; a body that does not line up is rejected.
use crate::envelope::{Envelope, EventType};
use crate::identity::{Identity, SequenceToken};

const GUID_LABEL: &str = " guid: ";
const SEQUENCE_LABEL: &str = " msg: ";
const GUID_LEN: usize = "376ce05d-e4a7-46b2-6df4-663bd001b807".len();

/// Byte boundaries of the fields inside a test message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLayout {
    pub run_id_start: usize,
    pub run_id_end: usize,
    pub token_start: usize,
}

impl MessageLayout {
    pub fn for_prefix(prefix: &str) -> Self {
        let run_id_start = prefix.len() + GUID_LABEL.len();
        let run_id_end = run_id_start + GUID_LEN;
        let token_start = run_id_end + SEQUENCE_LABEL.len();
        Self {
            run_id_start,
            run_id_end,
            token_start,
        }
    }

    /// Shortest body that still carries every field (with an empty token).
    pub fn min_len(&self) -> usize {
        self.token_start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub identity: Identity,
    pub token: SequenceToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not an application log envelope; someone else's traffic.
    NotLogMessage,
    /// A log message that does not carry the configured prefix.
    PrefixMismatch,
    /// Prefixed, but too short to hold the guid and sequence fields.
    TooShort { len: usize, required: usize },
}

impl Rejection {
    /// Metric label for the rejection reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotLogMessage => "not_log_message",
            Rejection::PrefixMismatch => "prefix_mismatch",
            Rejection::TooShort { .. } => "too_short",
        }
    }

    /// True for prefixed messages that could not be parsed, as opposed to
    /// traffic that was never meant for this counter.
    pub fn is_unparseable(&self) -> bool {
        matches!(self, Rejection::TooShort { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(Accepted),
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct EnvelopeClassifier {
    prefix: String,
    layout: MessageLayout,
}

impl EnvelopeClassifier {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let layout = MessageLayout::for_prefix(&prefix);
        Self { prefix, layout }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn layout(&self) -> MessageLayout {
        self.layout
    }

    pub fn classify(&self, envelope: &Envelope) -> Classification {
        if envelope.event_type != EventType::LogMessage {
            return Classification::Rejected(Rejection::NotLogMessage);
        }
        let Some(log) = envelope.log_message.as_ref() else {
            return Classification::Rejected(Rejection::NotLogMessage);
        };
        match self.extract(&log.message) {
            Ok((run_id, token)) => Classification::Accepted(Accepted {
                identity: Identity::new(log.app_id.clone(), String::from_utf8_lossy(run_id)),
                token: SequenceToken::from(token),
            }),
            Err(rejection) => Classification::Rejected(rejection),
        }
    }

    // Spans are taken as raw bytes; only the run id is rendered as text.
    fn extract<'a>(&self, body: &'a [u8]) -> Result<(&'a [u8], &'a [u8]), Rejection> {
        if !body.starts_with(self.prefix.as_bytes()) {
            return Err(Rejection::PrefixMismatch);
        }
        let required = self.layout.min_len();
        if body.len() < required {
            return Err(Rejection::TooShort {
                len: body.len(),
                required,
            });
        }
        let run_id = &body[self.layout.run_id_start..self.layout.run_id_end];
        let token = &body[self.layout.token_start..];
        Ok((run_id, token))
    }
}
