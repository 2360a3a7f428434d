// Tally keys and the per-message sequence marker.
use std::fmt;

/// Key under which test messages are counted: the emitting application plus
/// the run GUID embedded in the message body.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Identity {
    application_id: String,
    run_id: String,
}

impl Identity {
    pub fn new(application_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application_id, self.run_id)
    }
}

/// Message body suffix kept verbatim for dedup.
///
/// The bytes are compared exactly as received, UTF-8 or not. Producers emit
/// a decimal counter here, but nothing guarantees it, so the numeric view is
/// optional.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SequenceToken(Vec<u8>);

impl SequenceToken {
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        Self(token.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Non-negative decimal value of the token, if it has one.
    pub fn parse_sequence(&self) -> Option<u64> {
        std::str::from_utf8(&self.0).ok()?.parse::<u64>().ok()
    }
}

impl From<&str> for SequenceToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&[u8]> for SequenceToken {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
