// Firehose counting engine: classify envelopes, tally test messages, and
// keep a subscription alive until the operator asks for the report.
// Collaborators that talk to the outside world (identity service, cloud
// controller, firehose endpoint) are traits so the service crate can plug in
// HTTP implementations and tests can plug in scripted ones.
use async_trait::async_trait;

pub mod classifier;
pub mod controller;
pub mod envelope;
pub mod identity;
pub mod report;
pub mod session;
pub mod tally;

#[cfg(test)]
mod test_support;

pub use classifier::{Accepted, Classification, EnvelopeClassifier, MessageLayout, Rejection};
pub use controller::{
    BackoffPolicy, ConnectionState, ControllerConfig, ReconnectController, RunSummary,
};
pub use envelope::{Envelope, EventType, LogMessage, MessageType};
pub use identity::{Identity, SequenceToken};
pub use report::{Report, ReportGenerator, ReportRow};
pub use session::{FirehoseSession, SessionFeed, session_channel};
pub use tally::{TallySink, TallyStore};

pub type Result<T> = std::result::Result<T, CounterError>;

#[derive(thiserror::Error, Debug)]
pub enum CounterError {
    #[error("token request failed: {0}")]
    Token(String),
    #[error("identity service returned an empty token")]
    EmptyToken,
    #[error("firehose subscribe failed: {0}")]
    Connect(String),
    #[error("firehose stream failed: {0}")]
    Stream(String),
    #[error("firehose stream closed")]
    StreamClosed,
}

/// Source of bearer tokens for the firehose and the cloud controller.
///
/// Implementations must tolerate being called again immediately after a
/// failed attempt; the controller retries forever.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<String>;
}

/// Best-effort lookup of an application's display name.
///
/// Never fails outward: any lookup problem yields `application_id` back.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve_name(&self, application_id: &str, token: &str) -> String;
}

/// Opens one firehose subscription.
///
/// The same `subscription_id` is passed on every reconnect so a load-balanced
/// upstream treats the new connection as the same logical consumer.
#[async_trait]
pub trait FirehoseTransport: Send + Sync {
    async fn subscribe(&self, subscription_id: &str, token: &str) -> Result<FirehoseSession>;
}
