// One live firehose subscription.
//
// A transport hands the controller a `FirehoseSession` and keeps the matching
// `SessionFeed` for itself. Envelopes flow through a bounded channel; the
// terminal error is a one-shot. Closing the session cancels the feed so the
// transport's pump task stops and releases the connection.
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::CounterError;
use crate::envelope::Envelope;

/// Creates a connected feed/session pair with room for `capacity` envelopes.
pub fn session_channel(capacity: usize) -> (SessionFeed, FirehoseSession) {
    let (envelope_tx, envelope_rx) = mpsc::channel(capacity.max(1));
    let (error_tx, error_rx) = oneshot::channel();
    let closed = CancellationToken::new();
    let feed = SessionFeed {
        envelopes: envelope_tx,
        error: Some(error_tx),
        closed: closed.clone(),
    };
    let session = FirehoseSession {
        envelopes: envelope_rx,
        errors: error_rx,
        close_on_drop: closed.clone().drop_guard(),
        closed,
    };
    (feed, session)
}

/// Producer half, owned by the transport.
#[derive(Debug)]
pub struct SessionFeed {
    envelopes: mpsc::Sender<Envelope>,
    error: Option<oneshot::Sender<CounterError>>,
    closed: CancellationToken,
}

impl SessionFeed {
    /// Hands one envelope to the reader. Returns false once the session has
    /// been closed and the producer should stop.
    pub async fn deliver(&self, envelope: Envelope) -> bool {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = self.envelopes.send(envelope) => sent.is_ok(),
        }
    }

    /// Reports the terminal error. Only the first call has any effect.
    pub fn fail(&mut self, err: CounterError) {
        if let Some(tx) = self.error.take() {
            let _ = tx.send(err);
        }
    }

    /// Resolves when the consumer closes the session.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Consumer half, owned by the reconnect controller. Dropping it closes the
/// subscription.
#[derive(Debug)]
pub struct FirehoseSession {
    envelopes: mpsc::Receiver<Envelope>,
    errors: oneshot::Receiver<CounterError>,
    closed: CancellationToken,
    close_on_drop: DropGuard,
}

/// A session split between the reader task and the controller.
pub(crate) struct SessionParts {
    pub(crate) envelopes: mpsc::Receiver<Envelope>,
    pub(crate) errors: oneshot::Receiver<CounterError>,
    pub(crate) closed: CancellationToken,
    pub(crate) close_on_drop: DropGuard,
}

impl FirehoseSession {
    /// Waits for the stream to die. A producer that goes away without
    /// reporting an error counts as a closed stream.
    pub async fn terminal_error(&mut self) -> CounterError {
        match (&mut self.errors).await {
            Ok(err) => err,
            Err(_) => CounterError::StreamClosed,
        }
    }

    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        self.envelopes.recv().await
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn into_parts(self) -> SessionParts {
        SessionParts {
            envelopes: self.envelopes,
            errors: self.errors,
            closed: self.closed,
            close_on_drop: self.close_on_drop,
        }
    }
}
