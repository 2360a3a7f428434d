// HTTP firehose subscription.
// `GET {doppler}/firehose/{subscription_id}` streams newline-delimited JSON
// envelopes for as long as the upstream keeps the response open. A pump task
// turns the body into envelopes on the session feed; the end of the body, or
// any body error, is the session's terminal error.
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use logcounter_core::{
    CounterError, Envelope, FirehoseSession, FirehoseTransport, SessionFeed, session_channel,
};
use reqwest::StatusCode;

const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpFirehoseTransport {
    client: reqwest::Client,
    base_url: String,
    envelope_buffer: usize,
    max_line_bytes: usize,
}

impl HttpFirehoseTransport {
    pub fn new(client: reqwest::Client, base_url: &str, envelope_buffer: usize) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            envelope_buffer,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Longest envelope line accepted; longer lines are dropped whole.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }
}

#[async_trait]
impl FirehoseTransport for HttpFirehoseTransport {
    async fn subscribe(
        &self,
        subscription_id: &str,
        token: &str,
    ) -> logcounter_core::Result<FirehoseSession> {
        let url = format!("{}/firehose/{}", self.base_url, subscription_id);
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| CounterError::Connect(err.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(CounterError::Connect(format!(
                "firehose responded {}",
                response.status()
            )));
        }
        let (feed, session) = session_channel(self.envelope_buffer);
        tokio::spawn(pump(response, feed, self.max_line_bytes));
        Ok(session)
    }
}

async fn pump(response: reqwest::Response, mut feed: SessionFeed, max_line_bytes: usize) {
    let mut body = response.bytes_stream();
    let mut pending = BytesMut::new();
    // Bytes of `pending` already known to hold no newline.
    let mut scanned = 0;
    // Set while skipping the rest of an oversized line.
    let mut discarding = false;
    loop {
        let chunk = tokio::select! {
            _ = feed.closed() => return,
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                pending.extend_from_slice(&bytes);
                while let Some(offset) = pending[scanned..].iter().position(|byte| *byte == b'\n') {
                    let line = pending.split_to(scanned + offset);
                    pending.advance(1);
                    scanned = 0;
                    if std::mem::take(&mut discarding) {
                        continue;
                    }
                    let Some(envelope) = decode_line(&line) else {
                        continue;
                    };
                    if !feed.deliver(envelope).await {
                        return;
                    }
                }
                scanned = pending.len();
                if pending.len() > max_line_bytes {
                    if !discarding {
                        metrics::counter!("logcounter_envelope_decode_errors_total").increment(1);
                        tracing::warn!(max_line_bytes, "dropping oversized envelope line");
                    }
                    discarding = true;
                    pending.clear();
                    scanned = 0;
                }
            }
            Some(Err(err)) => {
                feed.fail(CounterError::Stream(err.to_string()));
                return;
            }
            None => {
                if !discarding && let Some(envelope) = decode_line(&pending) {
                    let _ = feed.deliver(envelope).await;
                }
                feed.fail(CounterError::StreamClosed);
                return;
            }
        }
    }
}

fn decode_line(line: &[u8]) -> Option<Envelope> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Envelope>(line) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            metrics::counter!("logcounter_envelope_decode_errors_total").increment(1);
            tracing::warn!(error = %err, "skipping undecodable envelope");
            None
        }
    }
}
