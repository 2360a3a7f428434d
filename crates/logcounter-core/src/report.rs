// Final per-identity report.
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::identity::{Identity, SequenceToken};
use crate::tally::TallyStore;
use crate::{NameResolver, TokenProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub identity: Identity,
    pub display_name: String,
    /// Every distinct token, numeric or not.
    pub distinct_count: usize,
    /// Highest token that parsed as a sequence number.
    pub max_sequence: Option<u64>,
    /// `max_sequence + 1`, the number of messages the producer sent if it
    /// numbered them from zero. A row with no numeric token still expects 1.
    pub expected_total: u64,
    pub unparseable: Vec<SequenceToken>,
}

impl ReportRow {
    /// Summarizes one identity's tokens. `display_name` is filled in later.
    pub fn summarize(identity: Identity, tokens: &HashSet<SequenceToken>) -> Self {
        let mut max_sequence = None;
        let mut unparseable = Vec::new();
        for token in tokens {
            match token.parse_sequence() {
                Some(seq) => max_sequence = max_sequence.max(Some(seq)),
                None => unparseable.push(token.clone()),
            }
        }
        unparseable.sort();
        Self {
            display_name: identity.application_id().to_string(),
            identity,
            distinct_count: tokens.len(),
            max_sequence,
            expected_total: max_sequence.unwrap_or(0).saturating_add(1),
            unparseable,
        }
    }
}

impl fmt::Display for ReportRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guid: {} app: {} total: {} max: {}",
            self.identity.run_id(),
            self.display_name,
            self.distinct_count,
            self.expected_total
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn row(&self, identity: &Identity) -> Option<&ReportRow> {
        self.rows.iter().find(|row| &row.identity == identity)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            writeln!(f, "{row}")?;
        }
        Ok(())
    }
}

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the report once ingestion has stopped and drained.
///
/// Every upstream call made here is bounded by the lookup timeout; a stalled
/// identity service or cloud controller degrades names to raw ids instead of
/// holding the report back.
pub struct ReportGenerator {
    tokens: Arc<dyn TokenProvider>,
    names: Arc<dyn NameResolver>,
    lookup_timeout: Duration,
}

impl ReportGenerator {
    pub fn new(tokens: Arc<dyn TokenProvider>, names: Arc<dyn NameResolver>) -> Self {
        Self {
            tokens,
            names,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub async fn generate(&self, store: &TallyStore) -> Report {
        // The streaming token may have expired during a long run.
        let token = match timeout(self.lookup_timeout, self.tokens.fetch_token()).await {
            Ok(Ok(token)) => token,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "no token for app name lookups, reporting raw ids");
                String::new()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "token request timed out, reporting raw ids"
                );
                String::new()
            }
        };

        let mut rows = Vec::new();
        for (identity, tokens) in store.snapshot_all() {
            let mut row = ReportRow::summarize(identity, &tokens);
            for token in &row.unparseable {
                metrics::counter!("logcounter_unparseable_tokens_total").increment(1);
                tracing::warn!(
                    identity = %row.identity,
                    token = %token,
                    "cannot parse message id"
                );
            }
            let application_id = row.identity.application_id();
            row.display_name =
                match timeout(self.lookup_timeout, self.names.resolve_name(application_id, &token))
                    .await
                {
                    Ok(name) => name,
                    Err(_) => {
                        tracing::warn!(app_id = application_id, "app name lookup timed out");
                        application_id.to_string()
                    }
                };
            rows.push(row);
        }
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        Report { rows }
    }
}
