// Deduplicated tally of test messages.
// One coarse lock covers every insert and the final read-out; each critical
// section is a single set insert, so contention stays negligible at
// diagnostic load.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::identity::{Identity, SequenceToken};

/// Write side of the tally, as seen by the ingestion pipeline.
#[async_trait]
pub trait TallySink: Send + Sync {
    /// Records `token` under `identity`; returns false for duplicates.
    async fn record(&self, identity: Identity, token: SequenceToken) -> bool;
}

#[derive(Debug, Default)]
pub struct TallyStore {
    counters: Mutex<HashMap<Identity, HashSet<SequenceToken>>>,
}

impl TallyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `token` if it has not been seen for `identity` yet.
    pub fn record_or_ignore(&self, identity: Identity, token: SequenceToken) -> bool {
        let mut guard = self.counters.lock();
        guard.entry(identity).or_default().insert(token)
    }

    /// Copies every identity and its token set out of the store.
    ///
    /// Callers are expected to drain in-flight record tasks first; the copy
    /// only reflects inserts that completed before the lock was taken.
    pub fn snapshot_all(&self) -> Vec<(Identity, HashSet<SequenceToken>)> {
        let guard = self.counters.lock();
        guard
            .iter()
            .map(|(identity, tokens)| (identity.clone(), tokens.clone()))
            .collect()
    }

    pub fn distinct_count(&self, identity: &Identity) -> usize {
        self.counters
            .lock()
            .get(identity)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Number of identities seen so far.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TallySink for TallyStore {
    async fn record(&self, identity: Identity, token: SequenceToken) -> bool {
        self.record_or_ignore(identity, token)
    }
}
