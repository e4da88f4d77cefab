//! Base shard sequencer wire contract.
//!
//! The sequencer settles one blob per `(namespace, tick)` and serves them
//! back, oldest first, for cold-start recovery. Submission is at-least-once:
//! the sequencer deduplicates by `(namespace, tick)`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::transaction::Transaction;

/// One completed tick's worth of transactions, as settled on the base shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickBlob {
    pub namespace: String,
    pub tick: u64,
    pub timestamp_ms: u64,
    pub transactions: Vec<Transaction>,
}

/// Client side of the sequencer endpoint.
pub trait SequencerClient: Send + Sync {
    fn register_game_shard(&self, namespace: &str) -> Result<(), TransportError>;
    fn submit_tx_blob(&self, blob: TickBlob) -> Result<(), TransportError>;
    /// Historical blobs for the namespace with `tick >= from_tick`, oldest
    /// first.
    fn query_transactions(&self, namespace: &str, from_tick: u64)
        -> Result<Vec<TickBlob>, TransportError>;
}

/// In-memory sequencer for development and tests.
#[derive(Clone, Default)]
pub struct InMemorySequencer {
    inner: Arc<Mutex<SequencerState>>,
}

#[derive(Default)]
struct SequencerState {
    registered: Vec<String>,
    blobs: BTreeMap<(String, u64), TickBlob>,
}

impl InMemorySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered_namespaces(&self) -> Vec<String> {
        self.inner.lock().expect("lock sequencer").registered.clone()
    }

    /// Every blob settled for the namespace, in tick order.
    pub fn blobs(&self, namespace: &str) -> Vec<TickBlob> {
        let state = self.inner.lock().expect("lock sequencer");
        state
            .blobs
            .values()
            .filter(|blob| blob.namespace == namespace)
            .cloned()
            .collect()
    }
}

impl SequencerClient for InMemorySequencer {
    fn register_game_shard(&self, namespace: &str) -> Result<(), TransportError> {
        let mut state = self.inner.lock().expect("lock sequencer");
        if !state.registered.iter().any(|ns| ns == namespace) {
            state.registered.push(namespace.to_string());
        }
        Ok(())
    }

    fn submit_tx_blob(&self, blob: TickBlob) -> Result<(), TransportError> {
        let mut state = self.inner.lock().expect("lock sequencer");
        let key = (blob.namespace.clone(), blob.tick);
        // First submission wins; redelivery of the same tick is a no-op.
        state.blobs.entry(key).or_insert(blob);
        Ok(())
    }

    fn query_transactions(
        &self,
        namespace: &str,
        from_tick: u64,
    ) -> Result<Vec<TickBlob>, TransportError> {
        let state = self.inner.lock().expect("lock sequencer");
        Ok(state
            .blobs
            .values()
            .filter(|blob| blob.namespace == namespace && blob.tick >= from_tick)
            .cloned()
            .collect())
    }
}
