//! Outbound router that settles tick blobs on the base shard sequencer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use game_shard_proto::{SequencerClient, TickBlob, Transaction};

use super::error::WorldError;
use super::types::{Tick, Timestamp};

/// Submits finished ticks to the sequencer and serves the historical blobs a
/// cold-starting world replays. Submission is at-least-once; the sequencer
/// deduplicates by `(namespace, tick)`.
pub struct ShardRouter {
    namespace: String,
    client: Arc<dyn SequencerClient>,
    started: AtomicBool,
}

impl ShardRouter {
    pub fn new(namespace: impl Into<String>, client: Arc<dyn SequencerClient>) -> Self {
        Self {
            namespace: namespace.into(),
            client,
            started: AtomicBool::new(false),
        }
    }

    pub fn start(&self) -> Result<(), WorldError> {
        self.started.store(true, Ordering::SeqCst);
        info!(namespace = %self.namespace, "shard router started");
        Ok(())
    }

    pub fn register_game_shard(&self) -> Result<(), WorldError> {
        self.ensure_started()?;
        self.client.register_game_shard(&self.namespace)?;
        Ok(())
    }

    pub fn submit_tx_blob(
        &self,
        transactions: Vec<Transaction>,
        tick: Tick,
        timestamp_ms: Timestamp,
    ) -> Result<(), WorldError> {
        self.ensure_started()?;
        self.client.submit_tx_blob(TickBlob {
            namespace: self.namespace.clone(),
            tick,
            timestamp_ms,
            transactions,
        })?;
        Ok(())
    }

    /// Historical blobs at or after `from_tick`, oldest first.
    pub fn historical_ticks(&self, from_tick: Tick) -> Result<Vec<TickBlob>, WorldError> {
        self.ensure_started()?;
        Ok(self.client.query_transactions(&self.namespace, from_tick)?)
    }

    fn ensure_started(&self) -> Result<(), WorldError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(WorldError::Router {
                reason: "router has not been started".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_shard_proto::InMemorySequencer;
    use serde_json::json;

    fn router(sequencer: &InMemorySequencer) -> ShardRouter {
        ShardRouter::new("w1", Arc::new(sequencer.clone()))
    }

    #[test]
    fn operations_require_start() {
        let sequencer = InMemorySequencer::new();
        let router = router(&sequencer);
        assert!(matches!(
            router.register_game_shard(),
            Err(WorldError::Router { .. })
        ));

        router.start().expect("start");
        router.register_game_shard().expect("register");
        assert_eq!(sequencer.registered_namespaces(), vec!["w1".to_string()]);
    }

    #[test]
    fn submit_builds_a_namespaced_blob() {
        let sequencer = InMemorySequencer::new();
        let router = router(&sequencer);
        router.start().expect("start");

        let tx = Transaction::new("move", json!({"dx": 2}), "0xabc", 1, "sig");
        router
            .submit_tx_blob(vec![tx.clone()], 4, 9_000)
            .expect("submit");

        let blobs = sequencer.blobs("w1");
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].tick, 4);
        assert_eq!(blobs[0].timestamp_ms, 9_000);
        assert_eq!(blobs[0].transactions, vec![tx]);
    }

    #[test]
    fn historical_ticks_round_trip_submitted_blobs() {
        let sequencer = InMemorySequencer::new();
        let router = router(&sequencer);
        router.start().expect("start");
        for tick in 0..3u64 {
            router
                .submit_tx_blob(Vec::new(), tick, 1_000 + tick)
                .expect("submit");
        }

        let blobs = router.historical_ticks(1).expect("history");
        let ticks: Vec<u64> = blobs.iter().map(|blob| blob.tick).collect();
        assert_eq!(ticks, vec![1, 2]);
    }
}
