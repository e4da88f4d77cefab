//! Pending transaction pool and per-tick snapshots.

use std::collections::BTreeMap;
use std::sync::Mutex;

use game_shard_proto::Transaction;

use super::types::{MessageId, TxHash};
use super::util::lock;

/// A transaction plus its derived hash, fixed at pool admission.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledTransaction {
    pub tx_hash: TxHash,
    pub tx: Transaction,
}

#[derive(Debug, Default)]
struct PoolState {
    txs: BTreeMap<MessageId, Vec<PooledTransaction>>,
    count: usize,
}

/// Thread-safe pool of signed transactions awaiting the next tick boundary.
#[derive(Debug, Default)]
pub struct TxPool {
    inner: Mutex<PoolState>,
}

impl TxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signed transaction and returns its derived hash.
    pub fn add_transaction(&self, tx: Transaction) -> TxHash {
        let tx_hash = tx.tx_hash();
        let mut state = lock(&self.inner);
        state
            .txs
            .entry(tx.message_id.clone())
            .or_default()
            .push(PooledTransaction {
                tx_hash: tx_hash.clone(),
                tx,
            });
        state.count += 1;
        tx_hash
    }

    /// Adds a transaction that originated from an EVM contract call.
    pub fn add_evm_transaction(&self, tx: Transaction, evm_tx_hash: impl Into<String>) -> TxHash {
        self.add_transaction(tx.with_evm_tx_hash(evm_tx_hash))
    }

    /// Atomically extracts every pending transaction and resets the pool.
    /// The returned snapshot is immutable.
    pub fn copy_transactions(&self) -> TxSnapshot {
        let mut state = lock(&self.inner);
        let state = std::mem::take(&mut *state);
        TxSnapshot {
            txs: state.txs,
            count: state.count,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable snapshot of the pool taken at a tick boundary. Transactions are
/// in insertion order within each message id; message ids are in sorted
/// order, which keeps iteration deterministic for a given snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxSnapshot {
    txs: BTreeMap<MessageId, Vec<PooledTransaction>>,
    count: usize,
}

impl TxSnapshot {
    pub fn transactions(&self) -> Vec<&PooledTransaction> {
        self.txs.values().flatten().collect()
    }

    /// Transactions for one message kind, in pool insertion order.
    pub fn transactions_for(&self, message_id: &str) -> &[PooledTransaction] {
        self.txs.get(message_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transactions that carry an EVM tx hash.
    pub fn evm_txs(&self) -> Vec<&PooledTransaction> {
        self.transactions()
            .into_iter()
            .filter(|pooled| pooled.tx.evm_tx_hash.is_some())
            .collect()
    }

    /// Wire form of every transaction, for blob submission.
    pub fn to_wire(&self) -> Vec<Transaction> {
        self.transactions()
            .into_iter()
            .map(|pooled| pooled.tx.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn tx(message_id: &str, nonce: u64) -> Transaction {
        Transaction::new(message_id, json!({"n": nonce}), "0xabc", nonce, "sig")
    }

    #[test]
    fn copy_transactions_drains_the_pool() {
        let pool = TxPool::new();
        pool.add_transaction(tx("move", 1));
        pool.add_transaction(tx("attack", 2));
        assert_eq!(pool.len(), 2);

        let snapshot = pool.copy_transactions();
        assert_eq!(snapshot.count(), 2);
        assert!(pool.is_empty());
        assert!(pool.copy_transactions().is_empty());
    }

    #[test]
    fn snapshot_groups_by_message_id_in_insertion_order() {
        let pool = TxPool::new();
        pool.add_transaction(tx("move", 2));
        pool.add_transaction(tx("attack", 1));
        pool.add_transaction(tx("move", 3));

        let snapshot = pool.copy_transactions();
        let moves = snapshot.transactions_for("move");
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0].tx.nonce, 2);
        assert_eq!(moves[1].tx.nonce, 3);

        let order: Vec<&str> = snapshot
            .transactions()
            .iter()
            .map(|pooled| pooled.tx.message_id.as_str())
            .collect();
        assert_eq!(order, vec!["attack", "move", "move"]);
    }

    #[test]
    fn evm_txs_filters_on_evm_hash() {
        let pool = TxPool::new();
        pool.add_transaction(tx("move", 1));
        let evm_hash = pool.add_evm_transaction(tx("move", 2), "0xbeef");

        let snapshot = pool.copy_transactions();
        let evm_txs = snapshot.evm_txs();
        assert_eq!(evm_txs.len(), 1);
        assert_eq!(evm_txs[0].tx_hash, evm_hash);
        assert_eq!(evm_txs[0].tx.evm_tx_hash.as_deref(), Some("0xbeef"));
    }

    #[test]
    fn concurrent_adds_are_all_captured() {
        let pool = Arc::new(TxPool::new());
        let mut handles = Vec::new();
        for worker in 0..4u64 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for n in 0..25u64 {
                    pool.add_transaction(tx("move", worker * 100 + n));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("join worker");
        }

        assert_eq!(pool.copy_transactions().count(), 100);
    }
}
