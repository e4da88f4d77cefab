//! Key-value primitive storage and the namespace-scoped key layout.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::error::WorldError;
use super::types::EntityId;
use super::util::lock;

/// A single write within an atomic commit batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// Typed access to the key-value service backing the world. `commit` is
/// atomic: either every op in the batch is applied or none is.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WorldError>;
    /// Key/value pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, WorldError>;
    fn commit(&self, batch: Vec<WriteOp>) -> Result<(), WorldError>;
}

/// In-memory store. Clones share the same underlying map, so a world
/// reopened over a clone observes previously committed state.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, WorldError> {
        Ok(lock(&self.inner).get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, WorldError> {
        let state = lock(&self.inner);
        Ok(state
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn commit(&self, batch: Vec<WriteOp>) -> Result<(), WorldError> {
        let mut state = lock(&self.inner);
        for op in batch {
            match op {
                WriteOp::Set { key, value } => {
                    state.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    state.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Namespace-scoped key layout for persisted world state.
#[derive(Debug, Clone)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Value: raw JSON component payload.
    pub fn component(&self, entity: EntityId, component: &str) -> String {
        format!("{}:comp:{}:{}", self.namespace, entity, component)
    }

    pub fn component_prefix(&self, entity: EntityId) -> String {
        format!("{}:comp:{}:", self.namespace, entity)
    }

    /// Value: JSON array of the entity's component names.
    pub fn entity(&self, entity: EntityId) -> String {
        format!("{}:entity:{}", self.namespace, entity)
    }

    pub fn entity_prefix(&self) -> String {
        format!("{}:entity:", self.namespace)
    }

    /// Value: the next tick to execute, anchoring recovery.
    pub fn last_finalized_tick(&self) -> String {
        format!("{}:meta:last_finalized_tick", self.namespace)
    }

    pub fn next_entity_id(&self) -> String {
        format!("{}:meta:next_entity_id", self.namespace)
    }

    /// Value: the highest nonce used by the signer.
    pub fn nonce(&self, signer_address: &str) -> String {
        format!("{}:nonce:{}", self.namespace, signer_address)
    }
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, WorldError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn encode_u64(value: u64) -> Result<Vec<u8>, WorldError> {
    Ok(serde_json::to_vec(&value)?)
}

/// Signer nonce bookkeeping over the key-value store. `use_nonce` is
/// monotonic, so each `(signer, nonce)` pair succeeds at most once.
pub struct NonceStore {
    kv: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    // Serializes the read-check-write so concurrent callers cannot both
    // claim the same nonce.
    guard: Mutex<()>,
}

impl NonceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            keys: KeySpace::new(namespace),
            guard: Mutex::new(()),
        }
    }

    pub fn use_nonce(&self, signer_address: &str, nonce: u64) -> Result<(), WorldError> {
        let _guard = lock(&self.guard);
        let key = self.keys.nonce(signer_address);
        if let Some(bytes) = self.kv.get(&key)? {
            let last = decode_u64(&bytes)?;
            if nonce <= last {
                return Err(WorldError::NonceAlreadyUsed {
                    signer_address: signer_address.to_string(),
                    nonce,
                });
            }
        }
        self.kv.commit(vec![WriteOp::Set {
            key,
            value: encode_u64(nonce)?,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_applies_every_op_in_the_batch() {
        let store = MemoryKvStore::new();
        store
            .commit(vec![
                WriteOp::Set {
                    key: "a".to_string(),
                    value: b"1".to_vec(),
                },
                WriteOp::Set {
                    key: "b".to_string(),
                    value: b"2".to_vec(),
                },
                WriteOp::Delete {
                    key: "a".to_string(),
                },
            ])
            .expect("commit");

        assert_eq!(store.get("a").expect("get"), None);
        assert_eq!(store.get("b").expect("get"), Some(b"2".to_vec()));
    }

    #[test]
    fn clones_share_committed_state() {
        let store = MemoryKvStore::new();
        let reopened = store.clone();
        store
            .commit(vec![WriteOp::Set {
                key: "k".to_string(),
                value: b"v".to_vec(),
            }])
            .expect("commit");

        assert_eq!(reopened.get("k").expect("get"), Some(b"v".to_vec()));
    }

    #[test]
    fn scan_prefix_returns_only_matching_keys_in_order() {
        let store = MemoryKvStore::new();
        for key in ["w1:entity:2", "w1:entity:1", "w1:meta:tick", "w2:entity:1"] {
            store
                .commit(vec![WriteOp::Set {
                    key: key.to_string(),
                    value: Vec::new(),
                }])
                .expect("commit");
        }

        let keys: Vec<String> = store
            .scan_prefix("w1:entity:")
            .expect("scan")
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["w1:entity:1".to_string(), "w1:entity:2".to_string()]);
    }

    #[test]
    fn use_nonce_rejects_replays_and_stale_nonces() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let nonces = NonceStore::new(store, "w1");

        nonces.use_nonce("0xabc", 5).expect("first use");
        assert!(matches!(
            nonces.use_nonce("0xabc", 5),
            Err(WorldError::NonceAlreadyUsed { .. })
        ));
        assert!(matches!(
            nonces.use_nonce("0xabc", 3),
            Err(WorldError::NonceAlreadyUsed { .. })
        ));
        nonces.use_nonce("0xabc", 6).expect("next nonce");
        nonces.use_nonce("0xdef", 5).expect("other signer");
    }
}
