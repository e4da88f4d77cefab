//! Pending cross-shard message queue, keyed by EVM sender address.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use game_shard_proto::SendMessageRequest;

use crate::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedMessage {
    pub namespace: String,
    pub request: SendMessageRequest,
}

/// Holds at most one pending message per sender address. Only the EVM host
/// thread mutates the queue; it is cleared at the end of every block.
#[derive(Default)]
pub(crate) struct MsgQueue {
    inner: Mutex<HashMap<String, QueuedMessage>>,
}

impl MsgQueue {
    pub fn set(
        &self,
        sender: &str,
        namespace: &str,
        request: SendMessageRequest,
    ) -> Result<(), BridgeError> {
        let mut state = self.lock();
        let key = queue_key(sender);
        if state.contains_key(&key) {
            return Err(BridgeError::MessagePending {
                sender: sender.to_string(),
            });
        }
        state.insert(
            key,
            QueuedMessage {
                namespace: namespace.to_string(),
                request,
            },
        );
        Ok(())
    }

    pub fn is_set(&self, sender: &str) -> bool {
        self.lock().contains_key(&queue_key(sender))
    }

    pub fn message(&self, sender: &str) -> Option<QueuedMessage> {
        self.lock().get(&queue_key(sender)).cloned()
    }

    pub fn remove(&self, sender: &str) {
        self.lock().remove(&queue_key(sender));
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueuedMessage>> {
        self.inner.lock().expect("lock message queue")
    }
}

/// Addresses compare case-insensitively.
fn queue_key(sender: &str) -> String {
    sender.to_ascii_lowercase()
}
