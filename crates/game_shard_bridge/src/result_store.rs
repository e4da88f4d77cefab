//! Short-TTL ledger of cross-shard message results.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use game_shard_proto::SendMessageResponse;

/// Default retention for stored results.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

struct StoredResult {
    response: SendMessageResponse,
    expires_at: Instant,
}

/// Concurrent result ledger keyed by EVM tx hash. Entries expire lazily on
/// read, and every insert prunes anything already past its TTL.
pub struct ResultStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, StoredResult>>,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_result(&self, response: SendMessageResponse) {
        let mut state = self.lock();
        let now = Instant::now();
        state.retain(|_, stored| stored.expires_at > now);
        state.insert(
            response.evm_tx_hash.clone(),
            StoredResult {
                response,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn result(&self, evm_tx_hash: &str) -> Option<SendMessageResponse> {
        let mut state = self.lock();
        match state.get(evm_tx_hash) {
            Some(stored) if stored.expires_at > Instant::now() => Some(stored.response.clone()),
            Some(_) => {
                state.remove(evm_tx_hash);
                None
            }
            None => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredResult>> {
        self.inner.lock().expect("lock result store")
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_TTL)
    }
}
