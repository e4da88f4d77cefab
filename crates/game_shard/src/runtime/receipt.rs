//! Per-tick execution receipts and their bounded history window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::error::WorldError;
use super::types::{Tick, TxHash};

/// Number of completed ticks the history retains by default.
pub const DEFAULT_HISTORICAL_TICKS_TO_STORE: u64 = 10;

/// Outcome of a single transaction, bound to the tick it executed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Receipt {
    fn new(tx_hash: impl Into<TxHash>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            result: None,
            errors: Vec::new(),
        }
    }
}

/// Bounded window of receipt sets for the most recent completed ticks.
/// Receipts recorded for the executing tick become retrievable only after
/// `next_tick` advances past it.
#[derive(Debug)]
pub struct History {
    current_tick: Tick,
    size: u64,
    ticks: BTreeMap<Tick, BTreeMap<TxHash, Receipt>>,
}

impl History {
    pub fn new(current_tick: Tick, size: u64) -> Self {
        Self {
            current_tick,
            size: size.max(1),
            ticks: BTreeMap::new(),
        }
    }

    /// Number of completed ticks the window can hold.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Re-anchors the window after recovery, dropping anything recorded
    /// outside it.
    pub fn set_tick(&mut self, tick: Tick) {
        self.current_tick = tick;
        self.evict();
    }

    /// Advances the window by one tick, evicting the oldest set once the
    /// window is saturated.
    pub fn next_tick(&mut self) {
        self.current_tick += 1;
        self.evict();
    }

    /// Records the result payload for a transaction executing in the current
    /// tick.
    pub fn set_result(&mut self, tx_hash: &str, result: JsonValue) {
        self.receipt_mut(tx_hash).result = Some(result);
    }

    /// Appends an execution error for a transaction executing in the current
    /// tick.
    pub fn add_error(&mut self, tx_hash: &str, error: impl Into<String>) {
        self.receipt_mut(tx_hash).errors.push(error.into());
    }

    /// Receipts for a completed tick inside the window.
    pub fn receipts_for_tick(&self, tick: Tick) -> Result<Vec<Receipt>, WorldError> {
        if tick >= self.current_tick || tick + self.size < self.current_tick {
            return Err(WorldError::TickOutsideHistory { tick });
        }
        Ok(self
            .ticks
            .get(&tick)
            .map(|receipts| receipts.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Receipt recorded so far for the executing tick, if any.
    pub(crate) fn pending_receipt(&self, tx_hash: &str) -> Option<&Receipt> {
        self.ticks.get(&self.current_tick)?.get(tx_hash)
    }

    fn receipt_mut(&mut self, tx_hash: &str) -> &mut Receipt {
        self.ticks
            .entry(self.current_tick)
            .or_default()
            .entry(tx_hash.to_string())
            .or_insert_with(|| Receipt::new(tx_hash))
    }

    fn evict(&mut self) {
        let oldest = self.current_tick.saturating_sub(self.size);
        self.ticks.retain(|tick, _| *tick >= oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_tick_receipts_hidden_until_next_tick() {
        let mut history = History::new(0, 10);
        history.set_result("tx1", json!({"ok": true}));
        assert!(matches!(
            history.receipts_for_tick(0),
            Err(WorldError::TickOutsideHistory { tick: 0 })
        ));

        history.next_tick();
        let receipts = history.receipts_for_tick(0).expect("receipts");
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].tx_hash, "tx1");
        assert_eq!(receipts[0].result, Some(json!({"ok": true})));
    }

    #[test]
    fn window_holds_exactly_the_last_size_completed_ticks() {
        let mut history = History::new(0, 3);
        for tick in 0..5u64 {
            history.set_result(&format!("tx{}", tick), json!(tick));
            history.next_tick();
        }

        // current tick is 5; completed window is [2, 4]
        assert!(history.receipts_for_tick(1).is_err());
        for tick in 2..5u64 {
            let receipts = history.receipts_for_tick(tick).expect("in window");
            assert_eq!(receipts.len(), 1);
        }
        assert!(history.receipts_for_tick(5).is_err());
    }

    #[test]
    fn set_tick_anchors_the_window() {
        let mut history = History::new(0, 10);
        history.set_tick(7);
        assert!(history.receipts_for_tick(7).is_err());
        assert!(history.receipts_for_tick(6).expect("in window").is_empty());
    }

    #[test]
    fn errors_accumulate_on_one_receipt() {
        let mut history = History::new(0, 10);
        history.add_error("tx1", "first");
        history.add_error("tx1", "second");
        history.next_tick();

        let receipts = history.receipts_for_tick(0).expect("receipts");
        assert_eq!(receipts[0].errors, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn pending_receipt_reads_the_executing_tick() {
        let mut history = History::new(3, 10);
        history.set_result("tx1", json!(1));
        assert!(history.pending_receipt("tx1").is_some());
        assert!(history.pending_receipt("tx2").is_none());
    }
}
