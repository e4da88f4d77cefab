//! Tick result events and the broadcast seam to the event server.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::error::WorldError;
use super::receipt::Receipt;
use super::types::Tick;
use super::util::lock;

/// Receipts for one completed tick, broadcast to connected clients after the
/// window advances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickResults {
    pub tick: Tick,
    pub receipts: Vec<Receipt>,
}

impl TickResults {
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            receipts: Vec::new(),
        }
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    pub fn set_receipts(&mut self, receipts: Vec<Receipt>) {
        self.receipts = receipts;
    }

    pub fn clear(&mut self) {
        self.receipts.clear();
    }
}

/// Outbound seam to the external event server. Broadcast failures are
/// absorbed by the caller; a tick never fails on them.
pub trait EventEmitter: Send + Sync {
    fn broadcast_event(&self, results: &TickResults) -> Result<(), WorldError>;
}

/// Captures broadcast events in memory for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventEmitter {
    events: Arc<Mutex<Vec<TickResults>>>,
}

impl MemoryEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TickResults> {
        lock(&self.events).clone()
    }
}

impl EventEmitter for MemoryEventEmitter {
    fn broadcast_event(&self, results: &TickResults) -> Result<(), WorldError> {
        lock(&self.events).push(results.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_emitter_captures_broadcasts() {
        let emitter = MemoryEventEmitter::new();
        let mut results = TickResults::new(3);
        results.set_receipts(vec![Receipt {
            tx_hash: "tx1".to_string(),
            result: None,
            errors: Vec::new(),
        }]);

        emitter.broadcast_event(&results).expect("broadcast");
        results.clear();

        let events = emitter.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tick, 3);
        assert_eq!(events[0].receipts.len(), 1);
    }
}
