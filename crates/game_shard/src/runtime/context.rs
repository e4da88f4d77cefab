//! Per-tick execution context handed to systems.

use serde_json::Value as JsonValue;

use super::entity_store::EntityCommandBuffer;
use super::error::WorldError;
use super::receipt::History;
use super::tx_pool::{PooledTransaction, TxSnapshot};
use super::types::{EntityId, Tick, Timestamp};

/// Everything a system may observe and mutate during one tick. Built fresh
/// per tick and never outlives it.
pub struct WorldContext<'a> {
    tick: Tick,
    timestamp: Timestamp,
    store: &'a mut EntityCommandBuffer,
    txs: &'a TxSnapshot,
    receipts: &'a mut History,
}

impl<'a> WorldContext<'a> {
    pub(crate) fn new(
        tick: Tick,
        timestamp: Timestamp,
        store: &'a mut EntityCommandBuffer,
        txs: &'a TxSnapshot,
        receipts: &'a mut History,
    ) -> Self {
        Self {
            tick,
            timestamp,
            store,
            txs,
            receipts,
        }
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    /// Millisecond timestamp recorded for this tick.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Transactions for one message kind, in pool insertion order.
    pub fn transactions_for(&self, message_id: &str) -> &[PooledTransaction] {
        self.txs.transactions_for(message_id)
    }

    pub fn transactions(&self) -> Vec<&PooledTransaction> {
        self.txs.transactions()
    }

    pub fn create_entity(&mut self) -> EntityId {
        self.store.create_entity()
    }

    pub fn destroy_entity(&mut self, entity: EntityId) -> Result<(), WorldError> {
        self.store.destroy_entity(entity)
    }

    pub fn set_component(
        &mut self,
        entity: EntityId,
        component: &str,
        value: JsonValue,
    ) -> Result<(), WorldError> {
        self.store.set_component(entity, component, value)
    }

    pub fn remove_component(&mut self, entity: EntityId, component: &str) -> Result<(), WorldError> {
        self.store.remove_component(entity, component)
    }

    /// Component payload with this tick's staged ops applied.
    pub fn component(&self, entity: EntityId, component: &str) -> Result<JsonValue, WorldError> {
        self.store.component_for_entity_raw_json(entity, component)
    }

    pub fn component_names(&self, entity: EntityId) -> Result<Vec<String>, WorldError> {
        self.store.component_names_for_entity(entity)
    }

    pub fn entity_ids(&self) -> Result<Vec<EntityId>, WorldError> {
        self.store.entity_ids()
    }

    /// Records the execution result for a transaction in this tick's
    /// receipts.
    pub fn set_result(&mut self, tx_hash: &str, result: JsonValue) {
        self.receipts.set_result(tx_hash, result);
    }

    /// Records an execution error for a transaction in this tick's receipts.
    pub fn add_error(&mut self, tx_hash: &str, error: impl Into<String>) {
        self.receipts.add_error(tx_hash, error);
    }
}
