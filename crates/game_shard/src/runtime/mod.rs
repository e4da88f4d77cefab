//! Runtime module - the tick-driven world engine.
//!
//! This module contains the World orchestrator and all supporting pieces:
//! - Key-value primitive storage and the entity command buffer
//! - Transaction pool and per-tick snapshots
//! - Receipt history and tick result broadcasting
//! - Lifecycle stage state machine
//! - System registry and per-tick execution context
//! - Outbound router to the base shard sequencer

mod config;
mod context;
mod entity_store;
mod error;
mod events;
mod receipt;
mod router;
mod search;
mod stage;
mod storage;
mod system;
mod tx_pool;
mod types;
mod util;
mod world;

pub use config::{WorldConfig, DEFAULT_TICK_RATE};
pub use context::WorldContext;
pub use entity_store::{EntityCommandBuffer, ReadOnlyStore};
pub use error::WorldError;
pub use events::{EventEmitter, MemoryEventEmitter, TickResults};
pub use receipt::{History, Receipt, DEFAULT_HISTORICAL_TICKS_TO_STORE};
pub use router::ShardRouter;
pub use search::{ComponentFilter, Search};
pub use stage::{Stage, StageManager};
pub use storage::{KeySpace, KeyValueStore, MemoryKvStore, NonceStore, WriteOp};
pub use system::SystemManager;
pub use tx_pool::{PooledTransaction, TxPool, TxSnapshot};
pub use types::{EntityId, MessageId, Tick, Timestamp, TxHash};
pub use world::{DebugStateElement, EntityStateElement, EvmTxResult, World};

pub use game_shard_proto::Transaction;
