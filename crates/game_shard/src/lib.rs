//! Deterministic, tick-driven entity-component world engine.
//!
//! A [`runtime::World`] ingests signed transactions into a pool, runs
//! registered systems against persisted entity state once per tick, commits
//! every staged mutation atomically to the key-value layer, and optionally
//! settles each tick's transactions on a base shard sequencer for
//! rollup-style recovery.

pub mod runtime;

pub use runtime::{
    ComponentFilter, DebugStateElement, EntityCommandBuffer, EntityStateElement, EventEmitter,
    EvmTxResult, History, KeyValueStore, MemoryEventEmitter, MemoryKvStore, Receipt,
    ReadOnlyStore, Search, ShardRouter, Stage, StageManager, SystemManager, TickResults,
    Transaction, TxPool, TxSnapshot, World, WorldConfig, WorldContext, WorldError, WriteOp,
    DEFAULT_HISTORICAL_TICKS_TO_STORE,
};
