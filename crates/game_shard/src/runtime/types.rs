//! Core identifier types for the world engine.

/// Monotonic tick counter. The tick number is the engine's logical clock; it
/// advances by exactly one per successful tick.
pub type Tick = u64;

/// Millisecond wall-clock timestamp recorded with each tick.
pub type Timestamp = u64;

/// Opaque unique entity identifier.
pub type EntityId = u64;

/// Name of a registered message kind.
pub type MessageId = String;

/// Hex fingerprint identifying a pooled transaction.
pub type TxHash = String;
