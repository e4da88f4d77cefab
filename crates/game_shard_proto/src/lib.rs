//! Wire contracts shared between the game shard engine, the base shard
//! sequencer, and the EVM-side bridge.
//!
//! Remote endpoints are modelled as client traits with wire-shaped
//! request/response types, plus in-memory implementations for development
//! and tests.

pub mod error;
pub mod sequencer;
pub mod shard;
pub mod transaction;

pub use error::TransportError;
pub use sequencer::{InMemorySequencer, SequencerClient, TickBlob};
pub use shard::{
    InMemoryMsgClient, MsgClient, QueryShardRequest, QueryShardResponse, SendMessageRequest,
    SendMessageResponse, CODE_CONNECTION_ERROR, CODE_SERVER_ERROR, CODE_SUCCESS,
};
pub use transaction::Transaction;
