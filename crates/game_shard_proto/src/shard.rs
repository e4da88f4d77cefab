//! Shard-to-shard message wire contract, spoken between the EVM bridge and a
//! game shard.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::TransportError;

/// The message was handled by the game shard.
pub const CODE_SUCCESS: u32 = 0;
/// The bridge could not obtain a connection to the game shard.
pub const CODE_CONNECTION_ERROR: u32 = 100;
/// The game shard returned an error while handling the message.
pub const CODE_SERVER_ERROR: u32 = 101;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender: String,
    pub persona_tag: String,
    pub message_id: String,
    pub message: Vec<u8>,
    /// Hash of the EVM transaction that triggered this message. Filled in by
    /// the bridge at dispatch time.
    #[serde(default)]
    pub evm_tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub evm_tx_hash: String,
    pub code: u32,
    #[serde(default)]
    pub errs: String,
    #[serde(default)]
    pub result: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryShardRequest {
    pub resource: String,
    pub request: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryShardResponse {
    pub response: Vec<u8>,
}

/// Client side of a game shard endpoint.
pub trait MsgClient: Send + Sync {
    fn send_message(&self, request: SendMessageRequest)
        -> Result<SendMessageResponse, TransportError>;
    fn query_shard(&self, request: QueryShardRequest)
        -> Result<QueryShardResponse, TransportError>;
}

/// In-memory game shard endpoint for development and tests. Records every
/// delivered message and answers queries from canned responses.
#[derive(Clone, Default)]
pub struct InMemoryMsgClient {
    inner: Arc<Mutex<MsgClientState>>,
}

#[derive(Default)]
struct MsgClientState {
    received: Vec<SendMessageRequest>,
    query_responses: HashMap<String, Vec<u8>>,
    send_error: Option<String>,
}

impl InMemoryMsgClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<SendMessageRequest> {
        self.inner.lock().expect("lock shard client").received.clone()
    }

    pub fn set_query_response(&self, resource: impl Into<String>, response: Vec<u8>) {
        let mut state = self.inner.lock().expect("lock shard client");
        state.query_responses.insert(resource.into(), response);
    }

    /// Makes every subsequent `send_message` fail with the given message.
    pub fn fail_sends(&self, message: impl Into<String>) {
        let mut state = self.inner.lock().expect("lock shard client");
        state.send_error = Some(message.into());
    }
}

impl MsgClient for InMemoryMsgClient {
    fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        let mut state = self.inner.lock().expect("lock shard client");
        if let Some(message) = &state.send_error {
            return Err(TransportError::new(message.clone()));
        }
        let evm_tx_hash = request.evm_tx_hash.clone();
        state.received.push(request);
        Ok(SendMessageResponse {
            evm_tx_hash,
            code: CODE_SUCCESS,
            errs: String::new(),
            result: Vec::new(),
        })
    }

    fn query_shard(
        &self,
        request: QueryShardRequest,
    ) -> Result<QueryShardResponse, TransportError> {
        let state = self.inner.lock().expect("lock shard client");
        match state.query_responses.get(&request.resource) {
            Some(response) => Ok(QueryShardResponse {
                response: response.clone(),
            }),
            None => Err(TransportError::new(format!(
                "no handler for resource: {}",
                request.resource
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sender: &str) -> SendMessageRequest {
        SendMessageRequest {
            sender: sender.to_string(),
            persona_tag: "hero".to_string(),
            message_id: "attack".to_string(),
            message: b"{}".to_vec(),
            evm_tx_hash: "0xbeef".to_string(),
        }
    }

    #[test]
    fn send_message_echoes_evm_tx_hash_and_records_request() {
        let client = InMemoryMsgClient::new();
        let response = client.send_message(request("0xa")).expect("send");
        assert_eq!(response.code, CODE_SUCCESS);
        assert_eq!(response.evm_tx_hash, "0xbeef");
        assert_eq!(client.received().len(), 1);
    }

    #[test]
    fn send_message_surfaces_configured_failure() {
        let client = InMemoryMsgClient::new();
        client.fail_sends("shard offline");
        let err = client.send_message(request("0xa")).expect_err("must fail");
        assert_eq!(err.message, "shard offline");
        assert!(client.received().is_empty());
    }

    #[test]
    fn query_shard_answers_from_canned_response() {
        let client = InMemoryMsgClient::new();
        client.set_query_response("world/state", b"ok".to_vec());

        let response = client
            .query_shard(QueryShardRequest {
                resource: "world/state".to_string(),
                request: Vec::new(),
            })
            .expect("query");
        assert_eq!(response.response, b"ok".to_vec());

        let err = client
            .query_shard(QueryShardRequest {
                resource: "missing".to_string(),
                request: Vec::new(),
            })
            .expect_err("unknown resource");
        assert!(err.message.contains("missing"));
    }
}
