//! Signed game transaction wire form.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

/// A signed transaction submitted to a game shard. Immutable once pooled;
/// the engine identifies it by the derived [`Transaction::tx_hash`]
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Name of the registered message kind this transaction targets.
    pub message_id: String,
    /// Message body as submitted by the signer.
    pub payload: JsonValue,
    pub signer_address: String,
    pub nonce: u64,
    pub signature: String,
    /// Set when the transaction originated from an EVM contract call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_tx_hash: Option<String>,
}

impl Transaction {
    pub fn new(
        message_id: impl Into<String>,
        payload: JsonValue,
        signer_address: impl Into<String>,
        nonce: u64,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            signer_address: signer_address.into(),
            nonce,
            signature: signature.into(),
            evm_tx_hash: None,
        }
    }

    pub fn with_evm_tx_hash(mut self, evm_tx_hash: impl Into<String>) -> Self {
        self.evm_tx_hash = Some(evm_tx_hash.into());
        self
    }

    /// SHA256 fingerprint over the signed fields. Distinct signers or nonces
    /// always produce distinct hashes.
    pub fn tx_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.message_id.as_bytes());
        hasher.update(self.payload.to_string().as_bytes());
        hasher.update(self.signer_address.as_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }
}
