//! EVM-side bridge to game shards.
//!
//! EVM contract calls queue cross-shard messages keyed by the sender
//! address. After every block the host invokes [`Bridge::post_block_hook`],
//! which dispatches the queued message for each successfully included
//! transaction and records the outcome in a short-TTL result ledger that
//! contracts read back through [`Bridge::message_result`].

mod queue;
mod result_store;

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, info_span};

use game_shard_proto::{
    MsgClient, QueryShardRequest, SendMessageRequest, SendMessageResponse, CODE_CONNECTION_ERROR,
    CODE_SERVER_ERROR,
};

use queue::MsgQueue;
pub use result_store::{ResultStore, DEFAULT_RESULT_TTL};

/// Errors returned to EVM-side callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    MessagePending { sender: String },
    NoResult { evm_tx_hash: String },
    Connection { reason: String },
    Shard { reason: String },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::MessagePending { sender } => {
                write!(f, "message already pending for sender: {}", sender)
            }
            BridgeError::NoResult { evm_tx_hash } => {
                write!(f, "no result found for tx {}", evm_tx_hash)
            }
            BridgeError::Connection { reason } => {
                write!(f, "game shard connection error: {}", reason)
            }
            BridgeError::Shard { reason } => write!(f, "game shard error: {}", reason),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Minimal view of an EVM transaction as seen by the post-block hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmTx {
    /// `to` address; `None` for contract creation.
    pub to: Option<String>,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmReceipt {
    pub tx_hash: String,
    pub status: EvmReceiptStatus,
}

/// Resolves a namespace to its game shard endpoint address. Namespace to
/// address pairs are registered on the base shard when a game shard starts
/// in rollup mode.
pub type AddressResolver = Box<dyn Fn(&str) -> Result<String, BridgeError> + Send + Sync>;

/// Opens (or reuses) a client for an endpoint address, authenticated with
/// the router key.
pub type ClientConnector =
    Box<dyn Fn(&str, &str) -> Result<Arc<dyn MsgClient>, BridgeError> + Send + Sync>;

/// Queues cross-shard messages from EVM contracts and dispatches them once
/// their block is finalized.
pub struct Bridge {
    queue: MsgQueue,
    results: Arc<ResultStore>,
    resolve_addr: AddressResolver,
    connect: ClientConnector,
    router_key: String,
}

impl Bridge {
    pub fn new(
        resolve_addr: AddressResolver,
        connect: ClientConnector,
        router_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: MsgQueue::default(),
            results: Arc::new(ResultStore::default()),
            resolve_addr,
            connect,
            router_key: router_key.into(),
        }
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.results = Arc::new(ResultStore::new(ttl));
        self
    }

    /// Queues a message to be sent to the `namespace` game shard. Fails if a
    /// message is already pending for `sender`; the pending entry clears at
    /// the end of the current block.
    pub fn send_message(
        &self,
        persona_tag: &str,
        namespace: &str,
        sender: &str,
        message_id: &str,
        message: Vec<u8>,
    ) -> Result<(), BridgeError> {
        info!(namespace, sender, message_id, "received send message request");
        let request = SendMessageRequest {
            sender: sender.to_string(),
            persona_tag: persona_tag.to_string(),
            message_id: message_id.to_string(),
            message,
            evm_tx_hash: String::new(),
        };
        self.queue.set(sender, namespace, request)
    }

    /// Runs after every EVM block over the paired transaction and receipt
    /// lists. A queued message dispatches when a transaction's `to` address
    /// matches its sender and the receipt reports success; the queue entry
    /// is removed either way, and the whole queue is cleared afterwards.
    ///
    /// The association is by `to` address only: the precompile observes the
    /// contract address rather than the transaction hash, so two
    /// transactions in one block to the same address are indistinguishable
    /// here and only the single queued message can dispatch.
    pub fn post_block_hook(&self, transactions: &[EvmTx], receipts: &[EvmReceipt]) {
        for (tx, receipt) in transactions.iter().zip(receipts) {
            let to = match &tx.to {
                Some(to) => to,
                None => continue,
            };
            if !self.queue.is_set(to) {
                continue;
            }
            // Only dispatch for transactions the EVM actually executed.
            if receipt.status == EvmReceiptStatus::Success {
                self.dispatch_message(to, &receipt.tx_hash);
            }
            self.queue.remove(to);
        }
        self.queue.clear();
    }

    /// Result of the game shard transaction that originated from an EVM tx:
    /// `(payload, errors, code)`.
    pub fn message_result(&self, evm_tx_hash: &str) -> Result<(Vec<u8>, String, u32), BridgeError> {
        match self.results.result(evm_tx_hash) {
            Some(response) => Ok((response.result, response.errs, response.code)),
            None => Err(BridgeError::NoResult {
                evm_tx_hash: evm_tx_hash.to_string(),
            }),
        }
    }

    /// Synchronous query against a game shard resource.
    pub fn query(
        &self,
        request: Vec<u8>,
        resource: &str,
        namespace: &str,
    ) -> Result<Vec<u8>, BridgeError> {
        let client = self.connection_for_namespace(namespace)?;
        let response = client
            .query_shard(QueryShardRequest {
                resource: resource.to_string(),
                request,
            })
            .map_err(|err| BridgeError::Shard {
                reason: err.to_string(),
            })?;
        Ok(response.response)
    }

    /// Resolves the sender's queued message and sends it on a detached
    /// thread so block inclusion is never slowed by the shard. The response,
    /// or a synthetic connection/server error response, lands in the result
    /// ledger keyed by `evm_tx_hash`.
    fn dispatch_message(&self, sender: &str, evm_tx_hash: &str) {
        let _span = info_span!("dispatch_message", evm_tx_hash).entered();
        let queued = match self.queue.message(sender) {
            Some(queued) => queued,
            None => {
                error!(sender, "no message found in queue for sender");
                return;
            }
        };

        let mut request = queued.request;
        request.sender = request.sender.to_ascii_lowercase();
        request.evm_tx_hash = evm_tx_hash.to_string();

        let client = match self.connection_for_namespace(&queued.namespace) {
            Ok(client) => client,
            Err(err) => {
                error!(namespace = %queued.namespace, %err, "error getting game shard connection");
                self.results.set_result(SendMessageResponse {
                    evm_tx_hash: request.evm_tx_hash,
                    code: CODE_CONNECTION_ERROR,
                    errs: format!("error getting game shard connection: {}", err),
                    result: Vec::new(),
                });
                return;
            }
        };

        info!(
            evm_tx_hash = %request.evm_tx_hash,
            namespace = %queued.namespace,
            sender = %request.sender,
            message_id = %request.message_id,
            "sending tx to game shard"
        );
        let results = Arc::clone(&self.results);
        thread::spawn(move || match client.send_message(request.clone()) {
            Ok(response) => {
                info!(code = response.code, "successfully sent message to game shard");
                results.set_result(response);
            }
            Err(err) => {
                error!(%err, "failed to send message to game shard");
                results.set_result(SendMessageResponse {
                    evm_tx_hash: request.evm_tx_hash,
                    code: CODE_SERVER_ERROR,
                    errs: err.to_string(),
                    result: Vec::new(),
                });
            }
        });
    }

    fn connection_for_namespace(&self, namespace: &str) -> Result<Arc<dyn MsgClient>, BridgeError> {
        let address = (self.resolve_addr)(namespace)?;
        (self.connect)(&address, &self.router_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_shard_proto::InMemoryMsgClient;

    fn bridge(client: &InMemoryMsgClient) -> Bridge {
        let client = client.clone();
        Bridge::new(
            Box::new(|namespace| match namespace {
                "ns1" => Ok("localhost:9601".to_string()),
                other => Err(BridgeError::Connection {
                    reason: format!("unknown namespace: {}", other),
                }),
            }),
            Box::new(move |_address, _router_key| {
                Ok(Arc::new(client.clone()) as Arc<dyn MsgClient>)
            }),
            "router-key",
        )
    }

    fn successful_block(to: &str, tx_hash: &str) -> (Vec<EvmTx>, Vec<EvmReceipt>) {
        (
            vec![EvmTx {
                to: Some(to.to_string()),
                hash: tx_hash.to_string(),
            }],
            vec![EvmReceipt {
                tx_hash: tx_hash.to_string(),
                status: EvmReceiptStatus::Success,
            }],
        )
    }

    fn wait_for_result(bridge: &Bridge, evm_tx_hash: &str) -> (Vec<u8>, String, u32) {
        for _ in 0..200 {
            if let Ok(result) = bridge.message_result(evm_tx_hash) {
                return result;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no result recorded for {}", evm_tx_hash);
    }

    #[test]
    fn second_send_for_the_same_sender_collides() {
        let client = InMemoryMsgClient::new();
        let bridge = bridge(&client);

        bridge
            .send_message("hero", "ns1", "0xA", "attack", b"first".to_vec())
            .expect("first send");
        let err = bridge
            .send_message("hero", "ns1", "0xA", "attack", b"second".to_vec())
            .expect_err("second send must fail");
        assert!(matches!(err, BridgeError::MessagePending { .. }));

        let (transactions, receipts) = successful_block("0xA", "0xbeef");
        bridge.post_block_hook(&transactions, &receipts);

        let (_, errs, code) = wait_for_result(&bridge, "0xbeef");
        assert_eq!(code, 0);
        assert!(errs.is_empty());
        let received = client.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, b"first".to_vec());
        assert_eq!(received[0].sender, "0xa");
        assert_eq!(received[0].evm_tx_hash, "0xbeef");
        assert_eq!(bridge.queue.len(), 0);
    }

    #[test]
    fn reverted_transaction_suppresses_dispatch_and_clears_the_queue() {
        let client = InMemoryMsgClient::new();
        let bridge = bridge(&client);
        bridge
            .send_message("hero", "ns1", "0xA", "attack", Vec::new())
            .expect("send");

        let transactions = vec![EvmTx {
            to: Some("0xA".to_string()),
            hash: "0xbeef".to_string(),
        }];
        let receipts = vec![EvmReceipt {
            tx_hash: "0xbeef".to_string(),
            status: EvmReceiptStatus::Reverted,
        }];
        bridge.post_block_hook(&transactions, &receipts);
        thread::sleep(Duration::from_millis(20));

        assert!(client.received().is_empty());
        assert!(matches!(
            bridge.message_result("0xbeef"),
            Err(BridgeError::NoResult { .. })
        ));
        assert_eq!(bridge.queue.len(), 0);
    }

    #[test]
    fn queue_clears_even_without_a_matching_transaction() {
        let client = InMemoryMsgClient::new();
        let bridge = bridge(&client);
        bridge
            .send_message("hero", "ns1", "0xA", "attack", Vec::new())
            .expect("send");

        let transactions = vec![
            EvmTx {
                to: None,
                hash: "0xc0de".to_string(),
            },
            EvmTx {
                to: Some("0xB".to_string()),
                hash: "0xbeef".to_string(),
            },
        ];
        let receipts = vec![
            EvmReceipt {
                tx_hash: "0xc0de".to_string(),
                status: EvmReceiptStatus::Success,
            },
            EvmReceipt {
                tx_hash: "0xbeef".to_string(),
                status: EvmReceiptStatus::Success,
            },
        ];
        bridge.post_block_hook(&transactions, &receipts);

        assert!(client.received().is_empty());
        assert_eq!(bridge.queue.len(), 0);
    }

    #[test]
    fn unresolvable_namespace_records_a_connection_error_result() {
        let client = InMemoryMsgClient::new();
        let bridge = bridge(&client);
        bridge
            .send_message("hero", "ns-unknown", "0xA", "attack", Vec::new())
            .expect("send");

        let (transactions, receipts) = successful_block("0xA", "0xbeef");
        bridge.post_block_hook(&transactions, &receipts);

        let (_, errs, code) = wait_for_result(&bridge, "0xbeef");
        assert_eq!(code, CODE_CONNECTION_ERROR);
        assert!(errs.contains("unknown namespace"));
        assert!(client.received().is_empty());
    }

    #[test]
    fn shard_failure_records_a_server_error_result() {
        let client = InMemoryMsgClient::new();
        client.fail_sends("shard exploded");
        let bridge = bridge(&client);
        bridge
            .send_message("hero", "ns1", "0xA", "attack", Vec::new())
            .expect("send");

        let (transactions, receipts) = successful_block("0xA", "0xbeef");
        bridge.post_block_hook(&transactions, &receipts);

        let (_, errs, code) = wait_for_result(&bridge, "0xbeef");
        assert_eq!(code, CODE_SERVER_ERROR);
        assert!(errs.contains("shard exploded"));
    }

    #[test]
    fn results_expire_after_their_ttl() {
        let client = InMemoryMsgClient::new();
        let bridge = bridge(&client).with_result_ttl(Duration::ZERO);
        bridge
            .send_message("hero", "ns1", "0xA", "attack", Vec::new())
            .expect("send");

        let (transactions, receipts) = successful_block("0xA", "0xbeef");
        bridge.post_block_hook(&transactions, &receipts);
        thread::sleep(Duration::from_millis(20));

        assert!(matches!(
            bridge.message_result("0xbeef"),
            Err(BridgeError::NoResult { .. })
        ));
    }

    #[test]
    fn query_round_trips_through_the_shard_client() {
        let client = InMemoryMsgClient::new();
        client.set_query_response("world/state", b"state".to_vec());
        let bridge = bridge(&client);

        let response = bridge
            .query(b"{}".to_vec(), "world/state", "ns1")
            .expect("query");
        assert_eq!(response, b"state".to_vec());

        assert!(matches!(
            bridge.query(Vec::new(), "world/state", "ns-unknown"),
            Err(BridgeError::Connection { .. })
        ));
    }
}
