// File: testing-framework/src/node/rpc_client.rs
//
// JSON-RPC Adapter
//
// Drives a real node over the bitcoind JSON-RPC 1.0 dialect. Hex encodings
// of blocks and transactions cross the wire unchanged.

use super::{BlockAcceptance, BlockInfo, NodeRpc, TxAcceptance};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, trace};
use minerid_common::{
    block::Block, crypto::Hash, script::Script, serializer::Serializer, transaction::Transaction,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Exception thrown while handling the command
pub const RPC_MISC_ERROR: i64 = -1;
/// Unknown transaction, block or key
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// Transaction already in chain
pub const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;
/// Transaction or block rejected by network rules
pub const RPC_VERIFY_REJECTED: i64 = -26;
/// General error during transaction or block submission
pub const RPC_VERIFY_ERROR: i64 = -25;

/// Error object returned by the node
#[derive(Debug, Clone, Error, Deserialize, PartialEq, Eq)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// Whether the node refused a submission rather than failing to process it
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.code,
            RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED | RPC_VERIFY_ALREADY_IN_CHAIN
        )
    }

    /// Whether the command ran and the node answered with an error. Codes in
    /// the JSON-RPC protocol range (-32768..=-32000) mean the request itself
    /// was not understood.
    pub fn is_refusal(&self) -> bool {
        !(-32768..=-32000).contains(&self.code)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == RPC_INVALID_ADDRESS_OR_KEY
    }

    /// Classify an error returned by a [`NodeRpc`] call
    pub fn classify(error: &anyhow::Error) -> Option<&RpcError> {
        error.downcast_ref::<RpcError>()
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Connection settings for one node
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub label: String,
    pub url: String,
    pub user: String,
    pub password: String,
    pub p2p_address: String,
}

#[derive(Deserialize)]
struct PeerEntry {
    addr: String,
}

pub struct JsonRpcNode {
    endpoint: RpcEndpoint,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcNode {
    pub fn new(endpoint: RpcEndpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            endpoint,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Raw call returning the `result` member
    pub async fn call_value(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!("{} -> {} {}", self.endpoint.label, method, body["params"]);

        // Errors come back with a non-2xx status and a JSON body, so the
        // status code is not checked before decoding.
        let response: RpcResponse = self
            .client
            .post(&self.endpoint.url)
            .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{}: {} request failed", self.endpoint.label, method))?
            .json()
            .await
            .with_context(|| format!("{}: {} returned malformed JSON", self.endpoint.label, method))?;

        if let Some(error) = response.error {
            return Err(anyhow::Error::new(error)
                .context(format!("{}: {}", self.endpoint.label, method)));
        }
        Ok(response.result)
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call_value(method, params).await?;
        serde_json::from_value(value)
            .with_context(|| format!("{}: unexpected {} result", self.endpoint.label, method))
    }
}

fn parse_hash(text: &str) -> Result<Hash> {
    Hash::from_str(text).map_err(|e| anyhow::anyhow!("invalid hash {:?}: {}", text, e))
}

#[async_trait]
impl NodeRpc for JsonRpcNode {
    fn label(&self) -> &str {
        &self.endpoint.label
    }

    fn p2p_address(&self) -> String {
        self.endpoint.p2p_address.clone()
    }

    async fn get_best_block_hash(&self) -> Result<Hash> {
        let hash: String = self.call("getbestblockhash", json!([])).await?;
        parse_hash(&hash)
    }

    async fn get_block_count(&self) -> Result<u64> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block(&self, hash: &Hash) -> Result<BlockInfo> {
        self.call("getblock", json!([hash.to_string(), 1])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash> {
        let hash: String = self.call("getblockhash", json!([height])).await?;
        parse_hash(&hash)
    }

    async fn get_raw_transaction(&self, txid: &Hash) -> Result<Transaction> {
        let hex: String = self
            .call("getrawtransaction", json!([txid.to_string(), 0]))
            .await?;
        Transaction::from_hex(&hex).with_context(|| format!("undecodable transaction {}", txid))
    }

    async fn create_miner_info_tx(&self, script: &Script) -> Result<Hash> {
        let txid: String = self
            .call("createminerinfotx", json!([hex::encode(script.as_bytes())]))
            .await?;
        parse_hash(&txid)
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<TxAcceptance> {
        match self
            .call::<String>("sendrawtransaction", json!([tx.to_hex(), false, true]))
            .await
        {
            Ok(txid) => Ok(TxAcceptance::Accepted(parse_hash(&txid)?)),
            Err(e) => match e.downcast_ref::<RpcError>() {
                Some(rpc) if rpc.is_rejection() => {
                    debug!("{} rejected {}: {}", self.endpoint.label, tx.txid(), rpc);
                    Ok(TxAcceptance::Rejected(rpc.message.clone()))
                }
                _ => Err(e),
            },
        }
    }

    async fn submit_block(&self, block: &Block) -> Result<BlockAcceptance> {
        let result = self.call_value("submitblock", json!([block.to_hex()])).await?;
        Ok(match result {
            Value::Null => BlockAcceptance::Accepted,
            Value::String(reason) => BlockAcceptance::Rejected(reason),
            other => BlockAcceptance::Rejected(other.to_string()),
        })
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        let txids: Vec<String> = self.call("getrawmempool", json!([])).await?;
        txids.iter().map(|t| parse_hash(t)).collect()
    }

    async fn generate(&self, blocks: u64) -> Result<Vec<Hash>> {
        let hashes: Vec<String> = self.call("generate", json!([blocks])).await?;
        hashes.iter().map(|h| parse_hash(h)).collect()
    }

    async fn invalidate_block(&self, hash: &Hash) -> Result<()> {
        self.call_value("invalidateblock", json!([hash.to_string()]))
            .await?;
        Ok(())
    }

    async fn add_peer(&self, address: &str) -> Result<()> {
        self.call_value("addnode", json!([address, "onetry"])).await?;
        Ok(())
    }

    async fn disconnect_peer(&self, address: &str) -> Result<()> {
        self.call_value("disconnectnode", json!([address])).await?;
        Ok(())
    }

    async fn get_peers(&self) -> Result<Vec<String>> {
        let peers: Vec<PeerEntry> = self.call("getpeerinfo", json!([])).await?;
        Ok(peers.into_iter().map(|p| p.addr).collect())
    }
}
