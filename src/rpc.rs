//! the execution node, seen as the sink of blob transactions
//!
//! the [`ExecutionClient`] trait is the only thing the submitter knows about
//! the execution layer. [`RpcClient`] implements it on top of JSON-RPC over
//! HTTP.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{config::parse_quantity, error::BlobError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// the outcome of a successful broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Broadcast {
    Accepted(B256),
    /// the node already had the transaction in its pool, e.g. when a previous
    /// attempt went through but its answer got lost
    AlreadyKnown,
}

/// a receipt field that a node did not encode as the standard says.
///
/// such a field is tolerated instead of failing the whole upload, but only
/// for the cases listed here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptQuirk {
    /// `blobGasUsed` was not a hex quantity and is counted as $0$
    UndecodableBlobGasUsed(String),
}

/// the parts of a transaction receipt Blobcast cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub blob_gas_used: u64,
    pub blob_gas_price: Option<u128>,
    pub quirk: Option<ReceiptQuirk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    block_number: String,
    status: Option<String>,
    blob_gas_used: Option<Value>,
    blob_gas_price: Option<Value>,
}

fn quantity_u64(value: &str, field: &str) -> Result<u64, BlobError> {
    let quantity = parse_quantity(value)
        .map_err(|e| BlobError::MalformedInput(format!("receipt field {}: {}", field, e)))?;
    u64::try_from(quantity)
        .map_err(|_| BlobError::MalformedInput(format!("receipt field {} overflows", field)))
}

impl Receipt {
    /// decodes the JSON receipt returned by `eth_getTransactionReceipt`
    pub fn from_json(value: Value) -> Result<Self, BlobError> {
        let raw: RawReceipt = serde_json::from_value(value)
            .map_err(|e| BlobError::MalformedInput(format!("invalid receipt: {}", e)))?;

        let block_number = quantity_u64(&raw.block_number, "blockNumber")?;
        let success = match raw.status.as_deref() {
            Some(status) => quantity_u64(status, "status")? == 1,
            // pre-byzantium receipts have no status
            None => true,
        };

        let (blob_gas_used, quirk) = match raw.blob_gas_used {
            None | Some(Value::Null) => (0, None),
            Some(value) => match value.as_str().map(|s| quantity_u64(s, "blobGasUsed")) {
                Some(Ok(used)) => (used, None),
                _ => {
                    warn!(%value, "could not decode blobGasUsed, counting it as 0");
                    (0, Some(ReceiptQuirk::UndecodableBlobGasUsed(value.to_string())))
                }
            },
        };

        let blob_gas_price = match raw.blob_gas_price {
            Some(Value::String(s)) => parse_quantity(&s).ok(),
            _ => None,
        };

        Ok(Receipt {
            transaction_hash: raw.transaction_hash,
            block_number,
            success,
            blob_gas_used,
            blob_gas_price,
            quirk,
        })
    }
}

/// the operations of an execution node used during an upload.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// the next nonce of `address`, pending transactions included
    async fn pending_nonce(&self, address: Address) -> Result<u64, BlobError>;
    /// the suggested price of gas
    async fn gas_price(&self) -> Result<u128, BlobError>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Broadcast, BlobError>;
    /// [`None`] while the transaction is not part of a block
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, BlobError>;
    async fn block_timestamp(&self, number: u64) -> Result<u64, BlobError>;
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Value,
    error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

/// whether a node error means that the transaction is already in its pool
fn is_already_known(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("already known") || message.contains("alreadyknown")
}

/// a JSON-RPC client for an execution node.
pub struct RpcClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, BlobError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// performs a single call, node-side errors are returned as the inner
    /// [`Err`]
    async fn call_raw(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Result<Value, ErrorObject>, BlobError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(method, id = request.id, "JSON-RPC call");

        let response: Response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.error {
            Some(error) => Ok(Err(error)),
            None => Ok(Ok(response.result)),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, BlobError> {
        let result = self.call_raw(method, params).await?.map_err(|e| {
            BlobError::Transport(format!("{} failed with code {}: {}", method, e.code, e.message))
        })?;
        serde_json::from_value(result)
            .map_err(|e| BlobError::MalformedInput(format!("unexpected {} result: {}", method, e)))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, BlobError> {
        let value: String = self.call(method, params).await?;
        parse_quantity(&value).map_err(|e| BlobError::MalformedInput(e.to_string()))
    }
}

#[async_trait]
impl ExecutionClient for RpcClient {
    async fn pending_nonce(&self, address: Address) -> Result<u64, BlobError> {
        let nonce = self
            .quantity("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        u64::try_from(nonce).map_err(|_| BlobError::MalformedInput("nonce overflows".to_string()))
    }

    async fn gas_price(&self) -> Result<u128, BlobError> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Broadcast, BlobError> {
        let params = json!([format!("0x{}", hex::encode(raw))]);
        match self.call_raw("eth_sendRawTransaction", params).await? {
            Ok(hash) => {
                let hash: B256 = serde_json::from_value(hash).map_err(|e| {
                    BlobError::MalformedInput(format!("unexpected transaction hash: {}", e))
                })?;
                Ok(Broadcast::Accepted(hash))
            }
            Err(e) if is_already_known(&e.message) => Ok(Broadcast::AlreadyKnown),
            Err(e) => Err(BlobError::SubmissionFailure(format!(
                "node rejected the transaction with code {}: {}",
                e.code, e.message
            ))),
        }
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, BlobError> {
        let receipt: Value = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if receipt.is_null() {
            return Ok(None);
        }
        Receipt::from_json(receipt).map(Some)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, BlobError> {
        let block: Value = self
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?;
        let timestamp = block
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| BlobError::Transport(format!("block {} not found", number)))?;
        let timestamp =
            parse_quantity(timestamp).map_err(|e| BlobError::MalformedInput(e.to_string()))?;
        u64::try_from(timestamp)
            .map_err(|_| BlobError::MalformedInput("block timestamp overflows".to_string()))
    }
}
