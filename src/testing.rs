//! an in-memory chain, both execution node and beacon node
//!
//! every accepted blob transaction lands in its own slot and blocks are
//! numbered [`BLOCK_OFFSET`] above their slot.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Mutex,
};

use alloy_consensus::TxEip4844Variant;
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde_json::json;

use crate::{
    beacon::{BlobSource, SlotResponse},
    error::BlobError,
    rpc::{Broadcast, ExecutionClient, Receipt},
    shard::{Shard, BYTES_PER_SHARD},
    tx::BlobTxEnvelope,
};

pub(crate) const GENESIS_TIME: u64 = 1_606_824_023;
pub(crate) const BLOCK_OFFSET: u64 = 1_000;
pub(crate) const SECONDS_PER_SLOT: u64 = 12;
pub(crate) const GAS_PRICE: u128 = 1_000_000_000;

#[derive(Default)]
struct State {
    slots: BTreeMap<u64, Vec<String>>,
    missing: BTreeSet<u64>,
    next_slot: u64,
    nonce: u64,
    receipts: HashMap<B256, (u64, usize)>,
    fetched: Vec<u64>,
    network_calls: usize,
    sent: usize,
    failing_sends: usize,
    receipt_misses: usize,
    reverting: bool,
    quirky_receipts: bool,
    nonces: Vec<u64>,
    failing_timestamps: usize,
    failing_genesis: usize,
    failing_heads: usize,
}

/// takes one failure out of `budget`, if any is left
fn fail(budget: &mut usize, what: &str) -> Result<(), BlobError> {
    if *budget == 0 {
        return Ok(());
    }
    *budget -= 1;
    Err(BlobError::Transport(format!("{}: connection reset", what)))
}

#[derive(Default)]
pub(crate) struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    /// a chain whose next transaction lands at `slot`
    pub(crate) fn starting_at(slot: u64) -> Self {
        let chain = Self::default();
        chain.with(|s| s.next_slot = slot);
        chain
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// puts raw blobs in `slot` without any transaction
    pub(crate) fn insert_blobs(&self, slot: u64, blobs: &[Vec<u8>]) {
        self.with(|s| {
            let entries = s.slots.entry(slot).or_default();
            entries.extend(blobs.iter().map(|b| format!("0x{}", hex::encode(b))));
            s.next_slot = s.next_slot.max(slot + 1);
        })
    }

    pub(crate) fn insert_shards(&self, slot: u64, shards: &[Shard]) {
        let blobs: Vec<_> = shards.iter().map(|s| s.as_bytes().to_vec()).collect();
        self.insert_blobs(slot, &blobs);
    }

    /// puts a raw hex entry in `slot`, e.g. a broken one
    pub(crate) fn insert_entry(&self, slot: u64, entry: &str) {
        self.with(|s| {
            s.slots.entry(slot).or_default().push(entry.to_string());
            s.next_slot = s.next_slot.max(slot + 1);
        })
    }

    /// makes `slot` answer with a 404, as a missed slot would
    pub(crate) fn miss_slot(&self, slot: u64) {
        self.with(|s| {
            s.missing.insert(slot);
        })
    }

    /// moves the head of the chain to `slot` at least
    pub(crate) fn advance_to(&self, slot: u64) {
        self.with(|s| s.next_slot = s.next_slot.max(slot + 1))
    }

    pub(crate) fn fail_next_sends(&self, n: usize) {
        self.with(|s| s.failing_sends = n)
    }

    /// makes the next `n` calls to `eth_getBlockByNumber` fail
    pub(crate) fn fail_next_block_timestamps(&self, n: usize) {
        self.with(|s| s.failing_timestamps = n)
    }

    pub(crate) fn fail_next_genesis(&self, n: usize) {
        self.with(|s| s.failing_genesis = n)
    }

    pub(crate) fn fail_next_head_lookups(&self, n: usize) {
        self.with(|s| s.failing_heads = n)
    }

    pub(crate) fn delay_receipts(&self, polls: usize) {
        self.with(|s| s.receipt_misses = polls)
    }

    pub(crate) fn revert_transactions(&self) {
        self.with(|s| s.reverting = true)
    }

    /// makes receipts carry a plain JSON number as `blobGasUsed`
    pub(crate) fn quirky_receipts(&self) {
        self.with(|s| s.quirky_receipts = true)
    }

    pub(crate) fn fetched_slots(&self) -> Vec<u64> {
        self.with(|s| s.fetched.clone())
    }

    pub(crate) fn network_calls(&self) -> usize {
        self.with(|s| s.network_calls)
    }

    /// the number of accepted transactions
    pub(crate) fn sent(&self) -> usize {
        self.with(|s| s.sent)
    }

    /// the nonce of every broadcast, failed ones included
    pub(crate) fn broadcast_nonces(&self) -> Vec<u64> {
        self.with(|s| s.nonces.clone())
    }

    fn head(state: &State) -> u64 {
        state.next_slot.saturating_sub(1)
    }
}

#[async_trait]
impl ExecutionClient for MockChain {
    async fn pending_nonce(&self, _address: Address) -> Result<u64, BlobError> {
        Ok(self.with(|s| {
            s.network_calls += 1;
            s.nonce
        }))
    }

    async fn gas_price(&self) -> Result<u128, BlobError> {
        self.with(|s| s.network_calls += 1);
        Ok(GAS_PRICE)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Broadcast, BlobError> {
        let envelope = BlobTxEnvelope::decode_2718(&mut &raw[..])
            .map_err(|e| BlobError::SubmissionFailure(format!("undecodable: {}", e)))?;
        let hash = *envelope.tx_hash();
        let tx = envelope.as_eip4844().map(|signed| signed.tx());
        let Some(TxEip4844Variant::TxEip4844WithSidecar(tx)) = tx else {
            return Err(BlobError::SubmissionFailure(
                "not a blob transaction with a sidecar".to_string(),
            ));
        };
        let nonce = tx.tx.nonce;
        let sidecar = tx.sidecar.clone();

        self.with(|s| {
            s.network_calls += 1;
            s.nonces.push(nonce);
            if s.failing_sends > 0 {
                s.failing_sends -= 1;
                return Err(BlobError::Transport("connection reset by peer".to_string()));
            }
            if s.receipts.contains_key(&hash) {
                return Ok(Broadcast::AlreadyKnown);
            }
            if nonce != s.nonce {
                return Err(BlobError::SubmissionFailure("nonce too low".to_string()));
            }

            let slot = s.next_slot;
            let blobs = sidecar
                .blobs
                .iter()
                .map(|b| format!("0x{}", hex::encode(b.as_slice())))
                .collect();
            s.slots.insert(slot, blobs);
            s.receipts.insert(hash, (slot, sidecar.blobs.len()));
            s.next_slot += 1;
            s.nonce += 1;
            s.sent += 1;
            Ok(Broadcast::Accepted(hash))
        })
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, BlobError> {
        let receipt = self.with(|s| {
            s.network_calls += 1;
            if s.receipt_misses > 0 {
                s.receipt_misses -= 1;
                return None;
            }
            s.receipts
                .get(&hash)
                .map(|&(slot, blobs)| (slot, blobs, s.reverting, s.quirky_receipts))
        });

        let Some((slot, blobs, reverting, quirky)) = receipt else {
            return Ok(None);
        };
        let blob_gas_used = (blobs * BYTES_PER_SHARD) as u64;
        let blob_gas_used = if quirky {
            json!(blob_gas_used)
        } else {
            json!(format!("0x{:x}", blob_gas_used))
        };
        let status = if reverting { "0x0" } else { "0x1" };
        Receipt::from_json(json!({
            "transactionHash": hash,
            "blockNumber": format!("0x{:x}", slot + BLOCK_OFFSET),
            "status": status,
            "blobGasUsed": blob_gas_used,
            "blobGasPrice": "0x1",
        }))
        .map(Some)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, BlobError> {
        self.with(|s| {
            s.network_calls += 1;
            fail(&mut s.failing_timestamps, "block")
        })?;
        let slot = number
            .checked_sub(BLOCK_OFFSET)
            .ok_or_else(|| BlobError::Transport(format!("block {} not found", number)))?;
        Ok(GENESIS_TIME + slot * SECONDS_PER_SLOT + 3)
    }
}

#[async_trait]
impl BlobSource for MockChain {
    async fn blob_sidecars(&self, slot: u64) -> Result<SlotResponse, BlobError> {
        Ok(self.with(|s| {
            s.network_calls += 1;
            s.fetched.push(slot);
            if s.missing.contains(&slot) || slot > Self::head(s) {
                return SlotResponse::Missing { status: 404 };
            }
            SlotResponse::Blobs(s.slots.get(&slot).cloned().unwrap_or_default())
        }))
    }

    async fn head_slot(&self) -> Result<u64, BlobError> {
        self.with(|s| {
            s.network_calls += 1;
            fail(&mut s.failing_heads, "head")?;
            Ok(Self::head(s))
        })
    }

    async fn genesis_time(&self) -> Result<u64, BlobError> {
        self.with(|s| {
            s.network_calls += 1;
            fail(&mut s.failing_genesis, "genesis")
        })?;
        Ok(GENESIS_TIME)
    }

    async fn has_slot(&self, slot: u64) -> Result<bool, BlobError> {
        Ok(self.with(|s| {
            s.network_calls += 1;
            slot <= Self::head(s) && !s.missing.contains(&slot)
        }))
    }
}
