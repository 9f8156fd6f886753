//! turn the shards of a file into confirmed blob transactions
//!
//! an upload is a two-stage pipeline:
//! - the producer encodes the file, proves every shard and packs the proven
//!   shards into groups of at most [`UploadParams::blobs_per_tx`]
//! - the consumer drives every group through [`GroupState`], one group at a
//!   time: signed, broadcast and finally confirmed
//!
//! the slot of the first confirmed transaction is where a download of the
//! file should start, see [`crate::stream::download_stream`].
use std::sync::Arc;

use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    beacon::{self, BlobSource},
    commitment::{prove_shard, CommitmentEngine, ProvenShard},
    config::UploadParams,
    error::BlobError,
    header::Seed,
    pipeline::{self, pause, Consumer},
    rpc::{Broadcast, ExecutionClient, Receipt},
    shard,
    tx::{self, Fees, SignedBlobTx},
};

/// a transaction that made it into a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedGroup {
    pub hash: B256,
    pub nonce: u64,
    pub block_number: u64,
    pub blobs: usize,
    pub blob_gas_used: u64,
    pub blob_gas_price: Option<u128>,
}

/// the life of a single group of shards.
#[derive(Debug)]
pub enum GroupState {
    Packing(Vec<ProvenShard>),
    AwaitingConfirmation(SignedBlobTx),
    Done(ConfirmedGroup),
}

/// what a successful upload reports back.
#[derive(Clone, Debug)]
pub struct UploadReport {
    /// where to start scanning to get the file back
    pub start_slot: u64,
    pub seed: Seed,
    pub shards: usize,
    pub total_blob_gas_used: u64,
    pub transactions: Vec<ConfirmedGroup>,
    pub elapsed: std::time::Duration,
}

/// drives groups of shards from [`GroupState::Packing`] to
/// [`GroupState::Done`].
pub struct Submitter<'a, X: ExecutionClient + ?Sized> {
    client: &'a X,
    params: &'a UploadParams,
    signer: PrivateKeySigner,
    cancel: CancellationToken,
}

impl<'a, X: ExecutionClient + ?Sized> Submitter<'a, X> {
    pub fn new(
        client: &'a X,
        params: &'a UploadParams,
        signer: PrivateKeySigner,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            params,
            signer,
            cancel,
        }
    }

    async fn fees(&self) -> Result<Fees, BlobError> {
        let max_fee_per_gas = match self.params.tx.max_fee_per_gas {
            Some(fee) => fee,
            None => self.client.gas_price().await?,
        };
        Ok(Fees {
            max_fee_per_gas,
            max_priority_fee_per_gas: self
                .params
                .tx
                .max_priority_fee_per_gas
                .unwrap_or(max_fee_per_gas),
        })
    }

    /// broadcasts the same signed transaction until the node takes it
    ///
    /// every attempt carries the same nonce, so a transaction that went
    /// through despite an error cannot be sent twice.
    async fn broadcast(&self, tx: &SignedBlobTx) -> Result<(), BlobError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.send_raw_transaction(&tx.raw).await {
                Ok(Broadcast::Accepted(hash)) => {
                    if hash != tx.hash {
                        warn!(expected = %tx.hash, returned = %hash, "node returned another hash");
                    }
                    return Ok(());
                }
                Ok(Broadcast::AlreadyKnown) => {
                    info!(hash = %tx.hash, "transaction already known by the node");
                    return Ok(());
                }
                Err(e) if attempt < self.params.max_submit_attempts => {
                    warn!(hash = %tx.hash, attempt, "broadcast failed: {}", e);
                    pause(&self.cancel, self.params.submit_retry_interval).await?;
                }
                Err(e) => {
                    let reason = match e {
                        BlobError::SubmissionFailure(reason) => reason,
                        other => other.to_string(),
                    };
                    return Err(BlobError::SubmissionFailure(format!(
                        "{} (gave up after {} attempts)",
                        reason, attempt
                    )));
                }
            }
        }
    }

    /// polls the receipt of `tx` until it shows up or the receipt timeout
    /// expires
    async fn confirm(&self, tx: &SignedBlobTx) -> Result<Receipt, BlobError> {
        let deadline = Instant::now() + self.params.receipt_timeout;
        loop {
            match self.client.transaction_receipt(tx.hash).await {
                Ok(Some(receipt)) if !receipt.success => {
                    return Err(BlobError::SubmissionFailure(format!(
                        "transaction {} failed in block {}",
                        tx.hash, receipt.block_number
                    )));
                }
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => debug!(hash = %tx.hash, "receipt not available yet"),
                Err(BlobError::Transport(e)) => {
                    warn!(hash = %tx.hash, "could not poll receipt: {}", e)
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(BlobError::Timeout(format!("the receipt of {}", tx.hash)));
            }
            pause(&self.cancel, self.params.receipt_poll_interval).await?;
        }
    }

    /// moves a group one state forward
    pub async fn step(&self, state: GroupState) -> Result<GroupState, BlobError> {
        match state {
            GroupState::Packing(group) => {
                let fees = self.fees().await?;
                let nonce = self.client.pending_nonce(self.signer.address()).await?;
                let tx = tx::build_and_sign(&group, &self.params.tx, fees, nonce, &self.signer)?;
                self.broadcast(&tx).await?;
                info!(hash = %tx.hash, nonce, blobs = tx.blobs, "transaction sent");
                Ok(GroupState::AwaitingConfirmation(tx))
            }
            GroupState::AwaitingConfirmation(tx) => {
                let receipt = self.confirm(&tx).await?;
                Ok(GroupState::Done(ConfirmedGroup {
                    hash: tx.hash,
                    nonce: tx.nonce,
                    block_number: receipt.block_number,
                    blobs: tx.blobs,
                    blob_gas_used: receipt.blob_gas_used,
                    blob_gas_price: receipt.blob_gas_price,
                }))
            }
            done @ GroupState::Done(_) => Ok(done),
        }
    }

    /// submits a group of shards and waits for it to be confirmed
    pub async fn submit(&self, group: Vec<ProvenShard>) -> Result<ConfirmedGroup, BlobError> {
        let mut state = GroupState::Packing(group);
        loop {
            state = match self.step(state).await? {
                GroupState::Done(confirmed) => return Ok(confirmed),
                next => next,
            };
        }
    }
}

/// what is already known about the slot of a block, so that a failed lookup
/// does not ask twice for the same thing
#[derive(Debug, Default)]
struct SlotLookup {
    timestamp: Option<u64>,
    genesis: Option<u64>,
    slot: Option<u64>,
}

impl SlotLookup {
    /// one lookup attempt, [`None`] while the beacon node does not know the
    /// slot yet
    async fn attempt<X, S>(
        &mut self,
        execution: &X,
        source: &S,
        block_number: u64,
        seconds_per_slot: u64,
    ) -> Result<Option<u64>, BlobError>
    where
        X: ExecutionClient + ?Sized,
        S: BlobSource + ?Sized,
    {
        let slot = match self.slot {
            Some(slot) => slot,
            None => {
                let timestamp = match self.timestamp {
                    Some(timestamp) => timestamp,
                    None => *self
                        .timestamp
                        .insert(execution.block_timestamp(block_number).await?),
                };
                let genesis = match self.genesis {
                    Some(genesis) => genesis,
                    None => *self.genesis.insert(source.genesis_time().await?),
                };
                let slot = beacon::slot_at(timestamp, genesis, seconds_per_slot).ok_or_else(|| {
                    BlobError::MalformedInput(format!(
                        "block {} is older than genesis",
                        block_number
                    ))
                })?;
                *self.slot.insert(slot)
            }
        };

        Ok(source.has_slot(slot).await?.then_some(slot))
    }
}

/// finds the slot of `block_number` and waits for the beacon node to know it
///
/// the block is already on chain when this runs, so every transport error is
/// retried until [`UploadParams::slot_lookup_timeout`].
pub async fn start_slot<X, S>(
    execution: &X,
    source: &S,
    block_number: u64,
    params: &UploadParams,
    cancel: &CancellationToken,
) -> Result<u64, BlobError>
where
    X: ExecutionClient + ?Sized,
    S: BlobSource + ?Sized,
{
    let mut lookup = SlotLookup::default();
    let deadline = Instant::now() + params.slot_lookup_timeout;
    loop {
        match lookup
            .attempt(execution, source, block_number, params.seconds_per_slot)
            .await
        {
            Ok(Some(slot)) => return Ok(slot),
            Ok(None) => debug!(block_number, slot = ?lookup.slot, "slot not indexed yet"),
            Err(BlobError::Transport(e)) => {
                warn!(block_number, "could not look the slot up: {}", e)
            }
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(BlobError::Timeout(format!(
                "the slot of block {} to be indexed",
                block_number
            )));
        }
        pause(cancel, params.slot_lookup_interval).await?;
    }
}

/// encodes, proves and packs `data` on a blocking thread
fn pack<C: CommitmentEngine + ?Sized + 'static>(
    encoder: shard::ShardEncoder,
    engine: Arc<C>,
    blobs_per_tx: usize,
    cancel: CancellationToken,
) -> Consumer<Vec<ProvenShard>> {
    pipeline::spawn_blocking(cancel, move |producer| {
        let mut group = Vec::with_capacity(blobs_per_tx);
        for shard in encoder {
            group.push(prove_shard(engine.as_ref(), shard)?);
            if group.len() == blobs_per_tx {
                producer.blocking_send(std::mem::replace(
                    &mut group,
                    Vec::with_capacity(blobs_per_tx),
                ))?;
            }
        }
        if !group.is_empty() {
            producer.blocking_send(group)?;
        }
        Ok(())
    })
}

/// stores `data` on chain
///
/// the input is checked before anything is sent over the network, in
/// particular a file that needs more than
/// [`shard::MAX_SHARDS_PER_FILE`] shards fails with
/// [`BlobError::ProtocolLimitExceeded`] right away.
pub async fn upload<C, X, S>(
    data: Bytes,
    params: &UploadParams,
    engine: Arc<C>,
    execution: &X,
    source: &S,
    cancel: CancellationToken,
) -> Result<UploadReport, BlobError>
where
    C: CommitmentEngine + ?Sized + 'static,
    X: ExecutionClient + ?Sized,
    S: BlobSource + ?Sized,
{
    let start = Instant::now();

    params.validate()?;
    let signer = tx::signer(&params.private_key)?;
    let encoder = shard::encode(data)?;
    let seed = encoder.seed();
    let shards = encoder.len();

    info!(
        shards,
        seed = %hex::encode(seed),
        from = %signer.address(),
        "uploading file"
    );

    let submitter = Submitter::new(execution, params, signer, cancel.clone());
    let mut groups = pack(encoder, engine, params.blobs_per_tx, cancel.clone());

    let mut transactions = Vec::new();
    let mut total_blob_gas_used = 0u64;
    let mut first_slot = None;

    while let Some(group) = groups.next().await {
        let confirmed = match group {
            Ok(group) => submitter.submit(group).await,
            Err(e) => Err(e),
        };
        let confirmed = match confirmed {
            Ok(confirmed) => confirmed,
            Err(e) => {
                error!(
                    confirmed = transactions.len(),
                    total_blob_gas_used, "upload failed: {}", e
                );
                return Err(e);
            }
        };

        info!(
            nonce = confirmed.nonce,
            hash = %confirmed.hash,
            block = confirmed.block_number,
            blob_gas_used = confirmed.blob_gas_used,
            blob_gas_price = ?confirmed.blob_gas_price,
            "transaction confirmed"
        );
        if let Some(explorer) = &params.explorer_url {
            info!("{}/tx/{}", explorer.trim_end_matches('/'), confirmed.hash);
        }

        total_blob_gas_used += confirmed.blob_gas_used;
        if first_slot.is_none() {
            let slot =
                start_slot(execution, source, confirmed.block_number, params, &cancel).await?;
            info!(slot, "file starts at slot");
            first_slot = Some(slot);
        }
        transactions.push(confirmed);
    }

    let start_slot =
        first_slot.ok_or_else(|| BlobError::SubmissionFailure("no shard was sent".to_string()))?;
    let elapsed = start.elapsed();
    info!(
        start_slot,
        shards,
        transactions = transactions.len(),
        total_blob_gas_used,
        ?elapsed,
        "upload done"
    );

    Ok(UploadReport {
        start_slot,
        seed,
        shards,
        total_blob_gas_used,
        transactions,
        elapsed,
    })
}
