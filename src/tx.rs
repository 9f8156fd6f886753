//! build and sign the blob transaction of a group of shards
//!
//! a group of at most [`MAX_SHARDS_PER_TX`] proven shards becomes a single
//! EIP-4844 transaction: the body references the versioned hashes of the
//! shards and the sidecar carries the shards themselves, along with their
//! commitments and proofs.
use std::str::FromStr;

use alloy_consensus::{
    EthereumTxEnvelope, SignableTransaction, TxEip4844, TxEip4844Variant, TxEip4844WithSidecar,
};
use alloy_eips::{
    eip2718::Encodable2718,
    eip4844::{Blob, BlobTransactionSidecar, Bytes48},
};
use alloy_primitives::B256;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use tracing::debug;

use crate::{
    commitment::ProvenShard, config::TxParams, error::BlobError, shard::MAX_SHARDS_PER_TX,
};

/// the network form of a blob transaction, sidecar included
pub type BlobTxEnvelope = EthereumTxEnvelope<TxEip4844Variant<BlobTransactionSidecar>>;

/// the gas fees of a transaction, once settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// a signed blob transaction, ready to be broadcast.
#[derive(Clone, Debug)]
pub struct SignedBlobTx {
    pub hash: B256,
    pub nonce: u64,
    /// the EIP-2718 network encoding, sidecar included
    pub raw: Vec<u8>,
    pub blobs: usize,
}

/// parses a hex-encoded private key, with or without `0x`
pub fn signer(private_key: &str) -> Result<PrivateKeySigner, BlobError> {
    PrivateKeySigner::from_str(private_key.trim())
        .map_err(|e| BlobError::InvalidParameter(format!("invalid private key: {}", e)))
}

fn sidecar(group: &[ProvenShard]) -> Result<BlobTransactionSidecar, BlobError> {
    let mut blobs = Vec::with_capacity(group.len());
    let mut commitments = Vec::with_capacity(group.len());
    let mut proofs = Vec::with_capacity(group.len());

    for proven in group {
        let blob = Blob::try_from(proven.shard.as_bytes())
            .map_err(|e| BlobError::MalformedInput(format!("shard is not a blob: {}", e)))?;
        blobs.push(blob);
        commitments.push(Bytes48::from(proven.commitment.0));
        proofs.push(Bytes48::from(proven.proof.0));
    }

    Ok(BlobTransactionSidecar::new(blobs, commitments, proofs))
}

/// builds the transaction that carries `group` and signs it with `signer`
///
/// fails with [`BlobError::InvalidParameter`] if `group` is empty or larger
/// than [`MAX_SHARDS_PER_TX`].
pub fn build_and_sign(
    group: &[ProvenShard],
    params: &TxParams,
    fees: Fees,
    nonce: u64,
    signer: &PrivateKeySigner,
) -> Result<SignedBlobTx, BlobError> {
    if group.is_empty() || group.len() > MAX_SHARDS_PER_TX {
        return Err(BlobError::InvalidParameter(format!(
            "a transaction carries between 1 and {} blobs, found {}",
            MAX_SHARDS_PER_TX,
            group.len()
        )));
    }

    let tx = TxEip4844 {
        chain_id: params.chain_id,
        nonce,
        gas_limit: params.gas_limit,
        max_fee_per_gas: fees.max_fee_per_gas,
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        to: params.to,
        value: params.value,
        access_list: Default::default(),
        blob_versioned_hashes: group.iter().map(|p| p.versioned_hash).collect(),
        max_fee_per_blob_gas: params.max_fee_per_blob_gas,
        input: params.calldata.clone(),
    };
    let tx = TxEip4844Variant::TxEip4844WithSidecar(TxEip4844WithSidecar::from_tx_and_sidecar(
        tx,
        sidecar(group)?,
    ));

    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| BlobError::SubmissionFailure(format!("could not sign: {}", e)))?;
    let signed = tx.into_signed(signature);
    let hash = *signed.hash();

    let raw = BlobTxEnvelope::Eip4844(signed).encoded_2718();
    debug!(%hash, nonce, blobs = group.len(), size = raw.len(), "blob transaction signed");

    Ok(SignedBlobTx {
        hash,
        nonce,
        raw,
        blobs: group.len(),
    })
}
