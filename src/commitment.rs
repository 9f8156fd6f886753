//! commit to shards and derive their _versioned hashes_
//!
//! the polynomial commitment scheme itself is an external primitive, seen
//! through the [`CommitmentEngine`] trait. the default engine is [`KzgEngine`],
//! backed by `c-kzg` and the Ethereum trusted setup.
//!
//! the derivation of versioned hashes from commitments is done here, as per
//! [EIP-4844](https://eips.ethereum.org/EIPS/eip-4844#helpers):
//!
//! $$ \text{vh}(c) = \texttt{0x01} \| \text{sha256}(c)[1..] $$
use alloy_primitives::B256;
use rs_merkle::{algorithms::Sha256, Hasher};
use tracing::debug;

use crate::{
    error::BlobError,
    shard::{Shard, BYTES_PER_SHARD},
};

pub const BYTES_PER_COMMITMENT: usize = 48;
pub const BYTES_PER_PROOF: usize = 48;
/// the version of versioned hashes for KZG commitments
pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

/// a commitment to a shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commitment(pub [u8; BYTES_PER_COMMITMENT]);

/// a proof that a shard matches its [`Commitment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Proof(pub [u8; BYTES_PER_PROOF]);

/// the two primitives of the commitment scheme used by Blobcast.
///
/// both fail with [`BlobError::MalformedInput`] when `shard` is not exactly
/// [`BYTES_PER_SHARD`] long.
pub trait CommitmentEngine: Send + Sync {
    fn commit(&self, shard: &[u8]) -> Result<Commitment, BlobError>;
    fn prove(&self, shard: &[u8], commitment: &Commitment) -> Result<Proof, BlobError>;
}

/// computes the versioned hash of a commitment
pub fn versioned_hash(commitment: &Commitment) -> B256 {
    let mut hash = Sha256::hash(&commitment.0);
    hash[0] = VERSIONED_HASH_VERSION_KZG;
    B256::from(hash)
}

pub(crate) fn check_shard_length(shard: &[u8]) -> Result<(), BlobError> {
    if shard.len() != BYTES_PER_SHARD {
        return Err(BlobError::MalformedInput(format!(
            "cannot commit to {} bytes, a shard is {} bytes",
            shard.len(),
            BYTES_PER_SHARD
        )));
    }
    Ok(())
}

/// representation of a shard ready to be sent on chain.
///
/// this is a wrapper around a [`Shard`] with the cryptographic material that
/// goes into the sidecar and the body of a blob transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvenShard {
    pub shard: Shard,
    pub commitment: Commitment,
    pub proof: Proof,
    pub versioned_hash: B256,
}

/// commits to a shard, proves it and derives its versioned hash
pub fn prove_shard(
    engine: &(impl CommitmentEngine + ?Sized),
    shard: Shard,
) -> Result<ProvenShard, BlobError> {
    let commitment = engine.commit(shard.as_bytes())?;
    let proof = engine.prove(shard.as_bytes(), &commitment)?;
    let versioned_hash = versioned_hash(&commitment);
    debug!(%versioned_hash, "shard proven");

    Ok(ProvenShard {
        shard,
        commitment,
        proof,
        versioned_hash,
    })
}

/// a [`CommitmentEngine`] backed by `c-kzg` and the Ethereum trusted setup.
#[derive(Clone, Copy)]
pub struct KzgEngine {
    settings: &'static c_kzg::KzgSettings,
}

impl KzgEngine {
    pub fn ethereum() -> Self {
        Self {
            settings: c_kzg::ethereum_kzg_settings(0),
        }
    }

    fn blob(shard: &[u8]) -> Result<c_kzg::Blob, BlobError> {
        check_shard_length(shard)?;
        c_kzg::Blob::from_bytes(shard)
            .map_err(|e| BlobError::MalformedInput(format!("invalid blob: {:?}", e)))
    }
}

impl Default for KzgEngine {
    fn default() -> Self {
        Self::ethereum()
    }
}

impl CommitmentEngine for KzgEngine {
    fn commit(&self, shard: &[u8]) -> Result<Commitment, BlobError> {
        let blob = Self::blob(shard)?;
        let commitment = self
            .settings
            .blob_to_kzg_commitment(&blob)
            .map_err(|e| BlobError::MalformedInput(format!("commitment failed: {:?}", e)))?;

        let mut bytes = [0u8; BYTES_PER_COMMITMENT];
        bytes.copy_from_slice(commitment.to_bytes().as_slice());
        Ok(Commitment(bytes))
    }

    fn prove(&self, shard: &[u8], commitment: &Commitment) -> Result<Proof, BlobError> {
        let blob = Self::blob(shard)?;
        let proof = self
            .settings
            .compute_blob_kzg_proof(&blob, &c_kzg::Bytes48::new(commitment.0))
            .map_err(|e| BlobError::MalformedInput(format!("proof failed: {:?}", e)))?;

        let mut bytes = [0u8; BYTES_PER_PROOF];
        bytes.copy_from_slice(proof.to_bytes().as_slice());
        Ok(Proof(bytes))
    }
}


#[cfg(test)]
mod tests {
    use ark_std::rand::RngCore;
    use rs_merkle::{algorithms::Sha256, Hasher};

    use crate::{error::BlobError, shard};

    use super::{
        prove_shard, testing::HashEngine, versioned_hash, Commitment, CommitmentEngine,
        KzgEngine,
    };

    #[test]
    fn versioned_hash_layout() {
        let mut rng = ark_std::test_rng();

        for _ in 0..32 {
            let mut bytes = [0u8; 48];
            rng.fill_bytes(&mut bytes);
            let commitment = Commitment(bytes);

            let hash = versioned_hash(&commitment);
            let digest = Sha256::hash(&bytes);
            assert_eq!(hash[0], 0x01);
            assert_eq!(hash[1..], digest[1..]);
        }
    }

    fn wrong_length_template(engine: &impl CommitmentEngine) {
        for len in [0, 32, shard::BYTES_PER_SHARD - 1, shard::BYTES_PER_SHARD + 1] {
            assert!(
                matches!(engine.commit(&vec![0; len]), Err(BlobError::MalformedInput(_))),
                "TEST | commit on {len} bytes"
            );
            assert!(
                matches!(
                    engine.prove(&vec![0; len], &Commitment([0; 48])),
                    Err(BlobError::MalformedInput(_))
                ),
                "TEST | prove on {len} bytes"
            );
        }
    }

    #[test]
    fn wrong_length() {
        wrong_length_template(&HashEngine);
        wrong_length_template(&KzgEngine::ethereum());
    }

    #[test]
    fn kzg_proven_shard() {
        let engine = KzgEngine::ethereum();
        let shard = shard::encode(b"hello blobs".to_vec())
            .unwrap()
            .next()
            .unwrap();

        let proven = prove_shard(&engine, shard.clone()).unwrap();
        assert_eq!(proven.shard, shard);
        assert_eq!(proven.versioned_hash, versioned_hash(&proven.commitment));
        assert_eq!(proven.commitment, engine.commit(shard.as_bytes()).unwrap());

        assert_ne!(proven.commitment.0, [0u8; 48]);
        assert_ne!(proven.proof.0, [0u8; 48]);
    }
}
