//! split a file into shards, one shard per blob
//!
//! a shard is made of [`FIELD_ELEMENTS_PER_SHARD`] field elements: the first
//! one holds the [`crate::header`] and the others hold consecutive
//! [`USABLE_BYTES_PER_ELEMENT`]-byte chunks of the file.
use bytes::Bytes;
use rand::RngCore;
use tracing::{debug, info};

use crate::{
    error::BlobError,
    field::{
        merge_elements_into_bytes, split_data_into_field_elements, FieldElement,
        BYTES_PER_FIELD_ELEMENT, USABLE_BYTES_PER_ELEMENT,
    },
    header::{self, MagicHeader, Seed},
};

/// the number of field elements in a blob
pub const FIELD_ELEMENTS_PER_SHARD: usize = 4096;
/// the size of a serialized shard, i.e. of a blob
pub const BYTES_PER_SHARD: usize = FIELD_ELEMENTS_PER_SHARD * BYTES_PER_FIELD_ELEMENT;
/// the number of bytes of a file a single shard can carry
pub const SHARD_CAPACITY: usize = (FIELD_ELEMENTS_PER_SHARD - 1) * USABLE_BYTES_PER_ELEMENT;
/// the shard index is a single byte in the header
pub const MAX_SHARDS_PER_FILE: usize = u8::MAX as usize;
/// the maximum number of blobs a single transaction can carry
pub const MAX_SHARDS_PER_TX: usize = 8;

/// one blob worth of field elements.
#[derive(Clone, PartialEq, Eq)]
pub struct Shard(Box<[u8]>);

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("header", &self.header())
            .field("size", &self.0.len())
            .finish()
    }
}

impl Shard {
    /// wraps raw bytes, as found on chain, into a shard
    ///
    /// fails with [`BlobError::MalformedInput`] if `bytes` is not exactly
    /// [`BYTES_PER_SHARD`] long.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BlobError> {
        if bytes.len() != BYTES_PER_SHARD {
            return Err(BlobError::MalformedInput(format!(
                "a shard should be {} bytes, found {}",
                BYTES_PER_SHARD,
                bytes.len()
            )));
        }
        Ok(Shard(bytes.into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// the framing header of the shard, if any
    pub fn header(&self) -> Option<MagicHeader> {
        header::parse(&self.0)
    }

    /// iterates over the field elements of the shard, header included
    pub fn elements(&self) -> impl Iterator<Item = FieldElement> + '_ {
        self.0.chunks_exact(BYTES_PER_FIELD_ELEMENT).map(|c| {
            let mut element = [0u8; BYTES_PER_FIELD_ELEMENT];
            element.copy_from_slice(c);
            FieldElement::from_bytes(element)
        })
    }

    /// the [`SHARD_CAPACITY`] payload bytes of the shard, i.e. everything but
    /// the header, zero padding included.
    pub fn payload(&self) -> Vec<u8> {
        let elements: Vec<_> = self.elements().skip(1).collect();
        merge_elements_into_bytes(&elements)
    }
}

/// the number of shards required to carry `len` bytes
///
/// empty data still needs a single shard that carries only the header.
pub fn total_shards(len: usize) -> usize {
    len.div_ceil(SHARD_CAPACITY).max(1)
}

/// draws the random seed of a new file
pub fn random_seed() -> Seed {
    let mut seed = Seed::default();
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

/// lazily turns a file into its ordered sequence of shards.
///
/// each shard is built only when requested and yielded exactly once, in
/// increasing index order.
pub struct ShardEncoder {
    data: Bytes,
    seed: Seed,
    total_shards: u8,
    next: usize,
}

impl ShardEncoder {
    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub fn total_shards(&self) -> u8 {
        self.total_shards
    }

    fn build(&self, index: usize) -> Shard {
        let mut bytes = Vec::with_capacity(BYTES_PER_SHARD);
        let header = MagicHeader::new(index as u8, self.total_shards, self.seed);
        bytes.extend_from_slice(&header.to_bytes());

        let start = (index * SHARD_CAPACITY).min(self.data.len());
        let end = (start + SHARD_CAPACITY).min(self.data.len());
        for element in split_data_into_field_elements(&self.data[start..end]) {
            bytes.extend_from_slice(element.as_bytes());
        }
        bytes.resize(BYTES_PER_SHARD, 0);

        Shard(bytes.into_boxed_slice())
    }
}

impl Iterator for ShardEncoder {
    type Item = Shard;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total_shards as usize {
            return None;
        }
        let shard = self.build(self.next);
        debug!(index = self.next, total = self.total_shards, "shard encoded");
        self.next += 1;
        Some(shard)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_shards as usize - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ShardEncoder {}

/// encodes `data` with a fresh random seed, see [`encode_with_seed`]
pub fn encode(data: impl Into<Bytes>) -> Result<ShardEncoder, BlobError> {
    encode_with_seed(data, random_seed())
}

/// encodes `data` into shards that all carry `seed` in their header
///
/// fails with [`BlobError::ProtocolLimitExceeded`] if the data would need more
/// than [`MAX_SHARDS_PER_FILE`] shards. nothing is encoded before the shards
/// are pulled from the returned iterator.
pub fn encode_with_seed(data: impl Into<Bytes>, seed: Seed) -> Result<ShardEncoder, BlobError> {
    let data = data.into();
    let total = total_shards(data.len());
    if total > MAX_SHARDS_PER_FILE {
        return Err(BlobError::ProtocolLimitExceeded(total));
    }

    info!(
        size = data.len(),
        shards = total,
        seed = %hex::encode(seed),
        "encoding file"
    );

    Ok(ShardEncoder {
        data,
        seed,
        total_shards: total as u8,
        next: 0,
    })
}
