//! put the payloads of the shards of a file back together
//!
//! shards are expected in increasing index order, starting at $0$, and the
//! bytes of each one are released as soon as it arrives.
//!
//! the end of the file is only known once its last shard has been seen, so
//! the trailing zero bytes of the whole file cannot be told apart from the
//! zero padding of the last shard. the reassembler holds every run of zero
//! bytes back until some non-zero byte follows it, and drops whatever run is
//! left at the end.
//!
//! > **Note**
//! >
//! > this means that the genuine trailing zeros of a file are lost.
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::{error::BlobError, shard::Shard};

/// the reassembly state of a single file.
#[derive(Debug, Default)]
pub struct Reassembler {
    next_index: usize,
    total_shards: Option<u8>,
    held_zeros: usize,
    written: u64,
    complete: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// whether the last shard of the file has been pushed
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// the number of bytes released so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// takes the next shard of the file and returns the bytes that can be
    /// released right away, possibly none
    ///
    /// a shard that has already been pushed is skipped. any other shard
    /// arriving out of order fails with [`BlobError::OutOfOrder`] and a shard
    /// that disagrees on the number of shards fails with
    /// [`BlobError::MalformedInput`].
    pub fn push(&mut self, shard: &Shard) -> Result<Bytes, BlobError> {
        let header = shard
            .header()
            .ok_or_else(|| BlobError::MalformedInput("shard without header".to_string()))?;
        let index = header.shard_index as usize;

        if self.complete {
            return Err(BlobError::MalformedInput(format!(
                "shard {} arrived after the last shard",
                index
            )));
        }

        match self.total_shards {
            None => self.total_shards = Some(header.total_shards),
            Some(total) if total != header.total_shards => {
                return Err(BlobError::MalformedInput(format!(
                    "shard {} belongs to a file of {} shards, expected {}",
                    index, header.total_shards, total
                )));
            }
            Some(_) => {}
        }
        if index >= header.total_shards as usize {
            return Err(BlobError::MalformedInput(format!(
                "shard {} is out of a file of {} shards",
                index, header.total_shards
            )));
        }

        if index < self.next_index {
            warn!(index, "shard already reassembled, skipping");
            return Ok(Bytes::new());
        }
        if index > self.next_index {
            return Err(BlobError::OutOfOrder {
                expected: self.next_index as u8,
                found: header.shard_index,
            });
        }

        let payload = shard.payload();
        let chunk = match payload.iter().rposition(|&b| b != 0) {
            None => {
                self.held_zeros += payload.len();
                Bytes::new()
            }
            Some(last) => {
                let mut chunk = BytesMut::with_capacity(self.held_zeros + last + 1);
                chunk.resize(self.held_zeros, 0);
                chunk.extend_from_slice(&payload[..=last]);
                self.held_zeros = payload.len() - last - 1;
                chunk.freeze()
            }
        };

        self.written += chunk.len() as u64;
        self.next_index += 1;
        self.complete = header.is_last();
        debug!(index, released = chunk.len(), held = self.held_zeros, "shard reassembled");

        Ok(chunk)
    }

    /// ends the reassembly, dropping the zero bytes still held back
    ///
    /// fails with [`BlobError::MalformedInput`] if the last shard is missing.
    pub fn finish(self) -> Result<u64, BlobError> {
        if !self.complete {
            return Err(BlobError::MalformedInput(format!(
                "file is incomplete, {} shard(s) out of {} received",
                self.next_index,
                self.total_shards.map_or("?".to_string(), |t| t.to_string())
            )));
        }
        debug!(trimmed = self.held_zeros, written = self.written, "file reassembled");
        Ok(self.written)
    }
}
