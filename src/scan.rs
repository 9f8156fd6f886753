//! walk the chain, slot after slot, looking for the shards of a file
//!
//! the scanner does not know in advance which file it is looking for: the
//! first shard it finds sets the seed of the session and every other shard
//! with another seed is skipped, as is everything that is not a shard at all.
//!
//! the scan stops right after the last shard of the file, i.e. the one whose
//! index is `total_shards - 1`, without fetching a single slot more.
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    beacon::{BlobSource, SlotResponse},
    config::{ScanParams, SlotPolicy},
    error::BlobError,
    fs,
    header::{self, MagicHeader, Seed},
    pipeline::{self, pause, Consumer, Producer},
    shard::Shard,
};

/// why a blob of a slot is not part of the file being scanned.
///
/// this is not an error, the scan goes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    /// the blob does not start with [`header::MAGIC_TAG`]
    NoMagicTag,
    /// the blob is a shard of another file
    SeedMismatch { expected: Seed, found: Seed },
}

/// a shard of the file, as found on chain.
#[derive(Clone, Debug, PartialEq)]
pub struct ScannedShard {
    pub slot: u64,
    pub header: MagicHeader,
    pub shard: Shard,
}

/// decodes a hex-encoded blob, with or without `0x`
pub fn decode_blob(entry: &str) -> Result<Vec<u8>, BlobError> {
    let hex = entry.strip_prefix("0x").unwrap_or(entry);
    hex::decode(hex).map_err(|e| BlobError::MalformedInput(format!("invalid blob hex: {}", e)))
}

/// the state of a scan session.
pub struct Scanner<S: BlobSource + ?Sized> {
    source: Arc<S>,
    params: ScanParams,
    cancel: CancellationToken,
    expected_seed: Option<Seed>,
}

impl<S: BlobSource + ?Sized> Scanner<S> {
    pub fn new(source: Arc<S>, params: ScanParams, cancel: CancellationToken) -> Self {
        Self {
            source,
            params,
            cancel,
            expected_seed: None,
        }
    }

    /// the seed of the file, once its first shard has been found
    pub fn expected_seed(&self) -> Option<Seed> {
        self.expected_seed
    }

    /// decides whether a decoded blob belongs to the file
    ///
    /// the first shard ever accepted sets the seed of the session.
    pub fn inspect(&mut self, blob: &[u8]) -> Result<MagicHeader, Skip> {
        let header = header::parse(blob).ok_or(Skip::NoMagicTag)?;
        match self.expected_seed {
            None => {
                info!(
                    seed = %hex::encode(header.seed),
                    total = header.total_shards,
                    "found a file"
                );
                self.expected_seed = Some(header.seed);
                Ok(header)
            }
            Some(expected) if expected == header.seed => Ok(header),
            Some(expected) => Err(Skip::SeedMismatch {
                expected,
                found: header.seed,
            }),
        }
    }

    /// fetches the blobs of `slot`, [`None`] if the slot has been skipped
    async fn fetch(&self, slot: u64) -> Result<Option<Vec<String>>, BlobError> {
        let deadline = Instant::now() + self.params.slot_timeout;
        loop {
            match self.source.blob_sidecars(slot).await {
                Ok(SlotResponse::Blobs(blobs)) => return Ok(Some(blobs)),
                Ok(SlotResponse::Missing { status }) => match self.params.policy {
                    SlotPolicy::Abort => return Err(BlobError::SlotUnavailable { slot, status }),
                    SlotPolicy::SkipMissed => match self.source.head_slot().await {
                        Ok(head) if slot <= head => {
                            warn!(slot, status, head, "missed slot, skipping");
                            return Ok(None);
                        }
                        Ok(head) => debug!(slot, head, "slot not produced yet"),
                        Err(BlobError::Transport(e)) => {
                            warn!(slot, "could not fetch the head slot: {}", e)
                        }
                        Err(e) => return Err(e),
                    },
                },
                Err(BlobError::Transport(e)) => warn!(slot, "could not fetch slot: {}", e),
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(BlobError::Timeout(format!("slot {}", slot)));
            }
            pause(&self.cancel, self.params.poll_interval).await?;
        }
    }

    async fn dump(&self, scanned: &ScannedShard) {
        let Some(directory) = self.params.dump_dir.clone() else {
            return;
        };
        let filename = format!("{}-{}.bin", self.params.start_slot, scanned.header.shard_index);
        let payload = scanned.shard.payload();

        let dumped = tokio::task::spawn_blocking(move || {
            fs::dump(&payload, &directory, Some(filename.as_str()))
        })
        .await;
        match dumped {
            Ok(Ok(path)) => debug!(?path, "shard dumped"),
            Ok(Err(e)) => warn!("could not dump shard: {}", e),
            Err(e) => warn!("could not dump shard: {}", e),
        }
    }

    /// scans the chain from the start slot and hands every shard of the file
    /// over to `producer`, in the order they are found
    pub async fn run(mut self, producer: &Producer<ScannedShard>) -> Result<(), BlobError> {
        let mut empty_slots = 0;
        let mut slot = self.params.start_slot;

        loop {
            if producer.is_cancelled() {
                return Err(BlobError::Cancelled);
            }

            let mut found = false;
            for entry in self.fetch(slot).await?.unwrap_or_default() {
                let blob = decode_blob(&entry)?;
                let header = match self.inspect(&blob) {
                    Ok(header) => header,
                    Err(skip) => {
                        debug!(slot, ?skip, "skipping blob");
                        continue;
                    }
                };

                let scanned = ScannedShard {
                    slot,
                    header,
                    shard: Shard::from_bytes(blob)?,
                };
                debug!(
                    slot,
                    index = header.shard_index,
                    total = header.total_shards,
                    "shard found"
                );
                self.dump(&scanned).await;
                producer.send(scanned).await?;
                found = true;

                if header.is_last() {
                    info!(slot, "last shard found, scan done");
                    return Ok(());
                }
            }

            if found {
                empty_slots = 0;
            } else {
                empty_slots += 1;
                if empty_slots >= self.params.max_empty_slots {
                    return Err(BlobError::ScanExhausted(empty_slots));
                }
            }
            slot += 1;
        }
    }
}

/// scans the chain in the background, see [`Scanner::run`]
pub fn scan<S: BlobSource + ?Sized + 'static>(
    source: Arc<S>,
    params: ScanParams,
    cancel: CancellationToken,
) -> Consumer<ScannedShard> {
    let scanner = Scanner::new(source, params, cancel.clone());
    pipeline::spawn(cancel, |producer| async move { scanner.run(&producer).await })
}
