//! plug the scanner into the reassembler and expose the file as a stream
//!
//! the stream owns the whole download session: dropping it, e.g. when an
//! HTTP client goes away, cancels the background scan.
use std::{path::Path, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    beacon::BlobSource, config::ScanParams, error::BlobError, fs, reassemble::Reassembler, scan,
};

/// streams the bytes of the file that starts at `params.start_slot`
///
/// the stream ends after the last shard of the file, or right after the first
/// error.
pub fn download_stream<S: BlobSource + ?Sized + 'static>(
    source: Arc<S>,
    params: ScanParams,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, BlobError>> + Send + 'static {
    let start_slot = params.start_slot;
    let mut shards = scan::scan(source, params, cancel);

    async_stream::stream! {
        let mut reassembler = Reassembler::new();
        while let Some(scanned) = shards.next().await {
            match scanned.and_then(|s| reassembler.push(&s.shard)) {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    yield Ok(chunk);
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        match reassembler.finish() {
            Ok(written) => info!(start_slot, size = written, "file downloaded"),
            Err(e) => {
                yield Err(e);
            }
        }
    }
}

/// downloads the file that starts at `params.start_slot` into `path`
pub async fn download_to_file<S: BlobSource + ?Sized + 'static>(
    source: Arc<S>,
    params: ScanParams,
    path: &Path,
    cancel: CancellationToken,
) -> Result<u64> {
    fs::write_stream(download_stream(source, params, cancel), path).await
}
