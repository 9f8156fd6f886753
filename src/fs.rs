//! Interact with the filesystem, read from and write to it.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use rs_merkle::{algorithms::Sha256, Hasher};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::error::BlobError;

/// Dumps raw bytes to the disk.
///
/// - if `filename` is provided, then it will be used as the filename as is
/// - otherwise, the hash of the bytes will be computed and used as the
///   filename
///
/// This function will return the path of the file the bytes have been dumped
/// to.
pub fn dump(bytes: &[u8], directory: &Path, filename: Option<&str>) -> Result<PathBuf> {
    let filename = match filename {
        Some(filename) => filename.to_string(),
        None => hex::encode(Sha256::hash(bytes)),
    };

    std::fs::create_dir_all(directory)
        .with_context(|| format!("could not create `{:?}`", directory))?;
    let dump_path = directory.join(&filename);

    info!("dumping {} bytes into `{:?}`", bytes.len(), dump_path);
    std::fs::write(&dump_path, bytes)
        .with_context(|| format!("could not write `{:?}`", dump_path))?;

    Ok(dump_path)
}

/// Reads a whole file to upload it.
pub fn read_file(path: &Path) -> Result<Bytes> {
    let bytes = std::fs::read(path).with_context(|| format!("could not read `{:?}`", path))?;
    info!("read {} bytes from `{:?}`", bytes.len(), path);
    Ok(Bytes::from(bytes))
}

/// Writes a stream of bytes to `path` as it comes and returns the number of
/// bytes written.
///
/// > **Note**
/// >
/// > The file is created before the first chunk arrives, so a stream that
/// > fails leaves the bytes it produced so far behind.
pub async fn write_stream(
    stream: impl Stream<Item = Result<Bytes, BlobError>>,
    path: &Path,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("could not create `{:?}`", path))?;

    let mut written = 0u64;
    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                error!("stream to `{:?}` failed after {} bytes", path, written);
                return Err(e.into());
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    info!("wrote {} bytes to `{:?}`", written, path);
    Ok(written)
}
