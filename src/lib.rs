//! Blobcast: store files in EIP-4844 blobs and stream them back
//!
//! a file is cut into shards, one shard per blob, and every shard starts with
//! a small header that tells which file it belongs to and where it goes, see
//! [`header`]. the shards are committed to, packed into blob transactions and
//! sent to an execution node by [`submit::upload`]. they are read back from a
//! beacon node, slot after slot, by [`stream::download_stream`].
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # use tokio_util::sync::CancellationToken;
//! # use blobcast::{beacon::BeaconClient, commitment::KzgEngine, config::*, rpc::RpcClient};
//! # async fn run() -> Result<(), blobcast::error::BlobError> {
//! let params = UploadParams {
//!     private_key: "0x...".to_string(),
//!     ..UploadParams::default()
//! };
//! let execution = RpcClient::new(&params.rpc_url)?;
//! let beacon = BeaconClient::new(&params.beacon_url)?;
//!
//! let report = blobcast::submit::upload(
//!     bytes::Bytes::from_static(b"hello blobs"),
//!     &params,
//!     Arc::new(KzgEngine::ethereum()),
//!     &execution,
//!     &beacon,
//!     CancellationToken::new(),
//! )
//! .await?;
//!
//! let file = blobcast::stream::download_stream(
//!     Arc::new(beacon),
//!     ScanParams::new(&params.beacon_url, report.start_slot),
//!     CancellationToken::new(),
//! );
//! # Ok(())
//! # }
//! ```
pub mod beacon;
pub mod commitment;
pub mod config;
pub mod error;
pub mod field;
pub mod fs;
pub mod header;
pub mod pipeline;
pub mod reassemble;
pub mod rpc;
pub mod scan;
pub mod server;
pub mod shard;
pub mod stream;
pub mod submit;
pub mod tx;

#[cfg(test)]
mod testing;
