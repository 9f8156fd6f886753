//! per-session parameters of uploads and downloads
//!
//! nothing in here is global: a server keeps one immutable copy of the
//! defaults and every request clones it into its own [`UploadParams`] or
//! [`ScanParams`].
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use alloy_primitives::{Address, Bytes, U256};

use crate::{error::BlobError, shard::MAX_SHARDS_PER_TX};

pub const DEFAULT_GAS_LIMIT: u64 = 21_000;
pub const DEFAULT_MAX_FEE_PER_GAS: u128 = 800_000_000_000;
pub const DEFAULT_MAX_PRIORITY_FEE_PER_GAS: u128 = 6_000_000_000;
pub const DEFAULT_MAX_FEE_PER_BLOB_GAS: u128 = 70_000_000_000;
pub const DEFAULT_CHAIN_ID: u64 = 7_011_893_061;
pub const DEFAULT_BLOBS_PER_TX: usize = 6;
pub const SECONDS_PER_SLOT: u64 = 12;

/// parses a numeric quantity, either `0x`-prefixed hexadecimal or decimal
///
/// fails with [`BlobError::InvalidParameter`] on anything else, including
/// values that do not fit in 128 bits.
pub fn parse_quantity(s: &str) -> Result<u128, BlobError> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => return Err(BlobError::InvalidParameter("empty hex quantity".to_string())),
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse::<u128>(),
    };
    parsed.map_err(|e| BlobError::InvalidParameter(format!("invalid quantity '{}': {}", s, e)))
}

/// parses the calldata of a transaction
///
/// `0x`-prefixed input is decoded as hex, anything else is taken verbatim as
/// UTF-8 bytes.
pub fn parse_calldata(s: &str) -> Result<Bytes, BlobError> {
    match s.strip_prefix("0x") {
        Some(hex) => hex::decode(hex)
            .map(Bytes::from)
            .map_err(|e| BlobError::InvalidParameter(format!("invalid calldata: {}", e))),
        None => Ok(Bytes::copy_from_slice(s.as_bytes())),
    }
}

/// the body of every blob transaction of an upload.
#[derive(Clone, Debug, PartialEq)]
pub struct TxParams {
    pub chain_id: u64,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    /// the node's suggestion, i.e. `eth_gasPrice`, is used when [`None`]
    pub max_fee_per_gas: Option<u128>,
    /// same as [`TxParams::max_fee_per_gas`] when [`None`]
    pub max_priority_fee_per_gas: Option<u128>,
    pub max_fee_per_blob_gas: u128,
    pub calldata: Bytes,
}

impl Default for TxParams {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            to: Address::ZERO,
            value: U256::ZERO,
            gas_limit: DEFAULT_GAS_LIMIT,
            max_fee_per_gas: Some(DEFAULT_MAX_FEE_PER_GAS),
            max_priority_fee_per_gas: Some(DEFAULT_MAX_PRIORITY_FEE_PER_GAS),
            max_fee_per_blob_gas: DEFAULT_MAX_FEE_PER_BLOB_GAS,
            calldata: Bytes::new(),
        }
    }
}

/// everything an upload session needs.
#[derive(Clone, Debug)]
pub struct UploadParams {
    pub rpc_url: String,
    pub beacon_url: String,
    /// hex-encoded, with or without `0x`
    pub private_key: String,
    pub tx: TxParams,
    /// the number of shards bundled into one transaction, at most
    /// [`MAX_SHARDS_PER_TX`]
    pub blobs_per_tx: usize,
    pub max_submit_attempts: usize,
    pub submit_retry_interval: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub slot_lookup_interval: Duration,
    pub slot_lookup_timeout: Duration,
    pub seconds_per_slot: u64,
    /// only used to log a link to each transaction, e.g.
    /// `https://sepolia.etherscan.io`
    pub explorer_url: Option<String>,
}

impl Default for UploadParams {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            beacon_url: "http://localhost:5052".to_string(),
            private_key: String::new(),
            tx: TxParams::default(),
            blobs_per_tx: DEFAULT_BLOBS_PER_TX,
            max_submit_attempts: 3,
            submit_retry_interval: Duration::from_secs(2),
            receipt_poll_interval: Duration::from_secs(1),
            receipt_timeout: Duration::from_secs(180),
            slot_lookup_interval: Duration::from_secs(2),
            slot_lookup_timeout: Duration::from_secs(60),
            seconds_per_slot: SECONDS_PER_SLOT,
            explorer_url: None,
        }
    }
}

impl UploadParams {
    /// checks the parameters that do not depend on the chain
    pub fn validate(&self) -> Result<(), BlobError> {
        if self.blobs_per_tx == 0 || self.blobs_per_tx > MAX_SHARDS_PER_TX {
            return Err(BlobError::InvalidParameter(format!(
                "blobs per transaction should be between 1 and {}, found {}",
                MAX_SHARDS_PER_TX, self.blobs_per_tx
            )));
        }
        if self.max_submit_attempts == 0 {
            return Err(BlobError::InvalidParameter(
                "at least one submission attempt is required".to_string(),
            ));
        }
        if self.seconds_per_slot == 0 {
            return Err(BlobError::InvalidParameter(
                "slots cannot last 0 seconds".to_string(),
            ));
        }
        if let (Some(max), Some(priority)) =
            (self.tx.max_fee_per_gas, self.tx.max_priority_fee_per_gas)
        {
            if priority > max {
                return Err(BlobError::InvalidParameter(format!(
                    "priority fee {} is above the max fee {}",
                    priority, max
                )));
            }
        }
        Ok(())
    }
}

/// what to do with a slot whose blob sidecars cannot be fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SlotPolicy {
    /// a slot at or below the head of the chain is a missed slot and is
    /// skipped, a slot above the head is waited for
    #[default]
    SkipMissed,
    /// fail the scan on the first unavailable slot
    Abort,
}

/// everything a download session needs.
#[derive(Clone, Debug)]
pub struct ScanParams {
    pub beacon_url: String,
    pub start_slot: u64,
    pub policy: SlotPolicy,
    pub poll_interval: Duration,
    /// how long to wait for a slot that has not been produced yet
    pub slot_timeout: Duration,
    /// how many slots in a row can go by without a single shard of the file
    pub max_empty_slots: u64,
    /// where to dump the payload of every accepted shard, if anywhere
    pub dump_dir: Option<PathBuf>,
}

impl ScanParams {
    pub fn new(beacon_url: impl Into<String>, start_slot: u64) -> Self {
        Self {
            beacon_url: beacon_url.into(),
            start_slot,
            policy: SlotPolicy::default(),
            poll_interval: Duration::from_secs(SECONDS_PER_SLOT),
            slot_timeout: Duration::from_secs(10 * SECONDS_PER_SLOT),
            max_empty_slots: 64,
            dump_dir: None,
        }
    }

    /// the same session, starting at another slot
    pub fn at_slot(&self, start_slot: u64) -> Self {
        Self {
            start_slot,
            ..self.clone()
        }
    }
}

/// the immutable state of the HTTP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub upload: UploadParams,
    /// the start slot is overwritten by every request
    pub scan: ScanParams,
    pub max_upload_size: usize,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;

    use crate::error::BlobError;

    use super::{parse_calldata, parse_quantity, UploadParams};

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x0"), Ok(0));
        assert_eq!(parse_quantity("0x10"), Ok(16));
        assert_eq!(parse_quantity("800000000000"), Ok(800_000_000_000));
        assert_eq!(parse_quantity(" 42 "), Ok(42));
        assert_eq!(
            parse_quantity("0xffffffffffffffffffffffffffffffff"),
            Ok(u128::MAX)
        );

        for invalid in [
            "",
            "0x",
            "0xzz",
            "-1",
            "1.5",
            "0x1ffffffffffffffffffffffffffffffff",
        ] {
            assert!(
                matches!(parse_quantity(invalid), Err(BlobError::InvalidParameter(_))),
                "TEST | quantity: '{invalid}'"
            );
        }
    }

    #[test]
    fn calldata() {
        assert_eq!(parse_calldata("0x"), Ok(Bytes::new()));
        assert_eq!(
            parse_calldata("0xdeadbeef"),
            Ok(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert_eq!(parse_calldata("hello"), Ok(Bytes::from_static(b"hello")));
        assert!(parse_calldata("0xabc").is_err());
    }

    #[test]
    fn validation() {
        assert!(UploadParams::default().validate().is_ok());

        for blobs_per_tx in [0, 9] {
            let params = UploadParams {
                blobs_per_tx,
                ..UploadParams::default()
            };
            assert!(
                params.validate().unwrap_err().is_input_error(),
                "TEST | blobs per tx: {blobs_per_tx}"
            );
        }

        let mut params = UploadParams::default();
        params.tx.max_fee_per_gas = Some(1);
        params.tx.max_priority_fee_per_gas = Some(2);
        assert!(params.validate().is_err());

        params.tx.max_fee_per_gas = None;
        assert!(params.validate().is_ok());
    }
}
