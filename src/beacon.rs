//! the beacon node, seen as the source of blobs
//!
//! the [`BlobSource`] trait is the only thing the scanner and the submitter
//! know about the consensus layer. [`BeaconClient`] implements it on top of
//! the standard beacon REST API.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use crate::error::BlobError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// the answer of the beacon node for the blobs of a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotResponse {
    /// the hex-encoded blobs of the slot, in the order of the node
    Blobs(Vec<String>),
    /// the slot could not be served, `status` is the HTTP status
    Missing { status: u16 },
}

/// the operations of a beacon node used by Blobcast.
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn blob_sidecars(&self, slot: u64) -> Result<SlotResponse, BlobError>;
    /// the slot of the latest block header known to the node
    async fn head_slot(&self) -> Result<u64, BlobError>;
    /// the UNIX time of the genesis, in seconds
    async fn genesis_time(&self) -> Result<u64, BlobError>;
    /// whether the node has a block header for `slot`
    async fn has_slot(&self, slot: u64) -> Result<bool, BlobError>;
}

#[derive(Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Deserialize)]
struct Sidecar {
    blob: String,
}

#[derive(Deserialize)]
struct Genesis {
    genesis_time: String,
}

#[derive(Deserialize)]
struct Header {
    header: SignedHeader,
}

#[derive(Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Deserialize)]
struct HeaderMessage {
    slot: String,
}

fn number(value: &str, what: &str) -> Result<u64, BlobError> {
    value
        .parse()
        .map_err(|e| BlobError::MalformedInput(format!("invalid {} '{}': {}", what, value, e)))
}

/// a client of the beacon REST API.
pub struct BeaconClient {
    url: String,
    client: reqwest::Client,
}

impl BeaconClient {
    pub fn new(url: &str) -> Result<Self, BlobError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, BlobError> {
        let url = format!("{}{}", self.url, path);
        debug!(%url, "GET");
        Ok(self.client.get(&url).send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BlobError> {
        let response = self.get(path).await?.error_for_status()?;
        let body: Data<T> = response.json().await.map_err(|e| {
            BlobError::MalformedInput(format!("unexpected answer to {}: {}", path, e))
        })?;
        Ok(body.data)
    }
}

#[async_trait]
impl BlobSource for BeaconClient {
    async fn blob_sidecars(&self, slot: u64) -> Result<SlotResponse, BlobError> {
        let path = format!("/eth/v1/beacon/blob_sidecars/{}", slot);
        let response = self.get(&path).await?;
        if response.status() != StatusCode::OK {
            return Ok(SlotResponse::Missing {
                status: response.status().as_u16(),
            });
        }

        let body: Data<Vec<Sidecar>> = response.json().await.map_err(|e| {
            BlobError::MalformedInput(format!("invalid blob sidecars of slot {}: {}", slot, e))
        })?;
        Ok(SlotResponse::Blobs(
            body.data.into_iter().map(|s| s.blob).collect(),
        ))
    }

    async fn head_slot(&self) -> Result<u64, BlobError> {
        let head: Header = self.get_json("/eth/v1/beacon/headers/head").await?;
        number(&head.header.message.slot, "head slot")
    }

    async fn genesis_time(&self) -> Result<u64, BlobError> {
        let genesis: Genesis = self.get_json("/eth/v1/beacon/genesis").await?;
        number(&genesis.genesis_time, "genesis time")
    }

    async fn has_slot(&self, slot: u64) -> Result<bool, BlobError> {
        let response = self
            .get(&format!("/eth/v1/beacon/headers/{}", slot))
            .await?;
        Ok(response.status() == StatusCode::OK)
    }
}

/// the slot that contains `timestamp`, or [`None`] if it is before genesis
pub fn slot_at(timestamp: u64, genesis_time: u64, seconds_per_slot: u64) -> Option<u64> {
    timestamp
        .checked_sub(genesis_time)
        .and_then(|elapsed| elapsed.checked_div(seconds_per_slot))
}
