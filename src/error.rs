//! Blobcast-specific errors
//!
//! There are a few structural errors, raised while encoding or scanning, and
//! some related to the chain, raised while submitting or confirming.
use thiserror::Error;

/// An error that Blobcast could end up producing.
///
/// There are a few families of errors in Blobcast:
/// - related to the _protocol limits_, e.g. a file that needs too many shards
/// - related to _malformed input_, i.e. data that is structurally broken
/// - related to _submission_, i.e. the execution node refused a transaction
/// - related to _availability_, i.e. something did not show up in time
///
/// Skipping a foreign shard during a scan is not an error, see
/// [`crate::scan::Skip`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BlobError {
    /// `{0}` is the number of shards the file would need.
    #[error("file needs {0} shards, at most {max} are supported", max = crate::shard::MAX_SHARDS_PER_FILE)]
    ProtocolLimitExceeded(usize),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// `{expected}` is the next shard index the reassembler can accept.
    #[error("shard {found} arrived while shard {expected} was expected")]
    OutOfOrder { expected: u8, found: u8 },
    #[error("submission failed: {0}")]
    SubmissionFailure(String),
    /// `{0}` describes what was being waited for.
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("no shard found after {0} consecutive empty slots")]
    ScanExhausted(u64),
    /// `{0}` is the HTTP status of the offending slot.
    #[error("slot {slot} answered with status {status}")]
    SlotUnavailable { slot: u64, status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("session was cancelled")]
    Cancelled,
    #[error("pipeline producer stopped without completing")]
    PipelineAborted,
}

impl BlobError {
    /// whether the error was raised before anything was sent to the chain
    /// because of the shape of the input itself
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BlobError::ProtocolLimitExceeded(_)
                | BlobError::MalformedInput(_)
                | BlobError::InvalidParameter(_)
        )
    }
}

impl From<reqwest::Error> for BlobError {
    fn from(error: reqwest::Error) -> Self {
        BlobError::Transport(error.to_string())
    }
}
