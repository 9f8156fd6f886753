//! a typed hand-off between two stages of a session
//!
//! every session of Blobcast is a two-stage pipeline: a producer, e.g. the
//! shard encoder or the chain scanner, and a consumer, e.g. the submitter or
//! the reassembler.
//!
//! the channel between both stages holds a single message, so the producer
//! never runs more than one item ahead of the consumer. the end of a stage is
//! always explicit: the producer either _finishes_ or _fails_, and a producer
//! that disappears without doing any of these is reported as
//! [`BlobError::PipelineAborted`].
//!
//! both stages share a [`CancellationToken`]. dropping the [`Consumer`]
//! cancels it, which stops the producer at its next [`Producer::send`].
use std::{future::Future, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BlobError;

enum Message<T> {
    Item(T),
    Done,
    Failed(BlobError),
}

/// the sending half of a pipeline
pub struct Producer<T> {
    tx: mpsc::Sender<Message<T>>,
    cancel: CancellationToken,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// the receiving half of a pipeline
pub struct Consumer<T> {
    rx: mpsc::Receiver<Message<T>>,
    cancel: CancellationToken,
    finished: bool,
}

/// creates a pipeline whose stages stop when `cancel` is cancelled
pub fn channel<T>(cancel: CancellationToken) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::channel(1);
    (
        Producer {
            tx,
            cancel: cancel.clone(),
        },
        Consumer {
            rx,
            cancel,
            finished: false,
        },
    )
}

impl<T> Producer<T> {
    /// hands `item` over to the consumer, waiting for it to be ready
    ///
    /// fails with [`BlobError::Cancelled`] if the session has been cancelled
    /// or the consumer is gone.
    pub async fn send(&self, item: T) -> Result<(), BlobError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BlobError::Cancelled),
            sent = self.tx.send(Message::Item(item)) => sent.map_err(|_| BlobError::Cancelled),
        }
    }

    /// same as [`Producer::send`] but for producers running outside of the
    /// async runtime, e.g. in [`spawn_blocking`]
    pub fn blocking_send(&self, item: T) -> Result<(), BlobError> {
        if self.cancel.is_cancelled() {
            return Err(BlobError::Cancelled);
        }
        self.tx
            .blocking_send(Message::Item(item))
            .map_err(|_| BlobError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn close_message(result: Result<(), BlobError>) -> Message<T> {
        match result {
            Ok(()) => Message::Done,
            Err(e) => Message::Failed(e),
        }
    }

    /// closes the stage, successfully or not
    pub async fn close(self, result: Result<(), BlobError>) {
        // the consumer might be gone already, there is nobody to tell then
        let _ = self.tx.send(Self::close_message(result)).await;
    }

    fn blocking_close(self, result: Result<(), BlobError>) {
        let _ = self.tx.blocking_send(Self::close_message(result));
    }
}

impl<T> Consumer<T> {
    /// the next item of the producer
    ///
    /// returns [`None`] once the producer has finished and an error if it
    /// failed, was cancelled or stopped without closing the stage.
    pub async fn next(&mut self) -> Option<Result<T, BlobError>> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(Message::Item(item)) => Some(Ok(item)),
            Some(Message::Done) => {
                self.finished = true;
                None
            }
            Some(Message::Failed(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                if self.cancel.is_cancelled() {
                    Some(Err(BlobError::Cancelled))
                } else {
                    Some(Err(BlobError::PipelineAborted))
                }
            }
        }
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("consumer dropped before the end of the pipeline, cancelling");
            self.cancel.cancel();
        }
    }
}

/// runs `stage` as the producer of a new pipeline on the async runtime
///
/// the pipeline is closed with the result of `stage`.
pub fn spawn<T, F, Fut>(cancel: CancellationToken, stage: F) -> Consumer<T>
where
    T: Send + 'static,
    F: FnOnce(Producer<T>) -> Fut,
    Fut: Future<Output = Result<(), BlobError>> + Send + 'static,
{
    let (producer, consumer) = channel(cancel);
    let completion = producer.clone();
    let stage = stage(producer);
    tokio::spawn(async move {
        let result = stage.await;
        completion.close(result).await;
    });
    consumer
}

/// runs `stage` as the producer of a new pipeline on a thread where blocking
/// is allowed, for CPU-bound producers
pub fn spawn_blocking<T, F>(cancel: CancellationToken, stage: F) -> Consumer<T>
where
    T: Send + 'static,
    F: FnOnce(&Producer<T>) -> Result<(), BlobError> + Send + 'static,
{
    let (producer, consumer) = channel(cancel);
    tokio::task::spawn_blocking(move || {
        let result = stage(&producer);
        producer.blocking_close(result);
    });
    consumer
}

/// sleeps for `duration`, unless `cancel` is cancelled first
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), BlobError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BlobError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
