// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error type and helpers shared by the services.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::db::StoreError;

/// Prefix of bech-less Noah account addresses as returned by the node.
pub const ADDRESS_PREFIX: &str = "NOAHx";
/// Prefix of validator public keys as returned by the node.
pub const PUBLIC_KEY_PREFIX: &str = "Np";
/// Prefix of transaction hashes as returned by the node.
pub const HASH_PREFIX: &str = "0x";

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    SideTable(#[from] sled::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("node error: {message}")]
    Node { message: String, data: Option<String> },
    #[error("invalid number {value:?}: {reason}")]
    InvalidNumber { value: String, reason: String },
    #[error("block {height} lists validator {public_key} without a signed flag")]
    MissingSignedFlag { height: u64, public_key: String },
    #[error("address {0} is not persisted")]
    UnknownAddress(String),
    #[error("coin {0} is not persisted")]
    UnknownCoin(String),
    #[error("validator {0} is not persisted")]
    UnknownValidator(String),
    #[error("job queue closed: {0}")]
    QueueClosed(&'static str),
    #[error("worker pool terminated unexpectedly")]
    WorkerStopped,
}

impl IndexerError {
    /// Wraps the structured error field of a node response.
    pub fn from_node(message: String, data: Option<String>) -> Self {
        IndexerError::Node { message, data }
    }
}

/// Strips the account-address prefix, leaving the bare hex form used as the
/// natural key in the store.
pub fn strip_address_prefix(address: &str) -> &str {
    address.strip_prefix(ADDRESS_PREFIX).unwrap_or(address)
}

/// Strips the validator public-key prefix.
pub fn strip_public_key_prefix(public_key: &str) -> &str {
    public_key.strip_prefix(PUBLIC_KEY_PREFIX).unwrap_or(public_key)
}

/// Strips the transaction-hash prefix. The side table stores hashes bare.
pub fn strip_hash_prefix(hash: &str) -> &str {
    hash.strip_prefix(HASH_PREFIX).unwrap_or(hash)
}

/// Parses a numeric string field of a node response.
pub fn parse_number(value: &str) -> Result<u64, IndexerError> {
    value.parse().map_err(|err: std::num::ParseIntError| IndexerError::InvalidNumber {
        value: value.to_string(),
        reason: err.to_string(),
    })
}

/// A receiver end shared by the workers of one pool.
///
/// Tokio channels are single-consumer, so a pool of `N` workers drains one
/// queue through a mutex-guarded receiver.
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Creates a bounded job queue and its shared receiver.
pub fn job_queue<T>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (sender, Arc::new(Mutex::new(receiver)))
}

/// Receives the next job of a pool, or `None` once all senders are gone.
pub async fn next_job<T>(receiver: &SharedReceiver<T>) -> Option<T> {
    receiver.lock().await.recv().await
}

/// An acknowledgement callback carried inside synchronous jobs.
///
/// The pipeline awaits the receiver before advancing past steps whose rows
/// later steps depend on.
pub type Ack = oneshot::Sender<()>;
