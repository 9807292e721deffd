// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Transaction persistence: the chunked save pool, output and validator-link
//! derivation, invalid-transaction routing and index maintenance.
//!
//! Valid transactions of a block are persisted before the pipeline advances;
//! outputs and links are derived afterwards and flow through their own
//! pools. A transaction the chain rejected goes to the invalid table
//! instead and produces no derived rows.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::{
    broadcast::{Broadcast, TRANSACTIONS_CHANNEL},
    common::{
        next_job, strip_address_prefix, strip_hash_prefix, strip_public_key_prefix, Ack,
        IndexerError, SharedReceiver,
    },
    db::{
        NewInvalidTransaction, NewTransaction, NewTransactionOutput, Store,
        TransactionValidatorLink,
    },
    node::{MultiSendTxData, SendTxData, TransactionData, TransactionType},
};

/// How often the derived transaction indices are recomputed.
const INDEX_REBUILD_PERIOD: Duration = Duration::from_secs(120);

/// A chunk of valid transactions of one block.
pub struct TxJob {
    pub block_id: i64,
    pub created_at: String,
    pub transactions: Vec<TransactionData>,
    pub ack: Option<Ack>,
}

/// A chunk of rejected transactions of one block.
pub struct InvalidTxJob {
    pub block_id: i64,
    pub created_at: String,
    pub transactions: Vec<TransactionData>,
}

pub struct TransactionService {
    save_jobs: mpsc::Sender<TxJob>,
    invalid_jobs: mpsc::Sender<InvalidTxJob>,
}

impl TransactionService {
    pub fn new(save_jobs: mpsc::Sender<TxJob>, invalid_jobs: mpsc::Sender<InvalidTxJob>) -> Self {
        Self {
            save_jobs,
            invalid_jobs,
        }
    }

    /// Splits a block's transactions into chunks, routes rejected ones to the
    /// invalid pool, and waits for every valid chunk to be persisted.
    pub async fn handle_block_transactions(
        &self,
        block_id: i64,
        created_at: &str,
        transactions: &[TransactionData],
        chunk_size: usize,
    ) -> Result<(), IndexerError> {
        let (valid, invalid): (Vec<_>, Vec<_>) = transactions
            .iter()
            .cloned()
            .partition(|transaction| transaction.log.is_none());

        for chunk in invalid.chunks(chunk_size.max(1)) {
            self.invalid_jobs
                .send(InvalidTxJob {
                    block_id,
                    created_at: created_at.to_string(),
                    transactions: chunk.to_vec(),
                })
                .await
                .map_err(|_| IndexerError::QueueClosed("invalid transactions"))?;
        }

        let mut pending = Vec::new();
        for chunk in valid.chunks(chunk_size.max(1)) {
            let (ack, done) = oneshot::channel();
            self.save_jobs
                .send(TxJob {
                    block_id,
                    created_at: created_at.to_string(),
                    transactions: chunk.to_vec(),
                    ack: Some(ack),
                })
                .await
                .map_err(|_| IndexerError::QueueClosed("transactions"))?;
            pending.push(done);
        }
        future::try_join_all(pending)
            .await
            .map_err(|_| IndexerError::WorkerStopped)?;
        Ok(())
    }

    /// Persists transaction chunks, then derives outputs and validator links
    /// for the downstream pools and announces the transactions.
    pub async fn save_transactions_worker(
        store: Arc<Store>,
        broadcaster: Arc<dyn Broadcast>,
        jobs: SharedReceiver<TxJob>,
        outputs: mpsc::Sender<Vec<NewTransactionOutput>>,
        links: mpsc::Sender<Vec<TransactionValidatorLink>>,
    ) -> Result<(), IndexerError> {
        while let Some(job) = next_job(&jobs).await {
            let mut rows = Vec::with_capacity(job.transactions.len());
            let mut sources = HashMap::new();
            for transaction in &job.transactions {
                match resolve_transaction(&store, job.block_id, &job.created_at, transaction).await
                {
                    Ok(row) => {
                        sources.insert(row.hash.clone(), transaction.clone());
                        rows.push(row);
                    }
                    Err(err) => {
                        error!(hash = %transaction.hash, %err, "skipping unresolvable transaction")
                    }
                }
            }
            let inserted = store.insert_transactions(&rows).await?;

            let mut new_outputs = Vec::new();
            let mut new_links = Vec::new();
            for (hash, transaction_id) in &inserted {
                let Some(transaction) = sources.get(hash) else {
                    continue;
                };
                derive_outputs(&store, *transaction_id, transaction, &mut new_outputs).await;
                derive_validator_links(&store, *transaction_id, transaction, &mut new_links).await;
            }
            if !new_outputs.is_empty() {
                outputs
                    .send(new_outputs)
                    .await
                    .map_err(|_| IndexerError::QueueClosed("transaction outputs"))?;
            }
            if !new_links.is_empty() {
                links
                    .send(new_links)
                    .await
                    .map_err(|_| IndexerError::QueueClosed("transaction links"))?;
            }

            for transaction in &job.transactions {
                broadcaster
                    .publish(
                        TRANSACTIONS_CHANNEL,
                        json!({
                            "hash": strip_hash_prefix(&transaction.hash),
                            "block": job.block_id,
                            "type": transaction.tx_type,
                            "from": strip_address_prefix(&transaction.from),
                        }),
                    )
                    .await;
            }
            if let Some(ack) = job.ack {
                let _ = ack.send(());
            }
        }
        Ok(())
    }

    pub async fn save_invalid_transactions_worker(
        store: Arc<Store>,
        jobs: SharedReceiver<InvalidTxJob>,
    ) -> Result<(), IndexerError> {
        while let Some(job) = next_job(&jobs).await {
            let mut rows = Vec::with_capacity(job.transactions.len());
            for transaction in &job.transactions {
                let from = strip_address_prefix(&transaction.from);
                let from_address_id = match store.find_or_insert_address(from).await {
                    Ok(id) => id,
                    Err(err) => {
                        error!(hash = %transaction.hash, %err, "skipping invalid transaction");
                        continue;
                    }
                };
                rows.push(NewInvalidTransaction {
                    hash: strip_hash_prefix(&transaction.hash).to_string(),
                    block_id: job.block_id,
                    tx_type: transaction.tx_type as i64,
                    from_address_id,
                    log: transaction.log.clone().unwrap_or_default(),
                    created_at: job.created_at.clone(),
                });
            }
            store.insert_invalid_transactions(&rows).await?;
        }
        Ok(())
    }

    pub async fn save_outputs_worker(
        store: Arc<Store>,
        jobs: SharedReceiver<Vec<NewTransactionOutput>>,
    ) -> Result<(), IndexerError> {
        while let Some(chunk) = next_job(&jobs).await {
            if let Err(err) = store.insert_transaction_outputs(&chunk).await {
                error!(%err, "saving transaction outputs failed");
            }
        }
        Ok(())
    }

    pub async fn save_validator_links_worker(
        store: Arc<Store>,
        jobs: SharedReceiver<Vec<TransactionValidatorLink>>,
    ) -> Result<(), IndexerError> {
        while let Some(chunk) = next_job(&jobs).await {
            if let Err(err) = store.insert_transaction_validator_links(&chunk).await {
                error!(%err, "saving transaction-validator links failed");
            }
        }
        Ok(())
    }

    /// Periodically recomputes the derived indices used by queries.
    pub async fn update_tx_index_worker(store: Arc<Store>) -> Result<(), IndexerError> {
        loop {
            tokio::time::sleep(INDEX_REBUILD_PERIOD).await;
            if let Err(err) = store.rebuild_transaction_indices().await {
                error!(%err, "transaction index rebuild failed");
            }
        }
    }
}

async fn resolve_transaction(
    store: &Store,
    block_id: i64,
    created_at: &str,
    transaction: &TransactionData,
) -> Result<NewTransaction, IndexerError> {
    let from = strip_address_prefix(&transaction.from);
    let from_address_id = store
        .find_address_id(from)
        .await?
        .ok_or_else(|| IndexerError::UnknownAddress(from.to_string()))?;
    let gas_coin_id = store.find_or_insert_coin(&transaction.gas_coin).await?;
    Ok(NewTransaction {
        hash: strip_hash_prefix(&transaction.hash).to_string(),
        block_id,
        tx_type: transaction.tx_type as i64,
        nonce: transaction.nonce as i64,
        gas_coin_id: Some(gas_coin_id),
        from_address_id,
        data: transaction.data.to_string(),
        raw: transaction.raw_tx.clone(),
        created_at: created_at.to_string(),
    })
}

/// Recipient rows for send-like transactions.
async fn derive_outputs(
    store: &Store,
    transaction_id: i64,
    transaction: &TransactionData,
    outputs: &mut Vec<NewTransactionOutput>,
) {
    let recipients: Vec<SendTxData> = match transaction.transaction_type() {
        Some(TransactionType::Send) => {
            match serde_json::from_value::<SendTxData>(transaction.data.clone()) {
                Ok(data) => vec![data],
                Err(err) => {
                    debug!(hash = %transaction.hash, %err, "unparseable send data");
                    return;
                }
            }
        }
        Some(TransactionType::MultiSend) => {
            match serde_json::from_value::<MultiSendTxData>(transaction.data.clone()) {
                Ok(data) => data.list,
                Err(err) => {
                    debug!(hash = %transaction.hash, %err, "unparseable multisend data");
                    return;
                }
            }
        }
        _ => return,
    };
    for recipient in recipients {
        let to = strip_address_prefix(&recipient.to);
        let to_address_id = match store.find_or_insert_address(to).await {
            Ok(id) => id,
            Err(err) => {
                error!(hash = %transaction.hash, %err, "skipping output recipient");
                continue;
            }
        };
        let coin_id = match store.find_or_insert_coin(&recipient.coin).await {
            Ok(id) => id,
            Err(err) => {
                error!(hash = %transaction.hash, %err, "skipping output coin");
                continue;
            }
        };
        outputs.push(NewTransactionOutput {
            transaction_id,
            to_address_id,
            coin_id,
            value: recipient.value,
        });
    }
}

#[derive(Deserialize)]
struct CandidateKeyOnly {
    pub_key: String,
}

/// Link rows for transactions addressing a candidate.
async fn derive_validator_links(
    store: &Store,
    transaction_id: i64,
    transaction: &TransactionData,
    links: &mut Vec<TransactionValidatorLink>,
) {
    match transaction.transaction_type() {
        Some(
            TransactionType::Delegate
            | TransactionType::Unbond
            | TransactionType::DeclareCandidacy
            | TransactionType::SetCandidateOn
            | TransactionType::SetCandidateOff
            | TransactionType::EditCandidate,
        ) => {}
        _ => return,
    }
    let Ok(data) = serde_json::from_value::<CandidateKeyOnly>(transaction.data.clone()) else {
        debug!(hash = %transaction.hash, "transaction data carries no candidate key");
        return;
    };
    match store
        .find_or_insert_validator(strip_public_key_prefix(&data.pub_key))
        .await
    {
        Ok(validator_id) => links.push(TransactionValidatorLink {
            transaction_id,
            validator_id,
        }),
        Err(err) => error!(hash = %transaction.hash, %err, "skipping transaction-validator link"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::common::job_queue;
    use crate::broadcast::recording::RecordingBroadcast;
    use crate::node::mock::tx_fixture;

    async fn store_with_block() -> Arc<Store> {
        let store = Arc::new(Store::in_memory().await);
        store
            .insert_block(&crate::db::NewBlock {
                id: 9,
                created_at: "2024-05-01T00:09:00Z".to_string(),
                tx_count: 2,
                proposer_validator_id: None,
            })
            .await
            .unwrap();
        store
            .insert_addresses_if_absent(&["aa01".to_string(), "bb02".to_string()])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn valid_chunks_are_persisted_with_outputs() {
        let store = store_with_block().await;
        let (save_tx, save_rx) = job_queue(4);
        let (invalid_tx, _invalid_rx) = job_queue(4);
        let (output_tx, output_rx) = job_queue(4);
        let (link_tx, _link_rx) = job_queue::<Vec<TransactionValidatorLink>>(4);
        let service = TransactionService::new(save_tx, invalid_tx);

        let worker = tokio::spawn(TransactionService::save_transactions_worker(
            store.clone(),
            Arc::new(RecordingBroadcast::default()),
            save_rx,
            output_tx,
            link_tx,
        ));
        let output_worker = tokio::spawn(TransactionService::save_outputs_worker(
            store.clone(),
            output_rx,
        ));

        let transactions = vec![tx_fixture(
            "0xfeed01",
            "NOAHxaa01",
            TransactionType::Send,
            json!({"coin": "NOAH", "to": "NOAHxbb02", "value": "7"}),
            None,
        )];
        service
            .handle_block_transactions(9, "2024-05-01T00:09:00Z", &transactions, 10)
            .await
            .unwrap();

        let row = store.transaction_by_hash("feed01").await.unwrap().unwrap();
        assert_eq!(row.block_id, 9);
        assert_eq!(row.tx_type, TransactionType::Send as i64);

        // outputs flow through their own pool; give it a moment to drain
        tokio::task::yield_now().await;
        drop(service);
        worker.abort();
        output_worker.abort();
    }

    #[tokio::test]
    async fn rejected_transactions_go_to_the_invalid_table() {
        let store = store_with_block().await;
        let (save_tx, _save_rx) = job_queue(4);
        let (invalid_tx, invalid_rx) = job_queue(4);
        let service = TransactionService::new(save_tx, invalid_tx);

        let worker = tokio::spawn(TransactionService::save_invalid_transactions_worker(
            store.clone(),
            invalid_rx,
        ));

        let transactions = vec![tx_fixture(
            "0xfeed02",
            "NOAHxaa01",
            TransactionType::Send,
            json!({"coin": "NOAH", "to": "NOAHxbb02", "value": "7"}),
            Some("insufficient funds"),
        )];
        service
            .handle_block_transactions(9, "2024-05-01T00:09:00Z", &transactions, 10)
            .await
            .unwrap();

        // no ack on the invalid path; poll until the worker lands the row
        let mut rows = 0;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            rows = sqlx::query("SELECT COUNT(*) FROM invalid_transactions")
                .fetch_one(store.pool())
                .await
                .map(|row| {
                    use sqlx::Row as _;
                    row.get::<i64, _>(0)
                })
                .unwrap();
            if rows == 1 {
                break;
            }
        }
        assert_eq!(rows, 1);
        assert!(store.transaction_by_hash("feed02").await.unwrap().is_none());
        worker.abort();
    }

    #[tokio::test]
    async fn delegate_transactions_link_their_candidate() {
        let store = store_with_block().await;
        let mut links = Vec::new();
        let transaction = tx_fixture(
            "0xfeed03",
            "NOAHxaa01",
            TransactionType::Delegate,
            json!({"pub_key": "Nppk01", "coin": "NOAH", "value": "100"}),
            None,
        );
        derive_validator_links(&store, 1, &transaction, &mut links).await;
        assert_eq!(links.len(), 1);
        let validator = store.find_validator_id("pk01").await.unwrap();
        assert_eq!(links[0].validator_id, validator.unwrap());
    }
}
