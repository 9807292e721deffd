// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Address extraction and the insert-if-absent pool.
//!
//! Addresses are the first entities written for a block: everything else
//! (transactions, stakes, rewards, balances) references them, so the
//! pipeline drives this service to completion before touching the rest.

use std::{collections::BTreeSet, sync::Arc};

use futures::future;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    common::{
        next_job, strip_address_prefix, Ack, IndexerError, SharedReceiver, ADDRESS_PREFIX,
    },
    db::Store,
    node::{BlockResult, EventsResult, TransactionData, TransactionType, TxPayload},
};

/// A batch of normalized addresses, with an optional completion callback.
pub struct AddressJob {
    pub addresses: Vec<String>,
    pub ack: Option<Ack>,
}

pub struct AddressService {
    jobs: mpsc::Sender<AddressJob>,
    chunk_size: usize,
}

impl AddressService {
    pub fn new(jobs: mpsc::Sender<AddressJob>, chunk_size: usize) -> Self {
        Self { jobs, chunk_size }
    }

    /// Extracts every address referenced by a block and its events and runs
    /// them through the worker pool, returning once all are persisted.
    pub async fn handle_responses(
        &self,
        block: &BlockResult,
        events: &EventsResult,
    ) -> Result<(), IndexerError> {
        let mut addresses = extract_from_block(block);
        addresses.extend(extract_from_events(events));
        if addresses.is_empty() {
            return Ok(());
        }
        let addresses: Vec<String> = addresses.into_iter().collect();
        let mut pending = Vec::new();
        for chunk in addresses.chunks(self.chunk_size.max(1)) {
            let (ack, done) = oneshot::channel();
            self.jobs
                .send(AddressJob {
                    addresses: chunk.to_vec(),
                    ack: Some(ack),
                })
                .await
                .map_err(|_| IndexerError::QueueClosed("addresses"))?;
            pending.push(done);
        }
        future::try_join_all(pending)
            .await
            .map_err(|_| IndexerError::WorkerStopped)?;
        Ok(())
    }

    /// Drains address batches, inserting missing rows and forwarding the
    /// batch to the balance pipeline.
    pub async fn worker(
        store: Arc<Store>,
        jobs: SharedReceiver<AddressJob>,
        dirty_addresses: mpsc::Sender<Vec<String>>,
    ) -> Result<(), IndexerError> {
        while let Some(job) = next_job(&jobs).await {
            store.insert_addresses_if_absent(&job.addresses).await?;
            dirty_addresses
                .send(job.addresses)
                .await
                .map_err(|_| IndexerError::QueueClosed("dirty addresses"))?;
            if let Some(ack) = job.ack {
                let _ = ack.send(());
            }
        }
        Ok(())
    }
}

/// Addresses referenced by a block: the proposer when it is address-shaped,
/// every sender, and every recipient-like field of the typed payloads.
pub fn extract_from_block(block: &BlockResult) -> BTreeSet<String> {
    let mut addresses = BTreeSet::new();
    if let Some(proposer) = &block.proposer {
        if proposer.starts_with(ADDRESS_PREFIX) {
            addresses.insert(strip_address_prefix(proposer).to_string());
        }
    }
    for transaction in &block.transactions {
        addresses.insert(strip_address_prefix(&transaction.from).to_string());
        collect_payload_addresses(transaction, &mut addresses);
    }
    addresses
}

fn collect_payload_addresses(transaction: &TransactionData, addresses: &mut BTreeSet<String>) {
    if transaction.transaction_type() == Some(TransactionType::RedeemCheck) {
        // the redeemer is the sender, already collected
        return;
    }
    let payload = match transaction.payload() {
        Ok(payload) => payload,
        Err(error) => {
            debug!(hash = %transaction.hash, %error, "unparseable transaction data");
            return;
        }
    };
    match payload {
        TxPayload::Send(data) => {
            addresses.insert(strip_address_prefix(&data.to).to_string());
        }
        TxPayload::MultiSend(data) => {
            for item in &data.list {
                addresses.insert(strip_address_prefix(&item.to).to_string());
            }
        }
        TxPayload::DeclareCandidacy(data) => {
            addresses.insert(strip_address_prefix(&data.address).to_string());
        }
        TxPayload::EditCandidate(data) => {
            addresses.insert(strip_address_prefix(&data.reward_address).to_string());
            addresses.insert(strip_address_prefix(&data.owner_address).to_string());
        }
        TxPayload::CreateMultisig(data) => {
            for address in &data.addresses {
                addresses.insert(strip_address_prefix(address).to_string());
            }
        }
        _ => {}
    }
}

/// Addresses referenced by reward and slash events.
pub fn extract_from_events(events: &EventsResult) -> BTreeSet<String> {
    let mut addresses = BTreeSet::new();
    for event in &events.events {
        if let Some(address) = event.value.get("address").and_then(|value| value.as_str()) {
            addresses.insert(strip_address_prefix(address).to_string());
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::node::mock::{block_fixture, signer_fixture, tx_fixture};
    use crate::node::EventData;

    #[test]
    fn collects_addresses_from_block_and_events() {
        let block = block_fixture(
            5,
            vec![
                tx_fixture(
                    "0xfeed01",
                    "NOAHxaa01",
                    TransactionType::Send,
                    json!({"coin": "NOAH", "to": "NOAHxbb02", "value": "1"}),
                    None,
                ),
                tx_fixture(
                    "0xfeed02",
                    "NOAHxaa01",
                    TransactionType::MultiSend,
                    json!({"list": [
                        {"coin": "NOAH", "to": "NOAHxcc03", "value": "1"},
                        {"coin": "NOAH", "to": "NOAHxdd04", "value": "2"},
                    ]}),
                    None,
                ),
            ],
            vec![signer_fixture("Nppk01", Some(true))],
        );
        let events = EventsResult {
            events: vec![EventData {
                kind: "noah/RewardEvent".to_string(),
                value: json!({
                    "role": "Validator",
                    "address": "NOAHxee05",
                    "amount": "10",
                    "validator_pub_key": "Nppk01",
                }),
            }],
        };

        let mut addresses = extract_from_block(&block.result.unwrap());
        addresses.extend(extract_from_events(&events));

        let expected: BTreeSet<String> = ["aa01", "bb02", "cc03", "dd04", "ee05"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(addresses, expected);
    }

    #[test]
    fn malformed_payloads_are_skipped() {
        let block = block_fixture(
            5,
            vec![tx_fixture(
                "0xfeed01",
                "NOAHxaa01",
                TransactionType::Send,
                json!({"unexpected": true}),
                None,
            )],
            vec![],
        );
        let addresses = extract_from_block(&block.result.unwrap());
        assert_eq!(addresses.len(), 1);
        assert!(addresses.contains("aa01"));
    }
}
