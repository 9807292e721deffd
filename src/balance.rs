// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Balance reconciliation: dirty addresses flow in from the address pool,
//! balances are fetched from the node and upserted, then fanned out per
//! address over the broadcaster.

use std::{collections::BTreeSet, sync::Arc};

use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    broadcast::{address_channel, Broadcast},
    common::{next_job, IndexerError, SharedReceiver, ADDRESS_PREFIX},
    db::{NewBalance, Store},
    node::NodeClient,
};

/// Fresh balances of one address, symbol to amount.
#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    pub address: String,
    pub balances: Vec<(String, String)>,
}

pub struct BalanceService;

impl BalanceService {
    /// The singleton loop: dedupes incoming dirty-address batches and feeds
    /// the fetch pool one address at a time.
    pub async fn run(
        mut dirty_addresses: mpsc::Receiver<Vec<String>>,
        fetch: mpsc::Sender<String>,
    ) -> Result<(), IndexerError> {
        while let Some(batch) = dirty_addresses.recv().await {
            let unique: BTreeSet<String> = batch.into_iter().collect();
            for address in unique {
                fetch
                    .send(address)
                    .await
                    .map_err(|_| IndexerError::QueueClosed("balance fetch"))?;
            }
        }
        Ok(())
    }

    /// Turns a dirty address into a balance tuple via the node.
    pub async fn fetch_worker(
        node: Arc<dyn NodeClient>,
        jobs: SharedReceiver<String>,
        updates: mpsc::Sender<BalanceUpdate>,
    ) -> Result<(), IndexerError> {
        while let Some(address) = next_job(&jobs).await {
            let response = match node
                .get_address_balances(&format!("{ADDRESS_PREFIX}{address}"))
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(%address, %err, "balance fetch failed");
                    continue;
                }
            };
            if let Some(err) = response.error {
                warn!(%address, message = %err.message, "node refused balance query");
                continue;
            }
            let Some(result) = response.result else {
                continue;
            };
            let update = BalanceUpdate {
                address,
                balances: result.balance.into_iter().collect(),
            };
            updates
                .send(update)
                .await
                .map_err(|_| IndexerError::QueueClosed("balance updates"))?;
        }
        Ok(())
    }

    /// Writes balance tuples and broadcasts them on the per-address channel.
    pub async fn update_worker(
        store: Arc<Store>,
        broadcaster: Arc<dyn Broadcast>,
        jobs: SharedReceiver<BalanceUpdate>,
    ) -> Result<(), IndexerError> {
        while let Some(update) = next_job(&jobs).await {
            let address_id = match store.find_or_insert_address(&update.address).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(address = %update.address, %err, "skipping balance update");
                    continue;
                }
            };
            let mut rows = Vec::with_capacity(update.balances.len());
            let mut view = Vec::with_capacity(update.balances.len());
            for (symbol, value) in &update.balances {
                let coin_id = match store.find_or_insert_coin(symbol).await {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(%symbol, %err, "skipping balance coin");
                        continue;
                    }
                };
                rows.push(NewBalance {
                    address_id,
                    coin_id,
                    value: value.clone(),
                });
                view.push(json!({ "coin": symbol, "amount": value }));
            }
            store.upsert_balances(&rows).await?;
            broadcaster
                .publish(&address_channel(&update.address), json!(view))
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::broadcast::recording::RecordingBroadcast;
    use crate::common::job_queue;
    use crate::node::mock::MockNode;
    use crate::node::{AddressBalancesResult, NodeResponse};

    #[tokio::test]
    async fn dirty_addresses_end_up_as_balance_rows_and_broadcasts() {
        let store = Arc::new(Store::in_memory().await);
        let broadcaster = Arc::new(RecordingBroadcast::default());
        let node = Arc::new(MockNode::new());
        node.set_balances(
            "NOAHxaa01",
            NodeResponse::ok(AddressBalancesResult {
                balance: BTreeMap::from([
                    ("NOAH".to_string(), "100".to_string()),
                    ("ACME".to_string(), "5".to_string()),
                ]),
            }),
        );

        let (dirty_tx, dirty_rx) = tokio::sync::mpsc::channel(4);
        let (fetch_tx, fetch_rx) = job_queue(4);
        let (update_tx, update_rx) = job_queue(4);
        let node_client: Arc<dyn NodeClient> = node.clone();
        let run = tokio::spawn(BalanceService::run(dirty_rx, fetch_tx));
        let fetch = tokio::spawn(BalanceService::fetch_worker(
            node_client,
            fetch_rx,
            update_tx,
        ));
        let update = tokio::spawn(BalanceService::update_worker(
            store.clone(),
            broadcaster.clone(),
            update_rx,
        ));

        dirty_tx
            .send(vec!["aa01".to_string(), "aa01".to_string()])
            .await
            .unwrap();

        // poll until the pipeline lands both rows
        let mut done = false;
        for _ in 0..200 {
            tokio::task::yield_now().await;
            let address = store.find_address_id("aa01").await.unwrap();
            if let Some(address_id) = address {
                if let Some(coin_id) = store.find_coin_id("ACME").await.unwrap() {
                    if store.balance(address_id, coin_id).await.unwrap().is_some() {
                        done = true;
                        break;
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(done, "balance rows never landed");

        let messages = broadcaster.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "NOAHxaa01");

        run.abort();
        fetch.abort();
        update.abort();
    }
}
