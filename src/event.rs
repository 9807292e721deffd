// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Reward and slash events, and the time-bucketed reward rollup.

use std::{collections::BTreeMap, sync::Arc};

use num_bigint::BigInt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use crate::{
    common::{
        next_job, strip_address_prefix, strip_public_key_prefix, IndexerError, SharedReceiver,
    },
    db::{AggregatedReward, NewReward, NewSlash, Store},
    node::{EventData, EventsResult, RewardEventValue, SlashEventValue},
};

pub struct EventService {
    store: Arc<Store>,
    rewards: mpsc::Sender<Vec<NewReward>>,
    slashes: mpsc::Sender<Vec<NewSlash>>,
    /// Held for the duration of a rollup; a tick that finds it taken skips.
    aggregation_gate: Mutex<()>,
}

impl EventService {
    pub fn new(
        store: Arc<Store>,
        rewards: mpsc::Sender<Vec<NewReward>>,
        slashes: mpsc::Sender<Vec<NewSlash>>,
    ) -> Self {
        Self {
            store,
            rewards,
            slashes,
            aggregation_gate: Mutex::new(()),
        }
    }

    /// Classifies a block's events and queues them for the reward and slash
    /// pools. A single unresolvable event is logged and skipped.
    pub async fn handle_event_response(
        &self,
        height: u64,
        events: &EventsResult,
    ) -> Result<(), IndexerError> {
        let mut rewards = Vec::new();
        let mut slashes = Vec::new();
        for event in &events.events {
            if event.kind.contains("Reward") {
                match self.resolve_reward(height, event).await {
                    Ok(reward) => rewards.push(reward),
                    Err(err) => error!(height, kind = %event.kind, %err, "skipping reward event"),
                }
            } else if event.kind.contains("Slash") {
                match self.resolve_slash(height, event).await {
                    Ok(slash) => slashes.push(slash),
                    Err(err) => error!(height, kind = %event.kind, %err, "skipping slash event"),
                }
            } else {
                debug!(kind = %event.kind, "ignoring unknown event kind");
            }
        }
        if !rewards.is_empty() {
            self.rewards
                .send(rewards)
                .await
                .map_err(|_| IndexerError::QueueClosed("rewards"))?;
        }
        if !slashes.is_empty() {
            self.slashes
                .send(slashes)
                .await
                .map_err(|_| IndexerError::QueueClosed("slashes"))?;
        }
        Ok(())
    }

    async fn resolve_reward(
        &self,
        height: u64,
        event: &EventData,
    ) -> Result<NewReward, IndexerError> {
        let value: RewardEventValue = serde_json::from_value(event.value.clone())?;
        let address = strip_address_prefix(&value.address);
        let address_id = self
            .store
            .find_address_id(address)
            .await?
            .ok_or_else(|| IndexerError::UnknownAddress(address.to_string()))?;
        let validator_id = self
            .store
            .find_or_insert_validator(strip_public_key_prefix(&value.validator_pub_key))
            .await?;
        Ok(NewReward {
            block_id: height as i64,
            role: value.role,
            amount: value.amount,
            address_id,
            validator_id,
        })
    }

    async fn resolve_slash(
        &self,
        height: u64,
        event: &EventData,
    ) -> Result<NewSlash, IndexerError> {
        let value: SlashEventValue = serde_json::from_value(event.value.clone())?;
        let address = strip_address_prefix(&value.address);
        let address_id = self
            .store
            .find_address_id(address)
            .await?
            .ok_or_else(|| IndexerError::UnknownAddress(address.to_string()))?;
        let validator_id = self
            .store
            .find_or_insert_validator(strip_public_key_prefix(&value.validator_pub_key))
            .await?;
        let coin_id = self.store.find_or_insert_coin(&value.coin).await?;
        Ok(NewSlash {
            block_id: height as i64,
            coin_id,
            amount: value.amount,
            address_id,
            validator_id,
        })
    }

    pub async fn save_rewards_worker(
        store: Arc<Store>,
        jobs: SharedReceiver<Vec<NewReward>>,
    ) -> Result<(), IndexerError> {
        while let Some(batch) = next_job(&jobs).await {
            if let Err(err) = store.insert_rewards(&batch).await {
                error!(%err, "saving rewards failed");
            }
        }
        Ok(())
    }

    pub async fn save_slashes_worker(
        store: Arc<Store>,
        jobs: SharedReceiver<Vec<NewSlash>>,
    ) -> Result<(), IndexerError> {
        while let Some(batch) = next_job(&jobs).await {
            if let Err(err) = store.insert_slashes(&batch).await {
                error!(%err, "saving slashes failed");
            }
        }
        Ok(())
    }

    /// Rolls rewards up into time buckets. Single-flight: overlapping ticks
    /// skip instead of aggregating the same range twice.
    pub async fn aggregate_rewards(&self, interval: &str, height: u64) {
        let Ok(_guard) = self.aggregation_gate.try_lock() else {
            debug!(height, "reward aggregation already running, skipping");
            return;
        };
        if let Err(err) = self.aggregate(interval, height).await {
            error!(height, %err, "reward aggregation failed");
        }
    }

    async fn aggregate(&self, interval: &str, height: u64) -> Result<(), IndexerError> {
        let to_block = height as i64;
        let rewards = self.store.rewards_up_to(to_block).await?;
        if rewards.is_empty() {
            return Ok(());
        }
        let mut buckets: BTreeMap<(String, i64, i64, String), BigInt> = BTreeMap::new();
        for reward in rewards {
            let time_id = bucket_time(interval, &reward.block_created_at);
            let amount: BigInt = reward.amount.parse().unwrap_or_default();
            *buckets
                .entry((time_id, reward.address_id, reward.validator_id, reward.role))
                .or_default() += amount;
        }
        for ((time_id, address_id, validator_id, role), sum) in buckets {
            let existing = self
                .store
                .aggregated_reward_amount(&time_id, address_id, validator_id, &role)
                .await?;
            let total = match existing {
                Some(amount) => amount.parse::<BigInt>().unwrap_or_default() + &sum,
                None => sum,
            };
            self.store
                .upsert_aggregated_reward(&AggregatedReward {
                    time_id,
                    to_block_id: to_block,
                    address_id,
                    validator_id,
                    role,
                    amount: total.to_string(),
                })
                .await?;
        }
        self.store.delete_rewards_up_to(to_block).await?;
        Ok(())
    }
}

/// Truncates an RFC 3339 timestamp to its aggregation bucket.
fn bucket_time(interval: &str, timestamp: &str) -> String {
    match interval {
        "day" => format!("{}T00:00:00", timestamp.get(..10).unwrap_or(timestamp)),
        _ => format!("{}:00:00", timestamp.get(..13).unwrap_or(timestamp)),
    }
}
