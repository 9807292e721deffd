// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Validator maintenance: the candidate and stake refresh workers.
//!
//! Both workers drain a height queue of capacity 1 — the pipeline's
//! alternation pattern means a pending height is superseded by a newer one
//! as soon as the worker drains it. Fetch problems skip the height; store
//! failures while replacing stakes are fatal, because a partial stake set
//! silently corrupts delegation totals.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use num_bigint::BigInt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    common::{strip_address_prefix, strip_public_key_prefix, IndexerError},
    config::DELEGATOR_RECOUNT_BLOCKS,
    db::{NewStake, Store, ValidatorUpdate},
    node::{BlockResult, CandidateData, NodeClient},
};

pub struct ValidatorService {
    store: Arc<Store>,
    node: Arc<dyn NodeClient>,
    base_coin: String,
    stake_chunk_size: usize,
    refresh_candidates: mpsc::Sender<u64>,
    refresh_stakes: mpsc::Sender<u64>,
}

impl ValidatorService {
    pub fn new(
        store: Arc<Store>,
        node: Arc<dyn NodeClient>,
        base_coin: String,
        stake_chunk_size: usize,
        refresh_candidates: mpsc::Sender<u64>,
        refresh_stakes: mpsc::Sender<u64>,
    ) -> Self {
        Self {
            store,
            node,
            base_coin,
            stake_chunk_size,
            refresh_candidates,
            refresh_stakes,
        }
    }

    pub async fn submit_candidate_refresh(&self, height: u64) -> Result<(), IndexerError> {
        self.refresh_candidates
            .send(height)
            .await
            .map_err(|_| IndexerError::QueueClosed("candidate refresh"))
    }

    pub async fn submit_stake_refresh(&self, height: u64) -> Result<(), IndexerError> {
        self.refresh_stakes
            .send(height)
            .await
            .map_err(|_| IndexerError::QueueClosed("stake refresh"))
    }

    /// Persists the public keys referenced by a block header, so links and
    /// transactions can resolve them.
    pub async fn handle_block_response(
        &self,
        block: &BlockResult,
    ) -> Result<Vec<String>, IndexerError> {
        let keys: Vec<String> = block
            .validators
            .iter()
            .map(|validator| strip_public_key_prefix(&validator.pub_key).to_string())
            .collect();
        self.store.insert_validators_if_absent(&keys).await?;
        Ok(keys)
    }

    pub async fn update_validators_worker(
        self: Arc<Self>,
        mut jobs: mpsc::Receiver<u64>,
    ) -> Result<(), IndexerError> {
        while let Some(height) = jobs.recv().await {
            if let Err(err) = self.update_validators(height).await {
                error!(height, %err, "candidate refresh failed");
            }
        }
        Ok(())
    }

    pub async fn update_stakes_worker(
        self: Arc<Self>,
        mut jobs: mpsc::Receiver<u64>,
    ) -> Result<(), IndexerError> {
        while let Some(height) = jobs.recv().await {
            self.update_stakes(height).await?;
        }
        Ok(())
    }

    /// Refreshes status, stake total, commission and addresses of every
    /// candidate. Statuses are reset first so validators missing from the
    /// response become inactive.
    pub async fn update_validators(&self, height: u64) -> Result<(), IndexerError> {
        let response = match self.node.get_candidates(height, false).await {
            Ok(response) => response,
            Err(err) => {
                warn!(height, %err, "candidate fetch failed");
                return Ok(());
            }
        };
        if let Some(err) = response.error {
            debug!(height, message = %err.message, "candidate refresh rejected");
            return Ok(());
        }
        let candidates = response.result.unwrap_or_default();
        if candidates.is_empty() {
            return Ok(());
        }

        self.preload(&candidates, false).await?;
        self.store.reset_validator_statuses().await?;
        for candidate in &candidates {
            match self.resolve_candidate(candidate).await {
                Ok(update) => self.store.update_validator(&update).await?,
                Err(err) => {
                    error!(pub_key = %candidate.pub_key, %err, "skipping candidate update")
                }
            }
        }
        Ok(())
    }

    /// Replaces the full stake set of the visited candidates and recomputes
    /// per-coin delegation shares.
    pub async fn update_stakes(&self, height: u64) -> Result<(), IndexerError> {
        let response = match self.node.get_candidates(height, true).await {
            Ok(response) => response,
            Err(err) => {
                warn!(height, %err, "stake fetch failed");
                return Ok(());
            }
        };
        if let Some(err) = response.error {
            debug!(height, message = %err.message, "stake refresh rejected");
            return Ok(());
        }
        let candidates = response.result.unwrap_or_default();
        if candidates.is_empty() {
            return Ok(());
        }

        self.preload(&candidates, true).await?;

        let mut stakes: Vec<NewStake> = Vec::new();
        let mut stakes_in_coin: BTreeMap<i64, BigInt> = BTreeMap::new();
        let mut validator_ids = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let validator_id = self
                .store
                .find_or_insert_validator(strip_public_key_prefix(&candidate.pub_key))
                .await?;
            validator_ids.push(validator_id);
            for stake in &candidate.stakes {
                let owner = strip_address_prefix(&stake.owner);
                let Some(owner_address_id) = self.store.find_address_id(owner).await? else {
                    error!(%owner, "stake owner is not persisted, skipping stake");
                    continue;
                };
                let Some(coin_id) = self.store.find_coin_id(&stake.coin).await? else {
                    error!(coin = %stake.coin, "stake coin is not persisted, skipping stake");
                    continue;
                };
                stakes.push(NewStake {
                    validator_id,
                    owner_address_id,
                    coin_id,
                    value: stake.value.clone(),
                    noah_value: stake.noah_value.clone(),
                });
                if stake.coin != self.base_coin {
                    let amount: BigInt = stake.value.parse().unwrap_or_default();
                    *stakes_in_coin.entry(coin_id).or_default() += amount;
                }
            }
        }

        let mut kept = Vec::with_capacity(stakes.len());
        for chunk in stakes.chunks(self.stake_chunk_size.max(1)) {
            kept.extend(self.store.replace_stakes(chunk).await?);
        }
        self.store.delete_stakes_not_in(&kept).await?;

        let coin_ids: Vec<i64> = stakes_in_coin.keys().copied().collect();
        for (coin_id, total) in &stakes_in_coin {
            if let Err(err) = self.update_delegation(*coin_id, total).await {
                error!(coin_id, %err, "delegation update failed");
            }
        }
        self.store
            .reset_delegation_percent_except(&coin_ids, &self.base_coin)
            .await?;

        if height % DELEGATOR_RECOUNT_BLOCKS == 0 {
            for validator_id in validator_ids {
                match self.store.count_delegators(validator_id).await {
                    Ok(count) => {
                        if let Err(err) =
                            self.store.update_count_delegators(validator_id, count).await
                        {
                            error!(validator_id, %err, "delegator count update failed");
                        }
                    }
                    Err(err) => error!(validator_id, %err, "delegator count failed"),
                }
            }
        }
        Ok(())
    }

    /// Materializes the public keys and addresses a candidate response
    /// references before any row pointing at them is written.
    async fn preload(&self, candidates: &[CandidateData], with_stakes: bool) -> Result<(), IndexerError> {
        let mut keys = Vec::with_capacity(candidates.len());
        let mut addresses = BTreeSet::new();
        for candidate in candidates {
            keys.push(strip_public_key_prefix(&candidate.pub_key).to_string());
            addresses.insert(strip_address_prefix(&candidate.reward_address).to_string());
            addresses.insert(strip_address_prefix(&candidate.owner_address).to_string());
            if with_stakes {
                for stake in &candidate.stakes {
                    addresses.insert(strip_address_prefix(&stake.owner).to_string());
                }
            }
        }
        self.store.insert_validators_if_absent(&keys).await?;
        let addresses: Vec<String> = addresses.into_iter().collect();
        self.store.insert_addresses_if_absent(&addresses).await?;
        Ok(())
    }

    async fn resolve_candidate(
        &self,
        candidate: &CandidateData,
    ) -> Result<ValidatorUpdate, IndexerError> {
        let id = self
            .store
            .find_or_insert_validator(strip_public_key_prefix(&candidate.pub_key))
            .await?;
        let reward_address_id = self
            .store
            .find_or_insert_address(strip_address_prefix(&candidate.reward_address))
            .await?;
        let owner_address_id = self
            .store
            .find_or_insert_address(strip_address_prefix(&candidate.owner_address))
            .await?;
        Ok(ValidatorUpdate {
            id,
            status: candidate.status as i64,
            total_stake: candidate.total_stake.clone(),
            commission: candidate.commission as i64,
            reward_address_id,
            owner_address_id,
            created_at_block_id: Some(candidate.created_at_block as i64),
        })
    }

    async fn update_delegation(&self, coin_id: i64, total: &BigInt) -> Result<(), IndexerError> {
        let Some(coin) = self.store.coin_by_id(coin_id).await? else {
            return Ok(());
        };
        let percent = delegation_percent(total, &coin.volume);
        self.store
            .update_coin_delegation_percent(coin_id, percent)
            .await?;
        Ok(())
    }
}

/// `min(100, 100 * staked / volume)`, truncated. Unparseable or zero volume
/// yields zero.
pub fn delegation_percent(total: &BigInt, volume: &str) -> i64 {
    let volume: BigDecimal = volume.parse().unwrap_or_else(|_| BigDecimal::zero());
    if volume.is_zero() {
        return 0;
    }
    let staked = BigDecimal::from(total.clone());
    let percent = staked * BigDecimal::from(100u32) / volume;
    percent.to_u64().map(|percent| percent.min(100)).unwrap_or(0) as i64
}
