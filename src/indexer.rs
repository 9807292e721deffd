// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The block-height pipeline.
//!
//! A single loop owns the height cursor. Per height, the steps whose rows
//! later steps depend on run synchronously in order: addresses, then
//! validators, header and links, then freshly created coins, then the
//! transaction dispatch. Event handling, reward aggregation, balance
//! refresh and the validator refreshes run asynchronously and may
//! interleave across heights. Worker failures on the fatal tier end the
//! run; the process is expected to be restarted by a supervisor and the
//! startup truncation re-indexes the tip.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinSet, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    address::{AddressJob, AddressService},
    balance::{BalanceService, BalanceUpdate},
    block::BlockService,
    broadcast::Broadcast,
    bus::EventBus,
    coin::CoinService,
    common::{job_queue, IndexerError, SharedReceiver},
    config::{IndexerConfig, CHASING_MODE_DIFF, STAKE_REFRESH_BLOCKS},
    db::{
        NewReward, NewSlash, NewTransactionOutput, Store, TransactionValidatorLink,
    },
    event::EventService,
    kv::SymbolTable,
    node::{EventsResult, NodeClient, TransactionData},
    transaction::{InvalidTxJob, TransactionService, TxJob},
    validator::ValidatorService,
};

/// Pause before re-requesting a block the node has not finalized yet.
const BLOCK_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Period of the coin-metadata repair loop.
const COIN_REPAIR_PERIOD: Duration = Duration::from_secs(60);
/// Period of the validator-uptime recomputation.
const UPTIME_PERIOD: Duration = Duration::from_secs(300);
/// Queue depth of the worker pools.
const POOL_QUEUE: usize = 16;

/// Outcome of one pipeline iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Advance,
    Retry,
}

/// Channel ends handed to the workers when they are spawned.
struct Wiring {
    address_jobs: SharedReceiver<AddressJob>,
    dirty_addresses_rx: mpsc::Receiver<Vec<String>>,
    dirty_addresses_tx: mpsc::Sender<Vec<String>>,
    tx_jobs: SharedReceiver<TxJob>,
    invalid_jobs: SharedReceiver<InvalidTxJob>,
    output_jobs_rx: SharedReceiver<Vec<NewTransactionOutput>>,
    output_jobs_tx: mpsc::Sender<Vec<NewTransactionOutput>>,
    link_jobs_rx: SharedReceiver<Vec<TransactionValidatorLink>>,
    link_jobs_tx: mpsc::Sender<Vec<TransactionValidatorLink>>,
    reward_jobs: SharedReceiver<Vec<NewReward>>,
    slash_jobs: SharedReceiver<Vec<NewSlash>>,
    candidate_refresh_rx: mpsc::Receiver<u64>,
    stake_refresh_rx: mpsc::Receiver<u64>,
    coin_batches_rx: mpsc::Receiver<Vec<TransactionData>>,
    coin_symbols_rx: mpsc::Receiver<BTreeSet<String>>,
    coin_symbols_tx: mpsc::Sender<BTreeSet<String>>,
    balance_fetch_rx: SharedReceiver<String>,
    balance_fetch_tx: mpsc::Sender<String>,
    balance_updates_rx: SharedReceiver<BalanceUpdate>,
    balance_updates_tx: mpsc::Sender<BalanceUpdate>,
}

pub struct Indexer {
    config: IndexerConfig,
    node: Arc<dyn NodeClient>,
    store: Arc<Store>,
    broadcaster: Arc<dyn Broadcast>,
    addresses: AddressService,
    blocks: BlockService,
    coins: Arc<CoinService>,
    validators: Arc<ValidatorService>,
    transactions: TransactionService,
    events: Arc<EventService>,
    wiring: Option<Wiring>,
    // private scheduler state
    chasing_mode: bool,
    current_node_height: u64,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        node: Arc<dyn NodeClient>,
        store: Arc<Store>,
        kv: Arc<SymbolTable>,
        bus: Arc<dyn EventBus>,
        broadcaster: Arc<dyn Broadcast>,
    ) -> Self {
        let (address_tx, address_rx) = job_queue(POOL_QUEUE);
        let (dirty_tx, dirty_rx) = mpsc::channel(POOL_QUEUE);
        let (tx_tx, tx_rx) = job_queue(POOL_QUEUE);
        let (invalid_tx, invalid_rx) = job_queue(POOL_QUEUE);
        let (output_tx, output_rx) = job_queue(POOL_QUEUE);
        let (link_tx, link_rx) = job_queue(POOL_QUEUE);
        let (reward_tx, reward_rx) = job_queue(POOL_QUEUE);
        let (slash_tx, slash_rx) = job_queue(POOL_QUEUE);
        let (fetch_tx, fetch_rx) = job_queue(POOL_QUEUE);
        let (update_tx, update_rx) = job_queue(POOL_QUEUE);
        // capacity 1: a newer refresh height waits for the worker to drain
        // the previous one
        let (candidate_tx, candidate_rx) = mpsc::channel(1);
        let (stake_tx, stake_rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (symbols_tx, symbols_rx) = mpsc::channel(1);

        let addresses = AddressService::new(address_tx, config.tx_chunk_size);
        let blocks = BlockService::new(store.clone(), broadcaster.clone());
        let coins = Arc::new(CoinService::new(
            store.clone(),
            node.clone(),
            kv,
            bus,
            config.base_coin.clone(),
            batch_tx,
        ));
        let validators = Arc::new(ValidatorService::new(
            store.clone(),
            node.clone(),
            config.base_coin.clone(),
            config.stake_chunk_size,
            candidate_tx,
            stake_tx,
        ));
        let transactions = TransactionService::new(tx_tx, invalid_tx);
        let events = Arc::new(EventService::new(store.clone(), reward_tx, slash_tx));

        Self {
            config,
            node,
            store,
            broadcaster,
            addresses,
            blocks,
            coins,
            validators,
            transactions,
            events,
            wiring: Some(Wiring {
                address_jobs: address_rx,
                dirty_addresses_rx: dirty_rx,
                dirty_addresses_tx: dirty_tx,
                tx_jobs: tx_rx,
                invalid_jobs: invalid_rx,
                output_jobs_rx: output_rx,
                output_jobs_tx: output_tx,
                link_jobs_rx: link_rx,
                link_jobs_tx: link_tx,
                reward_jobs: reward_rx,
                slash_jobs: slash_rx,
                candidate_refresh_rx: candidate_rx,
                stake_refresh_rx: stake_rx,
                coin_batches_rx: batch_rx,
                coin_symbols_rx: symbols_rx,
                coin_symbols_tx: symbols_tx,
                balance_fetch_rx: fetch_rx,
                balance_fetch_tx: fetch_tx,
                balance_updates_rx: update_rx,
                balance_updates_tx: update_tx,
            }),
            chasing_mode: true,
            current_node_height: 0,
        }
    }

    /// Runs the pipeline until a fatal error.
    pub async fn run(mut self) -> Result<(), IndexerError> {
        // the node must be reachable before the tip is truncated
        let status = self.node.get_status().await?;
        if let Some(err) = status.error {
            return Err(IndexerError::from_node(err.message, err.data));
        }
        self.store.ensure_base_coin(&self.config.base_coin).await?;
        self.store.delete_last_block_data().await?;

        let mut height = match self.store.last_block().await? {
            Some(last) => {
                let next = last.id as u64 + 1;
                self.blocks.set_last_block(last).await;
                next
            }
            None => 1,
        };

        let mut tasks = JoinSet::new();
        self.spawn_workers(&mut tasks);
        self.spawn_background_loops(&mut tasks);
        info!(height, "starting block pipeline");

        loop {
            tokio::select! {
                outcome = self.step(height) => {
                    if outcome? == Step::Advance {
                        height += 1;
                    }
                }
                Some(result) = tasks.join_next() => {
                    return Err(match result {
                        Ok(Err(err)) => err,
                        Ok(Ok(())) => IndexerError::WorkerStopped,
                        Err(join_error) => {
                            error!(%join_error, "worker panicked");
                            IndexerError::WorkerStopped
                        }
                    });
                }
            }
        }
    }

    /// One iteration of the pipeline at the given height.
    pub(crate) async fn step(&mut self, height: u64) -> Result<Step, IndexerError> {
        self.refresh_chasing_mode(height).await?;

        let response = self.node.get_block(height).await?;
        let block = match (response.result, response.error) {
            (Some(block), None) => block,
            (_, err) => {
                if let Some(err) = err {
                    debug!(height, message = %err.message, "block unavailable, retrying");
                }
                sleep(BLOCK_RETRY_DELAY).await;
                return Ok(Step::Retry);
            }
        };

        let events = match self.node.get_block_events(height).await {
            Ok(response) => match response.result {
                Some(events) => events,
                None => {
                    if let Some(err) = response.error {
                        warn!(height, message = %err.message, "event query rejected");
                    }
                    EventsResult::empty()
                }
            },
            Err(err) => {
                warn!(height, %err, "event fetch failed");
                EventsResult::empty()
            }
        };

        // addresses first: everything below references them
        self.addresses.handle_responses(&block, &events).await?;

        let validator_keys = self.validators.handle_block_response(&block).await?;
        self.blocks.handle_block_response(&block).await?;
        self.blocks.link_with_validators(&block).await?;

        // new coins before the transactions that reference them
        let extracted = self.coins.extract_from_transactions(&block.transactions);
        self.coins.create_new_coins(&extracted).await?;

        if block.num_txs > 0 && !validator_keys.is_empty() {
            self.transactions
                .handle_block_transactions(
                    block.height as i64,
                    &block.time,
                    &block.transactions,
                    self.config.tx_chunk_size,
                )
                .await?;
            self.coins
                .enqueue_update_from_txs(block.transactions.clone())
                .await?;
        }

        let every = self.config.reward_aggregate_every_blocks;
        if every > 0 && height % every == 0 {
            let events_service = self.events.clone();
            let interval = self.config.reward_aggregate_time_interval.clone();
            tokio::spawn(async move {
                events_service.aggregate_rewards(&interval, height).await;
            });
        }

        let events_service = self.events.clone();
        tokio::spawn(async move {
            if let Err(err) = events_service.handle_event_response(height, &events).await {
                error!(height, %err, "event handling failed");
            }
        });

        // stakes and candidates never refresh on the same height
        if height % STAKE_REFRESH_BLOCKS == 0 {
            self.validators.submit_stake_refresh(height).await?;
        } else if height > 1 {
            self.validators.submit_candidate_refresh(height).await?;
        }

        Ok(Step::Advance)
    }

    /// Keeps the chasing flag in sync with the cached node tip.
    ///
    /// While chasing, the cached tip is enough to stay in chasing mode, so
    /// `/status` is not hammered. Leaving chasing mode requires a fresh tip:
    /// the cache may be stale and the indexer only looks caught up.
    pub(crate) async fn refresh_chasing_mode(&mut self, height: u64) -> Result<(), IndexerError> {
        if self.current_node_height == 0 {
            self.current_node_height = self.node_tip().await?;
        }
        let is_chasing = self.current_node_height.saturating_sub(height) > CHASING_MODE_DIFF;
        if is_chasing {
            self.chasing_mode = true;
        } else if self.chasing_mode {
            self.current_node_height = self.node_tip().await?;
            self.chasing_mode =
                self.current_node_height.saturating_sub(height) > CHASING_MODE_DIFF;
        }
        Ok(())
    }

    async fn node_tip(&self) -> Result<u64, IndexerError> {
        let response = self.node.get_status().await?;
        if let Some(err) = response.error {
            return Err(IndexerError::from_node(err.message, err.data));
        }
        Ok(response
            .result
            .map(|status| status.latest_block_height)
            .unwrap_or_default())
    }

    #[cfg(test)]
    pub(crate) fn chasing_mode(&self) -> bool {
        self.chasing_mode
    }

    /// Spawns the worker pools and singleton workers.
    pub(crate) fn spawn_workers(&mut self, tasks: &mut JoinSet<Result<(), IndexerError>>) {
        let wiring = self.wiring.take().expect("workers already spawned");
        let config = &self.config;

        for _ in 0..config.wrk_save_addresses.max(1) {
            tasks.spawn(AddressService::worker(
                self.store.clone(),
                wiring.address_jobs.clone(),
                wiring.dirty_addresses_tx.clone(),
            ));
        }
        for _ in 0..config.wrk_save_txs.max(1) {
            tasks.spawn(TransactionService::save_transactions_worker(
                self.store.clone(),
                self.broadcaster.clone(),
                wiring.tx_jobs.clone(),
                wiring.output_jobs_tx.clone(),
                wiring.link_jobs_tx.clone(),
            ));
        }
        for _ in 0..config.wrk_save_txs_output.max(1) {
            tasks.spawn(TransactionService::save_outputs_worker(
                self.store.clone(),
                wiring.output_jobs_rx.clone(),
            ));
        }
        for _ in 0..config.wrk_save_invalid_txs.max(1) {
            tasks.spawn(TransactionService::save_invalid_transactions_worker(
                self.store.clone(),
                wiring.invalid_jobs.clone(),
            ));
        }
        for _ in 0..config.wrk_save_validator_txs.max(1) {
            tasks.spawn(TransactionService::save_validator_links_worker(
                self.store.clone(),
                wiring.link_jobs_rx.clone(),
            ));
        }
        for _ in 0..config.wrk_save_rewards.max(1) {
            tasks.spawn(EventService::save_rewards_worker(
                self.store.clone(),
                wiring.reward_jobs.clone(),
            ));
        }
        for _ in 0..config.wrk_save_slashes.max(1) {
            tasks.spawn(EventService::save_slashes_worker(
                self.store.clone(),
                wiring.slash_jobs.clone(),
            ));
        }
        for _ in 0..config.wrk_balances_from_node.max(1) {
            tasks.spawn(BalanceService::fetch_worker(
                self.node.clone(),
                wiring.balance_fetch_rx.clone(),
                wiring.balance_updates_tx.clone(),
            ));
        }
        for _ in 0..config.wrk_update_balance.max(1) {
            tasks.spawn(BalanceService::update_worker(
                self.store.clone(),
                self.broadcaster.clone(),
                wiring.balance_updates_rx.clone(),
            ));
        }

        tasks.spawn(
            self.validators
                .clone()
                .update_validators_worker(wiring.candidate_refresh_rx),
        );
        tasks.spawn(
            self.validators
                .clone()
                .update_stakes_worker(wiring.stake_refresh_rx),
        );
        tasks.spawn(
            self.coins
                .clone()
                .update_from_txs_worker(wiring.coin_batches_rx, wiring.coin_symbols_tx.clone()),
        );
        tasks.spawn(
            self.coins
                .clone()
                .update_from_symbols_worker(wiring.coin_symbols_rx),
        );
        tasks.spawn(BalanceService::run(
            wiring.dirty_addresses_rx,
            wiring.balance_fetch_tx.clone(),
        ));
    }

    /// Spawns the periodic loops decoupled from the height cursor.
    fn spawn_background_loops(&self, tasks: &mut JoinSet<Result<(), IndexerError>>) {
        let coins = self.coins.clone();
        tasks.spawn(async move {
            loop {
                if let Err(err) = coins.fix_broken_metadata().await {
                    error!(%err, "coin metadata repair failed");
                }
                sleep(COIN_REPAIR_PERIOD).await;
            }
        });

        let store = self.store.clone();
        tasks.spawn(async move {
            loop {
                if let Err(err) = refresh_validator_uptimes(&store).await {
                    error!(%err, "uptime recomputation failed");
                }
                sleep(UPTIME_PERIOD).await;
            }
        });

        tasks.spawn(TransactionService::update_tx_index_worker(self.store.clone()));
    }
}

/// Recomputes `uptime` for the active validator set: the share of blocks the
/// validator signed since its first known block, capped at 100.
pub(crate) async fn refresh_validator_uptimes(store: &Store) -> Result<(), IndexerError> {
    let validators = store.active_validators().await?;
    if validators.is_empty() {
        return Ok(());
    }
    store.reset_uptimes().await?;
    for validator in validators {
        let Some(first_block) = store.validator_first_block(validator.id).await? else {
            continue;
        };
        let total = store.block_count_since(first_block).await?;
        if total == 0 {
            continue;
        }
        let signed = store.signed_block_count(validator.id, first_block).await?;
        let uptime = (signed as f64 / total as f64 * 100.0).min(100.0);
        if let Err(err) = store.update_validator_uptime(validator.id, uptime).await {
            error!(validator_id = validator.id, %err, "uptime update failed");
        }
    }
    Ok(())
}
