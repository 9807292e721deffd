// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The coin service: create-coin extraction, on-chain refresh and metadata
//! repair.
//!
//! Prices follow the bonding curve `price = reserve / (volume * crr / 100)`
//! in arbitrary precision. The base coin is exempt from node refresh and
//! from creation notifications.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use bigdecimal::{BigDecimal, Zero};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{
    bus::{CoinPayload, EventBus, COIN_CREATED_SUBJECT, COIN_UPDATED_SUBJECT},
    common::{parse_number, strip_hash_prefix, IndexerError},
    db::{CoinStateUpdate, NewCoin, Store},
    kv::SymbolTable,
    node::{
        BuyCoinTxData, CoinInfoResult, CreateCoinTxData, NodeClient, SellAllCoinTxData,
        SellCoinTxData, TransactionData, TransactionType,
    },
};

/// A coin parsed out of a create-coin transaction, with the hash that
/// created it.
#[derive(Debug, Clone)]
pub struct ExtractedCoin {
    pub coin: NewCoin,
    pub tx_hash: String,
}

pub struct CoinService {
    store: Arc<Store>,
    node: Arc<dyn NodeClient>,
    kv: Arc<SymbolTable>,
    bus: Arc<dyn EventBus>,
    base_coin: String,
    tx_batches: mpsc::Sender<Vec<TransactionData>>,
}

impl CoinService {
    pub fn new(
        store: Arc<Store>,
        node: Arc<dyn NodeClient>,
        kv: Arc<SymbolTable>,
        bus: Arc<dyn EventBus>,
        base_coin: String,
        tx_batches: mpsc::Sender<Vec<TransactionData>>,
    ) -> Self {
        Self {
            store,
            node,
            kv,
            bus,
            base_coin,
            tx_batches,
        }
    }

    /// Queues a block's transactions for the update-from-txs worker.
    pub async fn enqueue_update_from_txs(
        &self,
        transactions: Vec<TransactionData>,
    ) -> Result<(), IndexerError> {
        self.tx_batches
            .send(transactions)
            .await
            .map_err(|_| IndexerError::QueueClosed("coin tx batches"))
    }

    /// Collects the coins created in a transaction list, one per symbol.
    /// A transaction with a log was rejected by the chain and creates
    /// nothing.
    pub fn extract_from_transactions(&self, transactions: &[TransactionData]) -> Vec<ExtractedCoin> {
        let mut coins: Vec<ExtractedCoin> = Vec::new();
        for transaction in transactions {
            if transaction.transaction_type() != Some(TransactionType::CreateCoin) {
                continue;
            }
            if let Some(log) = &transaction.log {
                debug!(hash = %transaction.hash, log, "create-coin rejected by the chain");
                continue;
            }
            match extract_one(transaction) {
                Ok(extracted) => {
                    if !coins.iter().any(|known| known.coin.symbol == extracted.coin.symbol) {
                        coins.push(extracted);
                    }
                }
                Err(err) => error!(hash = %transaction.hash, %err, "unparseable create-coin data"),
            }
        }
        coins
    }

    /// Inserts the new coins, records their creating hash in the side table
    /// and announces them. Everything is awaited here so failures are
    /// observable and shutdown drains cleanly.
    pub async fn create_new_coins(&self, coins: &[ExtractedCoin]) -> Result<(), IndexerError> {
        if coins.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewCoin> = coins.iter().map(|extracted| extracted.coin.clone()).collect();
        self.store.insert_coins_if_absent(&rows).await?;
        for extracted in coins {
            let coin = &extracted.coin;
            if coin.symbol == self.base_coin {
                continue;
            }
            self.kv.record(&coin.symbol, &extracted.tx_hash)?;
            let payload = CoinPayload::now(
                &coin.symbol,
                &coin.price,
                &coin.capitalization,
                &coin.reserve_balance,
                &coin.volume,
            );
            if let Err(err) = self
                .bus
                .publish(COIN_CREATED_SUBJECT, payload.encode_payload())
                .await
            {
                warn!(symbol = %coin.symbol, %err, "coin-created publish failed");
            }
        }
        Ok(())
    }

    /// Accumulates the symbols a transaction batch may have moved and hands
    /// the set to the refresh worker. Two queues keep deduplication coarse.
    pub async fn update_from_txs_worker(
        self: Arc<Self>,
        mut jobs: mpsc::Receiver<Vec<TransactionData>>,
        symbols: mpsc::Sender<BTreeSet<String>>,
    ) -> Result<(), IndexerError> {
        while let Some(batch) = jobs.recv().await {
            let mut touched = BTreeSet::new();
            for transaction in &batch {
                touched.insert(transaction.gas_coin.clone());
                match transaction.transaction_type() {
                    Some(TransactionType::SellCoin) => {
                        if let Ok(data) =
                            serde_json::from_value::<SellCoinTxData>(transaction.data.clone())
                        {
                            touched.insert(data.coin_to_buy);
                            touched.insert(data.coin_to_sell);
                        }
                    }
                    Some(TransactionType::BuyCoin) => {
                        if let Ok(data) =
                            serde_json::from_value::<BuyCoinTxData>(transaction.data.clone())
                        {
                            touched.insert(data.coin_to_buy);
                            touched.insert(data.coin_to_sell);
                        }
                    }
                    Some(TransactionType::SellAllCoin) => {
                        if let Ok(data) =
                            serde_json::from_value::<SellAllCoinTxData>(transaction.data.clone())
                        {
                            touched.insert(data.coin_to_buy);
                            touched.insert(data.coin_to_sell);
                        }
                    }
                    _ => {}
                }
            }
            symbols
                .send(touched)
                .await
                .map_err(|_| IndexerError::QueueClosed("coin symbols"))?;
        }
        Ok(())
    }

    /// Refreshes each symbol of a set from the node, base coin excluded.
    pub async fn update_from_symbols_worker(
        self: Arc<Self>,
        mut jobs: mpsc::Receiver<BTreeSet<String>>,
    ) -> Result<(), IndexerError> {
        while let Some(mut symbols) = jobs.recv().await {
            symbols.remove(&self.base_coin);
            for symbol in &symbols {
                if let Err(err) = self.refresh_coin(symbol).await {
                    error!(%symbol, %err, "coin refresh failed");
                }
            }
        }
        Ok(())
    }

    /// Pulls one coin's state from the node and upserts it.
    pub async fn refresh_coin(&self, symbol: &str) -> Result<(), IndexerError> {
        let response = self.node.get_coin_info(symbol).await?;
        if let Some(err) = response.error {
            return Err(IndexerError::from_node(err.message, err.data));
        }
        let info = response
            .result
            .ok_or_else(|| IndexerError::UnknownCoin(symbol.to_string()))?;
        let update = coin_state_from_info(&info);
        self.store.upsert_coin_state(&update).await?;
        if info.symbol != self.base_coin {
            let payload = CoinPayload::now(
                &update.symbol,
                &update.price,
                &update.capitalization,
                &update.reserve_balance,
                &update.volume,
            );
            if let Err(err) = self
                .bus
                .publish(COIN_UPDATED_SUBJECT, payload.encode_payload())
                .await
            {
                warn!(%symbol, %err, "coin-updated publish failed");
            }
        }
        Ok(())
    }

    /// Backfills `creation_tx_id` and `owner_address_id` of coins persisted
    /// before their originating transaction was. Runs from the repair loop.
    pub async fn fix_broken_metadata(&self) -> Result<(), IndexerError> {
        let coins = self.store.coins_with_missing_creation_tx(&self.base_coin).await?;
        if coins.is_empty() {
            return Ok(());
        }
        let transactions = self.store.create_coin_transactions().await?;
        let mut by_symbol = HashMap::new();
        for transaction in &transactions {
            let Ok(data) = serde_json::from_str::<CreateCoinTxData>(&transaction.data) else {
                continue;
            };
            by_symbol
                .entry(data.symbol)
                .or_insert((transaction.id, transaction.from_address_id));
        }
        for coin in coins {
            let Some((tx_id, owner_address_id)) = by_symbol.get(&coin.symbol) else {
                continue;
            };
            self.store
                .set_coin_creation_meta(&coin.symbol, *tx_id, *owner_address_id)
                .await?;
            self.kv.remove(&coin.symbol)?;
        }
        Ok(())
    }
}

fn extract_one(transaction: &TransactionData) -> Result<ExtractedCoin, IndexerError> {
    let data: CreateCoinTxData = serde_json::from_value(transaction.data.clone())?;
    let crr = parse_number(&data.constant_reserve_ratio)?;
    let price = token_price(&data.initial_amount, &data.initial_reserve, crr).normalized();
    let cap = capitalization(&data.initial_amount, &price).normalized();
    let coin = NewCoin {
        symbol: data.symbol,
        name: data.name,
        crr: crr as i64,
        volume: data.initial_amount.clone(),
        reserve_balance: data.initial_reserve.clone(),
        price: price.to_string(),
        capitalization: cap.to_string(),
        start_volume: data.initial_amount,
        start_reserve_balance: data.initial_reserve,
        start_price: price.to_string(),
    };
    Ok(ExtractedCoin {
        coin,
        tx_hash: strip_hash_prefix(&transaction.hash).to_string(),
    })
}

fn coin_state_from_info(info: &CoinInfoResult) -> CoinStateUpdate {
    let price = token_price(&info.volume, &info.reserve_balance, info.crr).normalized();
    let cap = capitalization(&info.volume, &price).normalized();
    CoinStateUpdate {
        symbol: info.symbol.clone(),
        name: info.name.clone(),
        crr: info.crr as i64,
        volume: info.volume.clone(),
        reserve_balance: info.reserve_balance.clone(),
        price: price.to_string(),
        capitalization: cap.to_string(),
    }
}

/// Bonding-curve price: `reserve / (volume * crr / 100)`. A zero volume or
/// ratio prices the coin at zero.
pub fn token_price(volume: &str, reserve: &str, crr: u64) -> BigDecimal {
    let volume: BigDecimal = volume.parse().unwrap_or_else(|_| BigDecimal::zero());
    let reserve: BigDecimal = reserve.parse().unwrap_or_else(|_| BigDecimal::zero());
    if volume.is_zero() || crr == 0 {
        return BigDecimal::zero();
    }
    let ratio = BigDecimal::from(crr) / BigDecimal::from(100u32);
    reserve / (volume * ratio)
}

/// Capitalization: `volume * price`.
pub fn capitalization(volume: &str, price: &BigDecimal) -> BigDecimal {
    let volume: BigDecimal = volume.parse().unwrap_or_else(|_| BigDecimal::zero());
    volume * price
}
