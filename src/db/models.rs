// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Row types of the relational store.
//!
//! `New*` types are inputs to batched inserts; the plain types mirror
//! persisted rows. Identifiers are store-assigned and monotonic.

/// A persisted block header. `id` is the chain height.
#[derive(Debug, Clone)]
pub struct BlockRow {
    pub id: i64,
    pub created_at: String,
    pub tx_count: i64,
    pub proposer_validator_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewBlock {
    pub id: i64,
    pub created_at: String,
    pub tx_count: i64,
    pub proposer_validator_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BlockValidatorLink {
    pub block_id: i64,
    pub validator_id: i64,
    pub signed: bool,
}

#[derive(Debug, Clone)]
pub struct CoinRow {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub crr: i64,
    pub volume: String,
    pub reserve_balance: String,
    pub price: String,
    pub capitalization: String,
    pub delegation_percent: i64,
    pub creation_tx_id: Option<i64>,
    pub owner_address_id: Option<i64>,
}

/// A coin freshly extracted from a create-coin transaction.
#[derive(Debug, Clone)]
pub struct NewCoin {
    pub symbol: String,
    pub name: String,
    pub crr: i64,
    pub volume: String,
    pub reserve_balance: String,
    pub price: String,
    pub capitalization: String,
    pub start_volume: String,
    pub start_reserve_balance: String,
    pub start_price: String,
}

/// On-chain coin state refreshed from the node.
#[derive(Debug, Clone)]
pub struct CoinStateUpdate {
    pub symbol: String,
    pub name: String,
    pub crr: i64,
    pub volume: String,
    pub reserve_balance: String,
    pub price: String,
    pub capitalization: String,
}

#[derive(Debug, Clone)]
pub struct ValidatorRow {
    pub id: i64,
    pub public_key: String,
    pub status: Option<i64>,
    pub total_stake: Option<String>,
    pub commission: Option<i64>,
    pub reward_address_id: Option<i64>,
    pub owner_address_id: Option<i64>,
    pub created_at_block_id: Option<i64>,
    pub uptime: f64,
    pub count_delegators: i64,
}

#[derive(Debug, Clone)]
pub struct ValidatorUpdate {
    pub id: i64,
    pub status: i64,
    pub total_stake: String,
    pub commission: i64,
    pub reward_address_id: i64,
    pub owner_address_id: i64,
    pub created_at_block_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewStake {
    pub validator_id: i64,
    pub owner_address_id: i64,
    pub coin_id: i64,
    pub value: String,
    pub noah_value: String,
}

#[derive(Debug, Clone)]
pub struct StakeRow {
    pub id: i64,
    pub validator_id: i64,
    pub owner_address_id: i64,
    pub coin_id: i64,
    pub value: String,
    pub noah_value: String,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub hash: String,
    pub block_id: i64,
    pub tx_type: i64,
    pub nonce: i64,
    pub gas_coin_id: Option<i64>,
    pub from_address_id: i64,
    pub data: String,
    pub raw: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: i64,
    pub hash: String,
    pub block_id: i64,
    pub tx_type: i64,
    pub gas_coin_id: Option<i64>,
    pub from_address_id: i64,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct NewInvalidTransaction {
    pub hash: String,
    pub block_id: i64,
    pub tx_type: i64,
    pub from_address_id: i64,
    pub log: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewTransactionOutput {
    pub transaction_id: i64,
    pub to_address_id: i64,
    pub coin_id: i64,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct TransactionValidatorLink {
    pub transaction_id: i64,
    pub validator_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewReward {
    pub block_id: i64,
    pub role: String,
    pub amount: String,
    pub address_id: i64,
    pub validator_id: i64,
}

/// A reward joined with its block timestamp, as read by the aggregator.
#[derive(Debug, Clone)]
pub struct RewardWithTime {
    pub block_id: i64,
    pub block_created_at: String,
    pub role: String,
    pub amount: String,
    pub address_id: i64,
    pub validator_id: i64,
}

#[derive(Debug, Clone)]
pub struct AggregatedReward {
    pub time_id: String,
    pub to_block_id: i64,
    pub address_id: i64,
    pub validator_id: i64,
    pub role: String,
    pub amount: String,
}

#[derive(Debug, Clone)]
pub struct NewSlash {
    pub block_id: i64,
    pub coin_id: i64,
    pub amount: String,
    pub address_id: i64,
    pub validator_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewBalance {
    pub address_id: i64,
    pub coin_id: i64,
    pub value: String,
}
