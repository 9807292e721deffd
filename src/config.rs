// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration of the indexer, overridable from the environment.

use clap::Parser;

/// Number of blocks the indexer may lag behind the node tip before switching
/// into chasing mode.
pub const CHASING_MODE_DIFF: u64 = 2;

/// Every this many blocks a full stake refresh replaces the candidate
/// refresh.
pub const STAKE_REFRESH_BLOCKS: u64 = 12;

/// Every this many blocks the stake refresh also recounts delegators per
/// validator.
pub const DELEGATOR_RECOUNT_BLOCKS: u64 = 192;

#[derive(Debug, Clone, Parser)]
#[command(name = "noah-indexer", about = "Indexer service for the Noah blockchain")]
pub struct IndexerConfig {
    /// Base URL of the full node's HTTP API.
    #[arg(long, env = "NOAH_NODE_URL", default_value = "http://127.0.0.1:8841")]
    pub node_url: String,

    /// SQLite database URL of the relational store.
    #[arg(long, env = "NOAH_DATABASE_URL", default_value = "sqlite://noah-indexer.db")]
    pub database_url: String,

    /// Directory of the symbol side table.
    #[arg(long, env = "NOAH_KV_PATH", default_value = "noah-indexer-kv")]
    pub kv_path: String,

    /// Symbol of the chain's native coin. Never created from transactions and
    /// never refreshed from the node.
    #[arg(long, env = "NOAH_BASE_COIN", default_value = "NOAH")]
    pub base_coin: String,

    /// Workers saving address batches.
    #[arg(long, env = "NOAH_WRK_SAVE_ADDRESSES", default_value = "3")]
    pub wrk_save_addresses: usize,

    /// Workers saving transaction chunks.
    #[arg(long, env = "NOAH_WRK_SAVE_TXS", default_value = "3")]
    pub wrk_save_txs: usize,

    /// Workers saving transaction outputs.
    #[arg(long, env = "NOAH_WRK_SAVE_TXS_OUTPUT", default_value = "3")]
    pub wrk_save_txs_output: usize,

    /// Workers saving invalid transactions.
    #[arg(long, env = "NOAH_WRK_SAVE_INVALID_TXS", default_value = "1")]
    pub wrk_save_invalid_txs: usize,

    /// Workers saving transaction-validator links.
    #[arg(long, env = "NOAH_WRK_SAVE_VALIDATOR_TXS", default_value = "1")]
    pub wrk_save_validator_txs: usize,

    /// Workers saving reward events.
    #[arg(long, env = "NOAH_WRK_SAVE_REWARDS", default_value = "2")]
    pub wrk_save_rewards: usize,

    /// Workers saving slash events.
    #[arg(long, env = "NOAH_WRK_SAVE_SLASHES", default_value = "2")]
    pub wrk_save_slashes: usize,

    /// Workers fetching balances from the node.
    #[arg(long, env = "NOAH_WRK_BALANCES_FROM_NODE", default_value = "2")]
    pub wrk_balances_from_node: usize,

    /// Workers writing balances to the store.
    #[arg(long, env = "NOAH_WRK_UPDATE_BALANCE", default_value = "2")]
    pub wrk_update_balance: usize,

    /// Transactions per chunked insert.
    #[arg(long, env = "NOAH_TX_CHUNK_SIZE", default_value = "100")]
    pub tx_chunk_size: usize,

    /// Stakes per chunked insert.
    #[arg(long, env = "NOAH_STAKE_CHUNK_SIZE", default_value = "200")]
    pub stake_chunk_size: usize,

    /// A reward aggregation is scheduled every this many blocks.
    #[arg(long, env = "NOAH_REWARD_AGGREGATE_EVERY_BLOCKS", default_value = "60")]
    pub reward_aggregate_every_blocks: u64,

    /// Time bucket of the reward rollup: `hour` or `day`.
    #[arg(long, env = "NOAH_REWARD_AGGREGATE_TIME_INTERVAL", default_value = "hour")]
    pub reward_aggregate_time_interval: String,

    /// Host of the WebSocket broadcaster.
    #[arg(long, env = "NOAH_WS_HOST", default_value = "127.0.0.1")]
    pub ws_host: String,

    /// Port of the WebSocket broadcaster.
    #[arg(long, env = "NOAH_WS_PORT", default_value = "8000")]
    pub ws_port: u16,

    /// API key of the WebSocket broadcaster.
    #[arg(long, env = "NOAH_WS_KEY", default_value = "")]
    pub ws_key: String,

    /// Log verbosity switch: human-readable debug output instead of JSON.
    #[arg(long, env = "NOAH_DEBUG")]
    pub debug: bool,
}

impl IndexerConfig {
    /// A configuration suitable for tests: single workers, small chunks.
    #[cfg(test)]
    pub(crate) fn for_testing() -> Self {
        Self {
            node_url: "http://localhost:0".to_string(),
            database_url: "sqlite::memory:".to_string(),
            kv_path: String::new(),
            base_coin: "NOAH".to_string(),
            wrk_save_addresses: 1,
            wrk_save_txs: 1,
            wrk_save_txs_output: 1,
            wrk_save_invalid_txs: 1,
            wrk_save_validator_txs: 1,
            wrk_save_rewards: 1,
            wrk_save_slashes: 1,
            wrk_balances_from_node: 1,
            wrk_update_balance: 1,
            tx_chunk_size: 10,
            stake_chunk_size: 10,
            reward_aggregate_every_blocks: 60,
            reward_aggregate_time_interval: "hour".to_string(),
            ws_host: "127.0.0.1".to_string(),
            ws_port: 0,
            ws_key: String::new(),
            debug: true,
        }
    }
}
