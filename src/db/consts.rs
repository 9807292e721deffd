// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Schema of the relational store.
//!
//! Money amounts are arbitrary-precision decimal strings and therefore TEXT.
//! Natural keys (address, symbol, public key, hash) carry UNIQUE constraints
//! so that insert-if-absent is a plain `INSERT OR IGNORE`.

pub const CREATE_ADDRESSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE
);
"#;

pub const CREATE_COINS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS coins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    crr INTEGER NOT NULL DEFAULT 0,
    volume TEXT NOT NULL DEFAULT '0',
    reserve_balance TEXT NOT NULL DEFAULT '0',
    price TEXT NOT NULL DEFAULT '0',
    capitalization TEXT NOT NULL DEFAULT '0',
    start_volume TEXT NOT NULL DEFAULT '0',
    start_reserve_balance TEXT NOT NULL DEFAULT '0',
    start_price TEXT NOT NULL DEFAULT '0',
    delegation_percent INTEGER NOT NULL DEFAULT 0,
    creation_tx_id INTEGER REFERENCES transactions (id),
    owner_address_id INTEGER REFERENCES addresses (id),
    deleted_at TEXT,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

pub const CREATE_VALIDATORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS validators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_key TEXT NOT NULL UNIQUE,
    status INTEGER,
    total_stake TEXT,
    commission INTEGER,
    reward_address_id INTEGER REFERENCES addresses (id),
    owner_address_id INTEGER REFERENCES addresses (id),
    created_at_block_id INTEGER,
    uptime REAL NOT NULL DEFAULT 0,
    count_delegators INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT
);
"#;

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL,
    tx_count INTEGER NOT NULL DEFAULT 0,
    proposer_validator_id INTEGER REFERENCES validators (id)
);
"#;

pub const CREATE_BLOCK_VALIDATOR_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS block_validator (
    block_id INTEGER NOT NULL REFERENCES blocks (id),
    validator_id INTEGER NOT NULL REFERENCES validators (id),
    signed INTEGER NOT NULL,
    UNIQUE (block_id, validator_id)
);
"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    block_id INTEGER NOT NULL REFERENCES blocks (id),
    type INTEGER NOT NULL,
    nonce INTEGER NOT NULL DEFAULT 0,
    gas_coin_id INTEGER REFERENCES coins (id),
    from_address_id INTEGER NOT NULL REFERENCES addresses (id),
    data TEXT NOT NULL DEFAULT '{}',
    raw TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions (block_id);
CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions (from_address_id);
CREATE INDEX IF NOT EXISTS idx_transactions_type ON transactions (type);
"#;

pub const CREATE_INVALID_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS invalid_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT NOT NULL UNIQUE,
    block_id INTEGER NOT NULL REFERENCES blocks (id),
    type INTEGER NOT NULL,
    from_address_id INTEGER NOT NULL REFERENCES addresses (id),
    log TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
"#;

pub const CREATE_TRANSACTION_OUTPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_outputs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id INTEGER NOT NULL REFERENCES transactions (id),
    to_address_id INTEGER NOT NULL REFERENCES addresses (id),
    coin_id INTEGER NOT NULL REFERENCES coins (id),
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transaction_outputs_to ON transaction_outputs (to_address_id);
"#;

pub const CREATE_TRANSACTION_VALIDATOR_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_validator (
    transaction_id INTEGER NOT NULL REFERENCES transactions (id),
    validator_id INTEGER NOT NULL REFERENCES validators (id),
    UNIQUE (transaction_id, validator_id)
);
"#;

pub const CREATE_STAKES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stakes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    validator_id INTEGER NOT NULL REFERENCES validators (id),
    owner_address_id INTEGER NOT NULL REFERENCES addresses (id),
    coin_id INTEGER NOT NULL REFERENCES coins (id),
    value TEXT NOT NULL,
    noah_value TEXT NOT NULL,
    UNIQUE (validator_id, owner_address_id, coin_id)
);
"#;

pub const CREATE_REWARDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rewards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id INTEGER NOT NULL REFERENCES blocks (id),
    role TEXT NOT NULL,
    amount TEXT NOT NULL,
    address_id INTEGER NOT NULL REFERENCES addresses (id),
    validator_id INTEGER NOT NULL REFERENCES validators (id)
);

CREATE INDEX IF NOT EXISTS idx_rewards_block ON rewards (block_id);
"#;

pub const CREATE_AGGREGATED_REWARDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS aggregated_rewards (
    time_id TEXT NOT NULL,
    to_block_id INTEGER NOT NULL,
    address_id INTEGER NOT NULL REFERENCES addresses (id),
    validator_id INTEGER NOT NULL REFERENCES validators (id),
    role TEXT NOT NULL,
    amount TEXT NOT NULL,
    UNIQUE (time_id, address_id, validator_id, role)
);
"#;

pub const CREATE_SLASHES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS slashes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id INTEGER NOT NULL REFERENCES blocks (id),
    coin_id INTEGER NOT NULL REFERENCES coins (id),
    amount TEXT NOT NULL,
    address_id INTEGER NOT NULL REFERENCES addresses (id),
    validator_id INTEGER NOT NULL REFERENCES validators (id)
);

CREATE INDEX IF NOT EXISTS idx_slashes_block ON slashes (block_id);
"#;

pub const CREATE_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address_id INTEGER NOT NULL REFERENCES addresses (id),
    coin_id INTEGER NOT NULL REFERENCES coins (id),
    value TEXT NOT NULL,
    UNIQUE (address_id, coin_id)
);
"#;

pub const ALL_TABLES: &[&str] = &[
    CREATE_ADDRESSES_TABLE,
    CREATE_COINS_TABLE,
    CREATE_VALIDATORS_TABLE,
    CREATE_BLOCKS_TABLE,
    CREATE_BLOCK_VALIDATOR_TABLE,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_INVALID_TRANSACTIONS_TABLE,
    CREATE_TRANSACTION_OUTPUTS_TABLE,
    CREATE_TRANSACTION_VALIDATOR_TABLE,
    CREATE_STAKES_TABLE,
    CREATE_REWARDS_TABLE,
    CREATE_AGGREGATED_REWARDS_TABLE,
    CREATE_SLASHES_TABLE,
    CREATE_BALANCES_TABLE,
];
