// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The relational store of the indexer.
//!
//! All writes are idempotent: natural keys are guarded by UNIQUE constraints
//! and inserts use `OR IGNORE` or upsert clauses, so replaying a block range
//! leaves the persisted state unchanged.

mod consts;
mod models;
#[cfg(test)]
mod tests;

use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use thiserror::Error;
use tracing::warn;

pub use self::models::*;
use self::consts::ALL_TABLES;

/// Candidate status code the node assigns to validators of the active set.
pub const VALIDATOR_STATUS_ACTIVE: i64 = 2;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens the store, creating the database and schema if missing.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// An in-memory store for tests. A single connection, so every query
    /// sees the same database.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database");
        let store = Self { pool };
        store.initialize_schema().await.expect("schema");
        store
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        for statement in ALL_TABLES {
            sqlx::raw_sql(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- addresses ----

    /// Inserts every address that is not yet present. A single failing row is
    /// logged and skipped; it does not fail the batch.
    pub async fn insert_addresses_if_absent(&self, addresses: &[String]) -> Result<(), StoreError> {
        for address in addresses {
            let result = sqlx::query("INSERT OR IGNORE INTO addresses (address) VALUES (?1)")
                .bind(address)
                .execute(&self.pool)
                .await;
            if let Err(error) = result {
                warn!(%address, %error, "skipping address insert");
            }
        }
        Ok(())
    }

    pub async fn find_address_id(&self, address: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT id FROM addresses WHERE address = ?1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    pub async fn find_or_insert_address(&self, address: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO addresses (address) VALUES (?1)")
            .bind(address)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id FROM addresses WHERE address = ?1")
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    pub async fn find_address_by_id(&self, id: i64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT address FROM addresses WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    // ---- coins ----

    /// Seeds the distinguished base-coin row.
    pub async fn ensure_base_coin(&self, symbol: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO coins (symbol, name) VALUES (?1, ?1)")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts freshly created coins. An existing symbol is a no-op.
    pub async fn insert_coins_if_absent(&self, coins: &[NewCoin]) -> Result<(), StoreError> {
        for coin in coins {
            sqlx::query(
                "INSERT OR IGNORE INTO coins (symbol, name, crr, volume, reserve_balance, \
                 price, capitalization, start_volume, start_reserve_balance, start_price) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(&coin.symbol)
            .bind(&coin.name)
            .bind(coin.crr)
            .bind(&coin.volume)
            .bind(&coin.reserve_balance)
            .bind(&coin.price)
            .bind(&coin.capitalization)
            .bind(&coin.start_volume)
            .bind(&coin.start_reserve_balance)
            .bind(&coin.start_price)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Writes the on-chain state refreshed from the node, creating the row if
    /// the coin was never seen. Start fields and creation metadata are left
    /// alone.
    pub async fn upsert_coin_state(&self, update: &CoinStateUpdate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO coins (symbol, name, crr, volume, reserve_balance, price, capitalization) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (symbol) DO UPDATE SET name = excluded.name, crr = excluded.crr, \
             volume = excluded.volume, reserve_balance = excluded.reserve_balance, \
             price = excluded.price, capitalization = excluded.capitalization, \
             deleted_at = NULL, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&update.symbol)
        .bind(&update.name)
        .bind(update.crr)
        .bind(&update.volume)
        .bind(&update.reserve_balance)
        .bind(&update.price)
        .bind(&update.capitalization)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_coin_id(&self, symbol: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT id FROM coins WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    /// Resolves a coin id, creating a bare row when the symbol was never
    /// seen. The refresh workers fill such rows in later.
    pub async fn find_or_insert_coin(&self, symbol: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO coins (symbol) VALUES (?1)")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id FROM coins WHERE symbol = ?1")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    pub async fn find_coin_symbol(&self, id: i64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT symbol FROM coins WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    pub async fn coin_by_id(&self, id: i64) -> Result<Option<CoinRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, symbol, name, crr, volume, reserve_balance, price, capitalization, \
             delegation_percent, creation_tx_id, owner_address_id FROM coins WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(coin_from_row))
    }

    pub async fn coin_by_symbol(&self, symbol: &str) -> Result<Option<CoinRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, symbol, name, crr, volume, reserve_balance, price, capitalization, \
             delegation_percent, creation_tx_id, owner_address_id FROM coins WHERE symbol = ?1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(coin_from_row))
    }

    pub async fn update_coin_delegation_percent(
        &self,
        id: i64,
        percent: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE coins SET delegation_percent = ?2 WHERE id = ?1")
            .bind(id)
            .bind(percent)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resets `delegation_percent` of every coin not visited by the latest
    /// stake refresh. The base coin is exempt.
    pub async fn reset_delegation_percent_except(
        &self,
        ids: &[i64],
        base_coin: &str,
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            sqlx::query("UPDATE coins SET delegation_percent = 0 WHERE symbol <> ?1")
                .bind(base_coin)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }
        let placeholders = (2..ids.len() + 2)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE coins SET delegation_percent = 0 \
             WHERE symbol <> ?1 AND id NOT IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(base_coin);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Coins still missing their creation transaction, base coin excluded.
    pub async fn coins_with_missing_creation_tx(
        &self,
        base_coin: &str,
    ) -> Result<Vec<CoinRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, symbol, name, crr, volume, reserve_balance, price, capitalization, \
             delegation_percent, creation_tx_id, owner_address_id FROM coins \
             WHERE creation_tx_id IS NULL AND symbol <> ?1",
        )
        .bind(base_coin)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(coin_from_row).collect())
    }

    /// Backfills creation metadata. Only touches rows still missing it.
    pub async fn set_coin_creation_meta(
        &self,
        symbol: &str,
        creation_tx_id: i64,
        owner_address_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE coins SET creation_tx_id = ?2, owner_address_id = ?3 \
             WHERE symbol = ?1 AND creation_tx_id IS NULL",
        )
        .bind(symbol)
        .bind(creation_tx_id)
        .bind(owner_address_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- validators ----

    pub async fn insert_validators_if_absent(
        &self,
        public_keys: &[String],
    ) -> Result<(), StoreError> {
        for public_key in public_keys {
            sqlx::query("INSERT OR IGNORE INTO validators (public_key) VALUES (?1)")
                .bind(public_key)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn find_validator_id(&self, public_key: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT id FROM validators WHERE public_key = ?1")
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    pub async fn find_or_insert_validator(&self, public_key: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO validators (public_key) VALUES (?1)")
            .bind(public_key)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id FROM validators WHERE public_key = ?1")
            .bind(public_key)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    /// Clears every status before a refresh, so validators absent from the
    /// candidate response end up inactive.
    pub async fn reset_validator_statuses(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE validators SET status = NULL")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_validator(&self, update: &ValidatorUpdate) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE validators SET status = ?2, total_stake = ?3, commission = ?4, \
             reward_address_id = ?5, owner_address_id = ?6, \
             created_at_block_id = COALESCE(?7, created_at_block_id), \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(update.id)
        .bind(update.status)
        .bind(&update.total_stake)
        .bind(update.commission)
        .bind(update.reward_address_id)
        .bind(update.owner_address_id)
        .bind(update.created_at_block_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn active_validators(&self) -> Result<Vec<ValidatorRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, public_key, status, total_stake, commission, reward_address_id, \
             owner_address_id, created_at_block_id, uptime, count_delegators \
             FROM validators WHERE status = ?1",
        )
        .bind(VALIDATOR_STATUS_ACTIVE)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(validator_from_row).collect())
    }

    pub async fn validator_by_id(&self, id: i64) -> Result<Option<ValidatorRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, public_key, status, total_stake, commission, reward_address_id, \
             owner_address_id, created_at_block_id, uptime, count_delegators \
             FROM validators WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(validator_from_row))
    }

    /// The block a validator's uptime window starts at: its recorded creation
    /// block, or the first block it was ever linked to.
    pub async fn validator_first_block(&self, id: i64) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(v.created_at_block_id, \
             (SELECT MIN(block_id) FROM block_validator WHERE validator_id = v.id)) \
             FROM validators v WHERE v.id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|row| row.get(0)))
    }

    pub async fn signed_block_count(&self, id: i64, since_block: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM block_validator \
             WHERE validator_id = ?1 AND signed = 1 AND block_id >= ?2",
        )
        .bind(id)
        .bind(since_block)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    pub async fn block_count_since(&self, since_block: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM blocks WHERE id >= ?1")
            .bind(since_block)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    pub async fn reset_uptimes(&self) -> Result<(), StoreError> {
        sqlx::query("UPDATE validators SET uptime = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_validator_uptime(&self, id: i64, uptime: f64) -> Result<(), StoreError> {
        sqlx::query("UPDATE validators SET uptime = ?2 WHERE id = ?1")
            .bind(id)
            .bind(uptime)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_delegators(&self, validator_id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT owner_address_id) FROM stakes WHERE validator_id = ?1",
        )
        .bind(validator_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    pub async fn update_count_delegators(
        &self,
        validator_id: i64,
        count: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE validators SET count_delegators = ?2 WHERE id = ?1")
            .bind(validator_id)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- stakes ----

    /// Upserts a chunk of stakes and returns their row ids. Runs in one
    /// transaction; any failure is surfaced to the caller, which treats it
    /// as fatal, because a partial stake set silently corrupts delegation
    /// totals.
    pub async fn replace_stakes(&self, stakes: &[NewStake]) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(stakes.len());
        for stake in stakes {
            let row = sqlx::query(
                "INSERT INTO stakes (validator_id, owner_address_id, coin_id, value, noah_value) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (validator_id, owner_address_id, coin_id) \
                 DO UPDATE SET value = excluded.value, noah_value = excluded.noah_value \
                 RETURNING id",
            )
            .bind(stake.validator_id)
            .bind(stake.owner_address_id)
            .bind(stake.coin_id)
            .bind(&stake.value)
            .bind(&stake.noah_value)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(row.get(0));
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Deletes every stake not inserted by the latest refresh.
    pub async fn delete_stakes_not_in(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            sqlx::query("DELETE FROM stakes").execute(&self.pool).await?;
            return Ok(());
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("DELETE FROM stakes WHERE id NOT IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    pub async fn stakes(&self) -> Result<Vec<StakeRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, validator_id, owner_address_id, coin_id, value, noah_value FROM stakes",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| StakeRow {
                id: row.get(0),
                validator_id: row.get(1),
                owner_address_id: row.get(2),
                coin_id: row.get(3),
                value: row.get(4),
                noah_value: row.get(5),
            })
            .collect())
    }

    // ---- blocks ----

    pub async fn insert_block(&self, block: &NewBlock) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO blocks (id, created_at, tx_count, proposer_validator_id) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(block.id)
        .bind(&block.created_at)
        .bind(block.tx_count)
        .bind(block.proposer_validator_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn last_block(&self) -> Result<Option<BlockRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, created_at, tx_count, proposer_validator_id FROM blocks \
             ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| BlockRow {
            id: row.get(0),
            created_at: row.get(1),
            tx_count: row.get(2),
            proposer_validator_id: row.get(3),
        }))
    }

    /// Deletes the last persisted block and every row derived from it. The
    /// tip may be partial after a crash; it is re-indexed on resume.
    pub async fn delete_last_block_data(&self) -> Result<(), StoreError> {
        let Some(last) = self.last_block().await? else {
            return Ok(());
        };
        let mut tx = self.pool.begin().await?;
        for sql in [
            "UPDATE coins SET creation_tx_id = NULL \
             WHERE creation_tx_id IN (SELECT id FROM transactions WHERE block_id = ?1)",
            "DELETE FROM transaction_outputs \
             WHERE transaction_id IN (SELECT id FROM transactions WHERE block_id = ?1)",
            "DELETE FROM transaction_validator \
             WHERE transaction_id IN (SELECT id FROM transactions WHERE block_id = ?1)",
            "DELETE FROM transactions WHERE block_id = ?1",
            "DELETE FROM invalid_transactions WHERE block_id = ?1",
            "DELETE FROM rewards WHERE block_id = ?1",
            "DELETE FROM slashes WHERE block_id = ?1",
            "DELETE FROM block_validator WHERE block_id = ?1",
            "DELETE FROM blocks WHERE id = ?1",
        ] {
            sqlx::query(sql).bind(last.id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn link_block_validators(
        &self,
        links: &[BlockValidatorLink],
    ) -> Result<(), StoreError> {
        for link in links {
            sqlx::query(
                "INSERT OR IGNORE INTO block_validator (block_id, validator_id, signed) \
                 VALUES (?1, ?2, ?3)",
            )
            .bind(link.block_id)
            .bind(link.validator_id)
            .bind(link.signed)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // ---- transactions ----

    /// Inserts a chunk of transactions and returns `(hash, id)` pairs for the
    /// rows this call created. A replayed hash is a no-op and is not
    /// reported, so derived rows are not produced twice. A failing row is
    /// logged and skipped.
    pub async fn insert_transactions(
        &self,
        transactions: &[NewTransaction],
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let mut inserted = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO transactions \
                 (hash, block_id, type, nonce, gas_coin_id, from_address_id, data, raw, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&transaction.hash)
            .bind(transaction.block_id)
            .bind(transaction.tx_type)
            .bind(transaction.nonce)
            .bind(transaction.gas_coin_id)
            .bind(transaction.from_address_id)
            .bind(&transaction.data)
            .bind(&transaction.raw)
            .bind(&transaction.created_at)
            .execute(&self.pool)
            .await;
            match result {
                Err(error) => {
                    warn!(hash = %transaction.hash, %error, "skipping transaction insert");
                    continue;
                }
                Ok(outcome) if outcome.rows_affected() == 0 => continue,
                Ok(_) => {}
            }
            let row = sqlx::query("SELECT id FROM transactions WHERE hash = ?1")
                .bind(&transaction.hash)
                .fetch_one(&self.pool)
                .await?;
            inserted.push((transaction.hash.clone(), row.get(0)));
        }
        Ok(inserted)
    }

    pub async fn insert_invalid_transactions(
        &self,
        transactions: &[NewInvalidTransaction],
    ) -> Result<(), StoreError> {
        for transaction in transactions {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO invalid_transactions \
                 (hash, block_id, type, from_address_id, log, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&transaction.hash)
            .bind(transaction.block_id)
            .bind(transaction.tx_type)
            .bind(transaction.from_address_id)
            .bind(&transaction.log)
            .bind(&transaction.created_at)
            .execute(&self.pool)
            .await;
            if let Err(error) = result {
                warn!(hash = %transaction.hash, %error, "skipping invalid transaction insert");
            }
        }
        Ok(())
    }

    pub async fn insert_transaction_outputs(
        &self,
        outputs: &[NewTransactionOutput],
    ) -> Result<(), StoreError> {
        for output in outputs {
            sqlx::query(
                "INSERT INTO transaction_outputs (transaction_id, to_address_id, coin_id, value) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(output.transaction_id)
            .bind(output.to_address_id)
            .bind(output.coin_id)
            .bind(&output.value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn insert_transaction_validator_links(
        &self,
        links: &[TransactionValidatorLink],
    ) -> Result<(), StoreError> {
        for link in links {
            sqlx::query(
                "INSERT OR IGNORE INTO transaction_validator (transaction_id, validator_id) \
                 VALUES (?1, ?2)",
            )
            .bind(link.transaction_id)
            .bind(link.validator_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, hash, block_id, type, gas_coin_id, from_address_id, data \
             FROM transactions WHERE hash = ?1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(transaction_from_row))
    }

    /// All persisted create-coin transactions, for metadata repair.
    pub async fn create_coin_transactions(&self) -> Result<Vec<TransactionRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, hash, block_id, type, gas_coin_id, from_address_id, data \
             FROM transactions WHERE type = ?1",
        )
        .bind(crate::node::TransactionType::CreateCoin as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(transaction_from_row).collect())
    }

    /// Recomputes the derived transaction indices used by queries.
    pub async fn rebuild_transaction_indices(&self) -> Result<(), StoreError> {
        sqlx::raw_sql("REINDEX transactions; ANALYZE;")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- events ----

    pub async fn insert_rewards(&self, rewards: &[NewReward]) -> Result<(), StoreError> {
        for reward in rewards {
            sqlx::query(
                "INSERT INTO rewards (block_id, role, amount, address_id, validator_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(reward.block_id)
            .bind(&reward.role)
            .bind(&reward.amount)
            .bind(reward.address_id)
            .bind(reward.validator_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn insert_slashes(&self, slashes: &[NewSlash]) -> Result<(), StoreError> {
        for slash in slashes {
            sqlx::query(
                "INSERT INTO slashes (block_id, coin_id, amount, address_id, validator_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(slash.block_id)
            .bind(slash.coin_id)
            .bind(&slash.amount)
            .bind(slash.address_id)
            .bind(slash.validator_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Rewards at or below the cutoff height, joined with their block time.
    pub async fn rewards_up_to(&self, to_block: i64) -> Result<Vec<RewardWithTime>, StoreError> {
        let rows = sqlx::query(
            "SELECT r.block_id, b.created_at, r.role, r.amount, r.address_id, r.validator_id \
             FROM rewards r JOIN blocks b ON b.id = r.block_id WHERE r.block_id <= ?1",
        )
        .bind(to_block)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| RewardWithTime {
                block_id: row.get(0),
                block_created_at: row.get(1),
                role: row.get(2),
                amount: row.get(3),
                address_id: row.get(4),
                validator_id: row.get(5),
            })
            .collect())
    }

    pub async fn aggregated_reward_amount(
        &self,
        time_id: &str,
        address_id: i64,
        validator_id: i64,
        role: &str,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT amount FROM aggregated_rewards \
             WHERE time_id = ?1 AND address_id = ?2 AND validator_id = ?3 AND role = ?4",
        )
        .bind(time_id)
        .bind(address_id)
        .bind(validator_id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.get(0)))
    }

    pub async fn upsert_aggregated_reward(
        &self,
        reward: &AggregatedReward,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO aggregated_rewards \
             (time_id, to_block_id, address_id, validator_id, role, amount) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (time_id, address_id, validator_id, role) \
             DO UPDATE SET amount = excluded.amount, to_block_id = excluded.to_block_id",
        )
        .bind(&reward.time_id)
        .bind(reward.to_block_id)
        .bind(reward.address_id)
        .bind(reward.validator_id)
        .bind(&reward.role)
        .bind(&reward.amount)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_rewards_up_to(&self, to_block: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM rewards WHERE block_id <= ?1")
            .bind(to_block)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- balances ----

    /// Upserts balance rows. A single failing row is logged and skipped.
    pub async fn upsert_balances(&self, balances: &[NewBalance]) -> Result<(), StoreError> {
        for balance in balances {
            let result = sqlx::query(
                "INSERT INTO balances (address_id, coin_id, value) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (address_id, coin_id) DO UPDATE SET value = excluded.value",
            )
            .bind(balance.address_id)
            .bind(balance.coin_id)
            .bind(&balance.value)
            .execute(&self.pool)
            .await;
            if let Err(error) = result {
                warn!(
                    address_id = balance.address_id,
                    coin_id = balance.coin_id,
                    %error,
                    "skipping balance upsert"
                );
            }
        }
        Ok(())
    }

    pub async fn balance(
        &self,
        address_id: i64,
        coin_id: i64,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM balances WHERE address_id = ?1 AND coin_id = ?2")
            .bind(address_id)
            .bind(coin_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get(0)))
    }
}

fn coin_from_row(row: &SqliteRow) -> CoinRow {
    CoinRow {
        id: row.get(0),
        symbol: row.get(1),
        name: row.get(2),
        crr: row.get(3),
        volume: row.get(4),
        reserve_balance: row.get(5),
        price: row.get(6),
        capitalization: row.get(7),
        delegation_percent: row.get(8),
        creation_tx_id: row.get(9),
        owner_address_id: row.get(10),
    }
}

fn validator_from_row(row: &SqliteRow) -> ValidatorRow {
    ValidatorRow {
        id: row.get(0),
        public_key: row.get(1),
        status: row.get(2),
        total_stake: row.get(3),
        commission: row.get(4),
        reward_address_id: row.get(5),
        owner_address_id: row.get(6),
        created_at_block_id: row.get(7),
        uptime: row.get(8),
        count_delegators: row.get(9),
    }
}

fn transaction_from_row(row: &SqliteRow) -> TransactionRow {
    TransactionRow {
        id: row.get(0),
        hash: row.get(1),
        block_id: row.get(2),
        tx_type: row.get(3),
        gas_coin_id: row.get(4),
        from_address_id: row.get(5),
        data: row.get(6),
    }
}
