// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

use sqlx::Row;

use super::*;

async fn seed_block(store: &Store, id: i64) {
    store
        .insert_block(&NewBlock {
            id,
            created_at: format!("2024-05-01T00:{:02}:00Z", id % 60),
            tx_count: 0,
            proposer_validator_id: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn address_inserts_are_idempotent() {
    let store = Store::in_memory().await;
    let batch = vec!["aa01".to_string(), "bb02".to_string(), "aa01".to_string()];
    store.insert_addresses_if_absent(&batch).await.unwrap();
    store.insert_addresses_if_absent(&batch).await.unwrap();

    let first = store.find_address_id("aa01").await.unwrap().unwrap();
    let again = store.find_or_insert_address("aa01").await.unwrap();
    assert_eq!(first, again);

    let row = sqlx::query("SELECT COUNT(*) FROM addresses")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>(0), 2);
}

#[tokio::test]
async fn coin_creation_is_noop_for_existing_symbol() {
    let store = Store::in_memory().await;
    let coin = NewCoin {
        symbol: "ACME".to_string(),
        name: "Acme".to_string(),
        crr: 50,
        volume: "1000".to_string(),
        reserve_balance: "500".to_string(),
        price: "1".to_string(),
        capitalization: "1000".to_string(),
        start_volume: "1000".to_string(),
        start_reserve_balance: "500".to_string(),
        start_price: "1".to_string(),
    };
    store.insert_coins_if_absent(&[coin.clone()]).await.unwrap();

    let mut altered = coin.clone();
    altered.volume = "9999".to_string();
    store.insert_coins_if_absent(&[altered]).await.unwrap();

    let row = store.coin_by_symbol("ACME").await.unwrap().unwrap();
    assert_eq!(row.volume, "1000");
}

#[tokio::test]
async fn coin_state_refresh_keeps_creation_meta() {
    let store = Store::in_memory().await;
    let owner = store.find_or_insert_address("aa01").await.unwrap();
    store
        .insert_coins_if_absent(&[NewCoin {
            symbol: "ACME".to_string(),
            name: "Acme".to_string(),
            crr: 50,
            volume: "1000".to_string(),
            reserve_balance: "500".to_string(),
            price: "1".to_string(),
            capitalization: "1000".to_string(),
            start_volume: "1000".to_string(),
            start_reserve_balance: "500".to_string(),
            start_price: "1".to_string(),
        }])
        .await
        .unwrap();
    store.set_coin_creation_meta("ACME", 7, owner).await.unwrap();

    store
        .upsert_coin_state(&CoinStateUpdate {
            symbol: "ACME".to_string(),
            name: "Acme".to_string(),
            crr: 60,
            volume: "2000".to_string(),
            reserve_balance: "1200".to_string(),
            price: "1".to_string(),
            capitalization: "2000".to_string(),
        })
        .await
        .unwrap();

    let row = store.coin_by_symbol("ACME").await.unwrap().unwrap();
    assert_eq!(row.crr, 60);
    assert_eq!(row.volume, "2000");
    assert_eq!(row.creation_tx_id, Some(7));
    assert_eq!(row.owner_address_id, Some(owner));

    let start: String = sqlx::query("SELECT start_volume FROM coins WHERE symbol = 'ACME'")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get(0);
    assert_eq!(start, "1000");
}

#[tokio::test]
async fn creation_meta_is_written_once() {
    let store = Store::in_memory().await;
    store.ensure_base_coin("NOAH").await.unwrap();
    store
        .insert_coins_if_absent(&[bare_coin("ACME")])
        .await
        .unwrap();
    store.set_coin_creation_meta("ACME", 1, 1).await.unwrap();
    store.set_coin_creation_meta("ACME", 2, 2).await.unwrap();

    let row = store.coin_by_symbol("ACME").await.unwrap().unwrap();
    assert_eq!(row.creation_tx_id, Some(1));
}

fn bare_coin(symbol: &str) -> NewCoin {
    NewCoin {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        crr: 10,
        volume: "1000".to_string(),
        reserve_balance: "100".to_string(),
        price: "1".to_string(),
        capitalization: "1000".to_string(),
        start_volume: "1000".to_string(),
        start_reserve_balance: "100".to_string(),
        start_price: "1".to_string(),
    }
}

#[tokio::test]
async fn stake_refresh_replaces_the_full_set() {
    let store = Store::in_memory().await;
    let validator = store.find_or_insert_validator("pk01").await.unwrap();
    let owner_a = store.find_or_insert_address("aa01").await.unwrap();
    let owner_b = store.find_or_insert_address("bb02").await.unwrap();
    let coin = store.find_or_insert_coin("ACME").await.unwrap();

    let first = store
        .replace_stakes(&[
            NewStake {
                validator_id: validator,
                owner_address_id: owner_a,
                coin_id: coin,
                value: "100".to_string(),
                noah_value: "100".to_string(),
            },
            NewStake {
                validator_id: validator,
                owner_address_id: owner_b,
                coin_id: coin,
                value: "200".to_string(),
                noah_value: "200".to_string(),
            },
        ])
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    // The next refresh no longer sees owner B; its row must go away and
    // owner A's value must be replaced in place.
    let second = store
        .replace_stakes(&[NewStake {
            validator_id: validator,
            owner_address_id: owner_a,
            coin_id: coin,
            value: "150".to_string(),
            noah_value: "150".to_string(),
        }])
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0], first[0]);
    store.delete_stakes_not_in(&second).await.unwrap();

    let stakes = store.stakes().await.unwrap();
    assert_eq!(stakes.len(), 1);
    assert_eq!(stakes[0].owner_address_id, owner_a);
    assert_eq!(stakes[0].value, "150");
}

#[tokio::test]
async fn delegation_reset_spares_base_coin_and_visited_coins() {
    let store = Store::in_memory().await;
    store.ensure_base_coin("NOAH").await.unwrap();
    let base = store.find_coin_id("NOAH").await.unwrap().unwrap();
    let acme = store.find_or_insert_coin("ACME").await.unwrap();
    let other = store.find_or_insert_coin("OTHR").await.unwrap();
    for id in [base, acme, other] {
        store.update_coin_delegation_percent(id, 40).await.unwrap();
    }

    store
        .reset_delegation_percent_except(&[acme], "NOAH")
        .await
        .unwrap();

    assert_eq!(store.coin_by_id(base).await.unwrap().unwrap().delegation_percent, 40);
    assert_eq!(store.coin_by_id(acme).await.unwrap().unwrap().delegation_percent, 40);
    assert_eq!(store.coin_by_id(other).await.unwrap().unwrap().delegation_percent, 0);
}

#[tokio::test]
async fn deleting_the_last_block_cascades() {
    let store = Store::in_memory().await;
    let from = store.find_or_insert_address("aa01").await.unwrap();
    let validator = store.find_or_insert_validator("pk01").await.unwrap();
    seed_block(&store, 1).await;
    seed_block(&store, 2).await;
    store
        .link_block_validators(&[BlockValidatorLink {
            block_id: 2,
            validator_id: validator,
            signed: true,
        }])
        .await
        .unwrap();
    let inserted = store
        .insert_transactions(&[NewTransaction {
            hash: "feed01".to_string(),
            block_id: 2,
            tx_type: 1,
            nonce: 1,
            gas_coin_id: None,
            from_address_id: from,
            data: "{}".to_string(),
            raw: String::new(),
            created_at: "2024-05-01T00:02:00Z".to_string(),
        }])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 1);
    store
        .insert_rewards(&[NewReward {
            block_id: 2,
            role: "Validator".to_string(),
            amount: "10".to_string(),
            address_id: from,
            validator_id: validator,
        }])
        .await
        .unwrap();

    store.delete_last_block_data().await.unwrap();

    let last = store.last_block().await.unwrap().unwrap();
    assert_eq!(last.id, 1);
    assert!(store.transaction_by_hash("feed01").await.unwrap().is_none());
    assert!(store.rewards_up_to(10).await.unwrap().is_empty());
    let links: i64 = sqlx::query("SELECT COUNT(*) FROM block_validator")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get(0);
    assert_eq!(links, 0);
}

#[tokio::test]
async fn transaction_insert_reports_ids_and_replays_cleanly() {
    let store = Store::in_memory().await;
    let from = store.find_or_insert_address("aa01").await.unwrap();
    seed_block(&store, 3).await;
    let tx = NewTransaction {
        hash: "feed02".to_string(),
        block_id: 3,
        tx_type: 5,
        nonce: 1,
        gas_coin_id: None,
        from_address_id: from,
        data: r#"{"symbol":"ACME"}"#.to_string(),
        raw: String::new(),
        created_at: "2024-05-01T00:03:00Z".to_string(),
    };
    let first = store.insert_transactions(std::slice::from_ref(&tx)).await.unwrap();
    assert_eq!(first.len(), 1);
    // a replay creates nothing and reports nothing
    let second = store.insert_transactions(std::slice::from_ref(&tx)).await.unwrap();
    assert!(second.is_empty());

    let created = store.create_coin_transactions().await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].hash, "feed02");
}

#[tokio::test]
async fn balances_are_unique_per_address_and_coin() {
    let store = Store::in_memory().await;
    let address = store.find_or_insert_address("aa01").await.unwrap();
    let coin = store.find_or_insert_coin("ACME").await.unwrap();
    store
        .upsert_balances(&[NewBalance {
            address_id: address,
            coin_id: coin,
            value: "5".to_string(),
        }])
        .await
        .unwrap();
    store
        .upsert_balances(&[NewBalance {
            address_id: address,
            coin_id: coin,
            value: "7".to_string(),
        }])
        .await
        .unwrap();

    assert_eq!(store.balance(address, coin).await.unwrap().unwrap(), "7");
    let rows: i64 = sqlx::query("SELECT COUNT(*) FROM balances")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get(0);
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn validator_refresh_resets_statuses_first() {
    let store = Store::in_memory().await;
    let reward = store.find_or_insert_address("aa01").await.unwrap();
    let owner = store.find_or_insert_address("bb02").await.unwrap();
    let active = store.find_or_insert_validator("pk01").await.unwrap();
    let stale = store.find_or_insert_validator("pk02").await.unwrap();
    for id in [active, stale] {
        store
            .update_validator(&ValidatorUpdate {
                id,
                status: VALIDATOR_STATUS_ACTIVE,
                total_stake: "1000".to_string(),
                commission: 10,
                reward_address_id: reward,
                owner_address_id: owner,
                created_at_block_id: Some(1),
            })
            .await
            .unwrap();
    }

    store.reset_validator_statuses().await.unwrap();
    store
        .update_validator(&ValidatorUpdate {
            id: active,
            status: VALIDATOR_STATUS_ACTIVE,
            total_stake: "1000".to_string(),
            commission: 10,
            reward_address_id: reward,
            owner_address_id: owner,
            created_at_block_id: Some(1),
        })
        .await
        .unwrap();

    let actives = store.active_validators().await.unwrap();
    assert_eq!(actives.len(), 1);
    assert_eq!(actives[0].id, active);
    assert_eq!(store.validator_by_id(stale).await.unwrap().unwrap().status, None);
}

#[tokio::test]
async fn uptime_counters_follow_links() {
    let store = Store::in_memory().await;
    let validator = store.find_or_insert_validator("pk01").await.unwrap();
    for height in 1..=4 {
        seed_block(&store, height).await;
        store
            .link_block_validators(&[BlockValidatorLink {
                block_id: height,
                validator_id: validator,
                signed: height != 3,
            }])
            .await
            .unwrap();
    }

    assert_eq!(store.validator_first_block(validator).await.unwrap(), Some(1));
    assert_eq!(store.signed_block_count(validator, 1).await.unwrap(), 3);
    assert_eq!(store.block_count_since(1).await.unwrap(), 4);
}

#[tokio::test]
async fn aggregated_rewards_are_upserted_per_bucket() {
    let store = Store::in_memory().await;
    let address = store.find_or_insert_address("aa01").await.unwrap();
    let validator = store.find_or_insert_validator("pk01").await.unwrap();
    let bucket = AggregatedReward {
        time_id: "2024-05-01T00:00:00".to_string(),
        to_block_id: 60,
        address_id: address,
        validator_id: validator,
        role: "Validator".to_string(),
        amount: "10".to_string(),
    };
    store.upsert_aggregated_reward(&bucket).await.unwrap();
    let mut updated = bucket.clone();
    updated.amount = "25".to_string();
    updated.to_block_id = 120;
    store.upsert_aggregated_reward(&updated).await.unwrap();

    let amount = store
        .aggregated_reward_amount("2024-05-01T00:00:00", address, validator, "Validator")
        .await
        .unwrap();
    assert_eq!(amount.unwrap(), "25");
}
