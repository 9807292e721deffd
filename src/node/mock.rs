// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! A scripted node used by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use super::*;

/// A queue of scripted responses: each call pops the next one; once drained,
/// the last response keeps repeating.
struct ScriptedQueue<T> {
    queue: VecDeque<T>,
    last: Option<T>,
}

impl<T: Clone> ScriptedQueue<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }

    fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    fn next(&mut self) -> Option<T> {
        if let Some(item) = self.queue.pop_front() {
            self.last = Some(item);
        }
        self.last.clone()
    }
}

/// Serves pre-programmed responses. Unscripted queries answer with a
/// structured node error, never a transport error.
pub struct MockNode {
    pub status_calls: AtomicUsize,
    status: Mutex<ScriptedQueue<NodeResponse<StatusResult>>>,
    blocks: Mutex<HashMap<u64, ScriptedQueue<NodeResponse<BlockResult>>>>,
    events: Mutex<HashMap<u64, NodeResponse<EventsResult>>>,
    candidates: Mutex<HashMap<(u64, bool), NodeResponse<Vec<CandidateData>>>>,
    coins: Mutex<HashMap<String, NodeResponse<CoinInfoResult>>>,
    balances: Mutex<HashMap<String, NodeResponse<AddressBalancesResult>>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            status_calls: AtomicUsize::new(0),
            status: Mutex::new(ScriptedQueue::new()),
            blocks: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            candidates: Mutex::new(HashMap::new()),
            coins: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
        }
    }

    /// Scripts the next tip height reported by `get_status`.
    pub fn push_status(&self, latest_block_height: u64) {
        self.status
            .lock()
            .unwrap()
            .push(NodeResponse::ok(StatusResult {
                latest_block_height,
            }));
    }

    pub fn push_block(&self, height: u64, response: NodeResponse<BlockResult>) {
        self.blocks
            .lock()
            .unwrap()
            .entry(height)
            .or_insert_with(ScriptedQueue::new)
            .push(response);
    }

    pub fn set_events(&self, height: u64, response: NodeResponse<EventsResult>) {
        self.events.lock().unwrap().insert(height, response);
    }

    pub fn set_candidates(
        &self,
        height: u64,
        with_stakes: bool,
        response: NodeResponse<Vec<CandidateData>>,
    ) {
        self.candidates
            .lock()
            .unwrap()
            .insert((height, with_stakes), response);
    }

    pub fn set_coin_info(&self, symbol: &str, response: NodeResponse<CoinInfoResult>) {
        self.coins.lock().unwrap().insert(symbol.to_string(), response);
    }

    pub fn set_balances(&self, address: &str, response: NodeResponse<AddressBalancesResult>) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), response);
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_status(&self) -> Result<NodeResponse<StatusResult>, IndexerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .status
            .lock()
            .unwrap()
            .next()
            .unwrap_or_else(|| NodeResponse::err("no status scripted")))
    }

    async fn get_block(&self, height: u64) -> Result<NodeResponse<BlockResult>, IndexerError> {
        let mut blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .get_mut(&height)
            .and_then(ScriptedQueue::next)
            .unwrap_or_else(|| NodeResponse::err("block not found")))
    }

    async fn get_block_events(
        &self,
        height: u64,
    ) -> Result<NodeResponse<EventsResult>, IndexerError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_else(|| NodeResponse::ok(EventsResult::empty())))
    }

    async fn get_candidates(
        &self,
        height: u64,
        with_stakes: bool,
    ) -> Result<NodeResponse<Vec<CandidateData>>, IndexerError> {
        Ok(self
            .candidates
            .lock()
            .unwrap()
            .get(&(height, with_stakes))
            .cloned()
            .unwrap_or_else(|| NodeResponse::ok(Vec::new())))
    }

    async fn get_coin_info(
        &self,
        symbol: &str,
    ) -> Result<NodeResponse<CoinInfoResult>, IndexerError> {
        Ok(self
            .coins
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| NodeResponse::err("coin not found")))
    }

    async fn get_address_balances(
        &self,
        address: &str,
    ) -> Result<NodeResponse<AddressBalancesResult>, IndexerError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(|| {
                NodeResponse::ok(AddressBalancesResult {
                    balance: Default::default(),
                })
            }))
    }
}

/// Builds a block response with the given transactions and validators.
pub fn block_fixture(
    height: u64,
    transactions: Vec<TransactionData>,
    validators: Vec<BlockValidatorData>,
) -> NodeResponse<BlockResult> {
    NodeResponse::ok(BlockResult {
        height,
        time: format!("2024-05-01T00:{:02}:00Z", height % 60),
        num_txs: transactions.len() as u64,
        transactions,
        validators,
        proposer: Some("Npproposer01".to_string()),
    })
}

pub fn signer_fixture(pub_key: &str, signed: Option<bool>) -> BlockValidatorData {
    BlockValidatorData {
        pub_key: pub_key.to_string(),
        signed,
    }
}

pub fn tx_fixture(
    hash: &str,
    from: &str,
    tx_type: TransactionType,
    data: serde_json::Value,
    log: Option<&str>,
) -> TransactionData {
    TransactionData {
        hash: hash.to_string(),
        from: from.to_string(),
        nonce: 1,
        tx_type: tx_type as u64,
        gas_coin: "NOAH".to_string(),
        data,
        raw_tx: String::new(),
        log: log.map(str::to_string),
    }
}
