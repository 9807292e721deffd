// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Block header persistence and block-validator links.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use crate::{
    broadcast::{Broadcast, BLOCKS_CHANNEL},
    common::{strip_public_key_prefix, IndexerError},
    db::{BlockRow, BlockValidatorLink, NewBlock, Store},
    node::BlockResult,
};

pub struct BlockService {
    store: Arc<Store>,
    broadcaster: Arc<dyn Broadcast>,
    /// The most recently persisted block, primed at startup so the resume
    /// height survives without a query per iteration.
    last_block: RwLock<Option<BlockRow>>,
}

impl BlockService {
    pub fn new(store: Arc<Store>, broadcaster: Arc<dyn Broadcast>) -> Self {
        Self {
            store,
            broadcaster,
            last_block: RwLock::new(None),
        }
    }

    pub async fn set_last_block(&self, block: BlockRow) {
        *self.last_block.write().await = Some(block);
    }

    pub async fn last_block(&self) -> Option<BlockRow> {
        self.last_block.read().await.clone()
    }

    /// Persists the header, caches it as the last block and announces it.
    pub async fn handle_block_response(&self, block: &BlockResult) -> Result<(), IndexerError> {
        let proposer_validator_id = match &block.proposer {
            Some(proposer) => {
                self.store
                    .find_validator_id(strip_public_key_prefix(proposer))
                    .await?
            }
            None => None,
        };
        let row = NewBlock {
            id: block.height as i64,
            created_at: block.time.clone(),
            tx_count: block.num_txs as i64,
            proposer_validator_id,
        };
        self.store.insert_block(&row).await?;
        self.set_last_block(BlockRow {
            id: row.id,
            created_at: row.created_at.clone(),
            tx_count: row.tx_count,
            proposer_validator_id: row.proposer_validator_id,
        })
        .await;
        self.broadcaster
            .publish(
                BLOCKS_CHANNEL,
                json!({
                    "height": block.height,
                    "timestamp": block.time,
                    "tx_count": block.num_txs,
                }),
            )
            .await;
        Ok(())
    }

    /// Writes one (block, validator, signed) row per validator. The first
    /// block has no prior validator set and is skipped. A validator without
    /// a signed flag makes the whole block inadmissible.
    pub async fn link_with_validators(&self, block: &BlockResult) -> Result<(), IndexerError> {
        if block.height <= 1 {
            return Ok(());
        }
        let mut links = Vec::with_capacity(block.validators.len());
        for validator in &block.validators {
            let signed = validator.signed.ok_or_else(|| IndexerError::MissingSignedFlag {
                height: block.height,
                public_key: validator.pub_key.clone(),
            })?;
            let public_key = strip_public_key_prefix(&validator.pub_key);
            let validator_id = self
                .store
                .find_validator_id(public_key)
                .await?
                .ok_or_else(|| IndexerError::UnknownValidator(public_key.to_string()))?;
            links.push(BlockValidatorLink {
                block_id: block.height as i64,
                validator_id,
                signed,
            });
        }
        self.store.link_block_validators(&links).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use sqlx::Row;

    use super::*;
    use crate::broadcast::recording::RecordingBroadcast;
    use crate::node::mock::{block_fixture, signer_fixture};

    fn service(store: Arc<Store>) -> BlockService {
        BlockService::new(store, Arc::new(RecordingBroadcast::default()))
    }

    #[tokio::test]
    async fn genesis_block_has_no_links() {
        let store = Arc::new(Store::in_memory().await);
        let blocks = service(store.clone());
        let block = block_fixture(1, vec![], vec![signer_fixture("Nppk01", None)])
            .result
            .unwrap();

        blocks.link_with_validators(&block).await.unwrap();

        let links: i64 = sqlx::query("SELECT COUNT(*) FROM block_validator")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get(0);
        assert_eq!(links, 0);
    }

    #[tokio::test]
    async fn missing_signed_flag_is_inadmissible() {
        let store = Arc::new(Store::in_memory().await);
        store.find_or_insert_validator("pk01").await.unwrap();
        let blocks = service(store);
        let block = block_fixture(7, vec![], vec![signer_fixture("Nppk01", None)])
            .result
            .unwrap();

        let result = blocks.link_with_validators(&block).await;
        assert_matches!(result, Err(IndexerError::MissingSignedFlag { height: 7, .. }));
    }

    #[tokio::test]
    async fn persists_header_and_caches_it() {
        let store = Arc::new(Store::in_memory().await);
        let blocks = service(store.clone());
        let block = block_fixture(3, vec![], vec![]).result.unwrap();

        blocks.handle_block_response(&block).await.unwrap();

        let last = blocks.last_block().await.unwrap();
        assert_eq!(last.id, 3);
        assert_eq!(store.last_block().await.unwrap().unwrap().id, 3);
    }
}
