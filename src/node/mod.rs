// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! How to talk to a Noah full node.

#[cfg(test)]
pub(crate) mod mock;
mod types;

use async_trait::async_trait;

pub use self::types::*;
use crate::common::IndexerError;

/// Height-indexed access to a full node's HTTP API.
///
/// All calls return the `{result, error}` envelope; a transport failure is an
/// `Err`, a structured node error travels inside the envelope.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Current status of the node, including its tip height.
    async fn get_status(&self) -> Result<NodeResponse<StatusResult>, IndexerError>;

    /// The block at the given height.
    async fn get_block(&self, height: u64) -> Result<NodeResponse<BlockResult>, IndexerError>;

    /// The reward and slash events emitted at the given height.
    async fn get_block_events(
        &self,
        height: u64,
    ) -> Result<NodeResponse<EventsResult>, IndexerError>;

    /// The candidate set at the given height, optionally with stakes.
    async fn get_candidates(
        &self,
        height: u64,
        with_stakes: bool,
    ) -> Result<NodeResponse<Vec<CandidateData>>, IndexerError>;

    /// On-chain state of one coin.
    async fn get_coin_info(
        &self,
        symbol: &str,
    ) -> Result<NodeResponse<CoinInfoResult>, IndexerError>;

    /// Current balances of one address.
    async fn get_address_balances(
        &self,
        address: &str,
    ) -> Result<NodeResponse<AddressBalancesResult>, IndexerError>;
}

/// The production client, speaking JSON over HTTP.
pub struct HttpNodeClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<NodeResponse<T>, IndexerError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self.client.get(url).query(query).send().await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn get_status(&self) -> Result<NodeResponse<StatusResult>, IndexerError> {
        self.get("status", &[]).await
    }

    async fn get_block(&self, height: u64) -> Result<NodeResponse<BlockResult>, IndexerError> {
        self.get("block", &[("height", height.to_string())]).await
    }

    async fn get_block_events(
        &self,
        height: u64,
    ) -> Result<NodeResponse<EventsResult>, IndexerError> {
        self.get("events", &[("height", height.to_string())]).await
    }

    async fn get_candidates(
        &self,
        height: u64,
        with_stakes: bool,
    ) -> Result<NodeResponse<Vec<CandidateData>>, IndexerError> {
        self.get(
            "candidates",
            &[
                ("height", height.to_string()),
                ("include_stakes", with_stakes.to_string()),
            ],
        )
        .await
    }

    async fn get_coin_info(
        &self,
        symbol: &str,
    ) -> Result<NodeResponse<CoinInfoResult>, IndexerError> {
        self.get("coinInfo", &[("symbol", symbol.to_string())]).await
    }

    async fn get_address_balances(
        &self,
        address: &str,
    ) -> Result<NodeResponse<AddressBalancesResult>, IndexerError> {
        self.get("address", &[("address", address.to_string())]).await
    }
}
