// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The WebSocket broadcaster client.
//!
//! Derived updates are fanned out as JSON over the broadcaster's HTTP API:
//! fresh blocks on `blocks`, transactions on `transactions`, per-address
//! balance lists on `NOAHx<address>`. Publish failures are logged, never
//! fatal; the fan-out is best effort.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

pub const BLOCKS_CHANNEL: &str = "blocks";
pub const TRANSACTIONS_CHANNEL: &str = "transactions";

/// The per-address channel carrying balance updates.
pub fn address_channel(address: &str) -> String {
    format!("NOAHx{address}")
}

#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn publish(&self, channel: &str, payload: serde_json::Value);
}

/// Publishes over the broadcaster's HTTP API.
pub struct HttpBroadcaster {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpBroadcaster {
    pub fn new(host: &str, port: u16, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("http://{host}:{port}/api"),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Broadcast for HttpBroadcaster {
    async fn publish(&self, channel: &str, payload: serde_json::Value) {
        let body = json!({
            "method": "publish",
            "params": { "channel": channel, "data": payload },
        });
        let result = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("apikey {}", self.api_key))
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(error) = result {
            warn!(channel, %error, "broadcast publish failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingBroadcast {
        pub messages: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Broadcast for RecordingBroadcast {
        async fn publish(&self, channel: &str, payload: serde_json::Value) {
            self.messages
                .lock()
                .unwrap()
                .push((channel.to_string(), payload));
        }
    }
}
