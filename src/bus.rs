// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! The pub/sub contract: coin notifications published to named subjects.
//!
//! The broker client itself is injected; this module only fixes the payload
//! shape and the subjects.

use async_trait::async_trait;
use prost::Message;
use tracing::debug;

use crate::common::IndexerError;

pub const COIN_CREATED_SUBJECT: &str = "coin.created";
pub const COIN_UPDATED_SUBJECT: &str = "coin.updated";

/// The protobuf payload of coin notifications. Amounts stay decimal strings;
/// they are arbitrary precision.
#[derive(Clone, PartialEq, Message)]
pub struct CoinPayload {
    #[prost(string, tag = "1")]
    pub symbol: String,
    #[prost(string, tag = "2")]
    pub price: String,
    #[prost(string, tag = "3")]
    pub capitalization: String,
    #[prost(string, tag = "4")]
    pub reserve_balance: String,
    #[prost(string, tag = "5")]
    pub volume: String,
    #[prost(message, optional, tag = "6")]
    pub created_at: Option<prost_types::Timestamp>,
}

impl CoinPayload {
    pub fn now(
        symbol: &str,
        price: &str,
        capitalization: &str,
        reserve_balance: &str,
        volume: &str,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: price.to_string(),
            capitalization: capitalization.to_string(),
            reserve_balance: reserve_balance.to_string(),
            volume: volume.to_string(),
            created_at: Some(prost_types::Timestamp::from(std::time::SystemTime::now())),
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

/// At-least-once publish of encoded payloads to a named subject.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), IndexerError>;
}

/// Default wiring when no broker is configured: payloads are traced and
/// dropped.
pub struct NullBus;

#[async_trait]
impl EventBus for NullBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), IndexerError> {
        debug!(subject, bytes = payload.len(), "dropping bus message, no broker configured");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::*;

    /// Captures published messages for assertions.
    #[derive(Default)]
    pub struct RecordingBus {
        pub messages: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingBus {
        pub fn decoded(&self) -> Vec<(String, CoinPayload)> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(subject, payload)| {
                    (
                        subject.clone(),
                        CoinPayload::decode(payload.as_slice()).expect("coin payload"),
                    )
                })
                .collect()
        }
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), IndexerError> {
            self.messages
                .lock()
                .unwrap()
                .push((subject.to_string(), payload));
            Ok(())
        }
    }
}
