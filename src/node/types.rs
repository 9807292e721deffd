// Copyright (c) Noah Blockchain Developers
// SPDX-License-Identifier: Apache-2.0

//! Wire shapes of the node HTTP API.
//!
//! Every endpoint answers with the same envelope: either a `result` or a
//! structured `error`. Numeric fields arrive as decimal strings; heights and
//! small integers are decoded eagerly, money amounts stay strings because
//! they are arbitrary precision.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// Decodes a `u64` sent as a JSON string.
fn u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

/// The `{result, error}` envelope common to all endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeResponse<T> {
    pub result: Option<T>,
    pub error: Option<NodeResponseError>,
}

impl<T> NodeResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(NodeResponseError {
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// The structured error field. Distinct from transport errors.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeResponseError {
    pub message: String,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    #[serde(deserialize_with = "u64_from_string")]
    pub latest_block_height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockResult {
    #[serde(deserialize_with = "u64_from_string")]
    pub height: u64,
    /// Block timestamp, RFC 3339.
    pub time: String,
    #[serde(deserialize_with = "u64_from_string")]
    pub num_txs: u64,
    #[serde(default)]
    pub transactions: Vec<TransactionData>,
    #[serde(default)]
    pub validators: Vec<BlockValidatorData>,
    pub proposer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockValidatorData {
    pub pub_key: String,
    /// `None` means the node did not report whether the validator signed;
    /// such blocks are inadmissible.
    pub signed: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionData {
    pub hash: String,
    pub from: String,
    #[serde(deserialize_with = "u64_from_string")]
    pub nonce: u64,
    #[serde(rename = "type")]
    pub tx_type: u64,
    pub gas_coin: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Raw transaction bytes, hex.
    #[serde(default)]
    pub raw_tx: String,
    /// Set iff the blockchain rejected the transaction.
    pub log: Option<String>,
}

/// Transaction types, in the node's wire numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionType {
    Send = 1,
    SellCoin = 2,
    SellAllCoin = 3,
    BuyCoin = 4,
    CreateCoin = 5,
    DeclareCandidacy = 6,
    Delegate = 7,
    Unbond = 8,
    RedeemCheck = 9,
    SetCandidateOn = 10,
    SetCandidateOff = 11,
    CreateMultisig = 12,
    MultiSend = 13,
    EditCandidate = 14,
}

impl TransactionType {
    pub fn from_code(code: u64) -> Option<Self> {
        use TransactionType::*;
        Some(match code {
            1 => Send,
            2 => SellCoin,
            3 => SellAllCoin,
            4 => BuyCoin,
            5 => CreateCoin,
            6 => DeclareCandidacy,
            7 => Delegate,
            8 => Unbond,
            9 => RedeemCheck,
            10 => SetCandidateOn,
            11 => SetCandidateOff,
            12 => CreateMultisig,
            13 => MultiSend,
            14 => EditCandidate,
            _ => return None,
        })
    }
}

/// The typed payload of a transaction, decoded according to its type.
#[derive(Debug, Clone)]
pub enum TxPayload {
    Send(SendTxData),
    SellCoin(SellCoinTxData),
    SellAllCoin(SellAllCoinTxData),
    BuyCoin(BuyCoinTxData),
    CreateCoin(CreateCoinTxData),
    DeclareCandidacy(DeclareCandidacyTxData),
    Delegate(DelegateTxData),
    Unbond(UnbondTxData),
    RedeemCheck(RedeemCheckTxData),
    SetCandidate(SetCandidateTxData),
    CreateMultisig(CreateMultisigTxData),
    MultiSend(MultiSendTxData),
    EditCandidate(EditCandidateTxData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendTxData {
    pub coin: String,
    pub to: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellCoinTxData {
    pub coin_to_sell: String,
    pub coin_to_buy: String,
    pub value_to_sell: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellAllCoinTxData {
    pub coin_to_sell: String,
    pub coin_to_buy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyCoinTxData {
    pub coin_to_buy: String,
    pub coin_to_sell: String,
    pub value_to_buy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCoinTxData {
    pub name: String,
    pub symbol: String,
    pub initial_amount: String,
    pub initial_reserve: String,
    pub constant_reserve_ratio: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclareCandidacyTxData {
    pub address: String,
    pub pub_key: String,
    #[serde(deserialize_with = "u64_from_string")]
    pub commission: u64,
    pub coin: String,
    pub stake: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelegateTxData {
    pub pub_key: String,
    pub coin: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnbondTxData {
    pub pub_key: String,
    pub coin: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemCheckTxData {
    pub raw_check: String,
    pub proof: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetCandidateTxData {
    pub pub_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMultisigTxData {
    #[serde(deserialize_with = "u64_from_string")]
    pub threshold: u64,
    #[serde(default)]
    pub weights: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiSendTxData {
    pub list: Vec<SendTxData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditCandidateTxData {
    pub pub_key: String,
    pub reward_address: String,
    pub owner_address: String,
}

impl TransactionData {
    pub fn transaction_type(&self) -> Option<TransactionType> {
        TransactionType::from_code(self.tx_type)
    }

    /// Decodes the typed data payload. Unparseable payloads are a local
    /// error; callers log and skip.
    pub fn payload(&self) -> Result<TxPayload, serde_json::Error> {
        use TransactionType::*;
        let data = self.data.clone();
        let payload = match self.transaction_type() {
            Some(Send) => TxPayload::Send(serde_json::from_value(data)?),
            Some(SellCoin) => TxPayload::SellCoin(serde_json::from_value(data)?),
            Some(SellAllCoin) => TxPayload::SellAllCoin(serde_json::from_value(data)?),
            Some(BuyCoin) => TxPayload::BuyCoin(serde_json::from_value(data)?),
            Some(CreateCoin) => TxPayload::CreateCoin(serde_json::from_value(data)?),
            Some(DeclareCandidacy) => TxPayload::DeclareCandidacy(serde_json::from_value(data)?),
            Some(Delegate) => TxPayload::Delegate(serde_json::from_value(data)?),
            Some(Unbond) => TxPayload::Unbond(serde_json::from_value(data)?),
            Some(RedeemCheck) => TxPayload::RedeemCheck(serde_json::from_value(data)?),
            Some(SetCandidateOn) | Some(SetCandidateOff) => {
                TxPayload::SetCandidate(serde_json::from_value(data)?)
            }
            Some(CreateMultisig) => TxPayload::CreateMultisig(serde_json::from_value(data)?),
            Some(MultiSend) => TxPayload::MultiSend(serde_json::from_value(data)?),
            Some(EditCandidate) => TxPayload::EditCandidate(serde_json::from_value(data)?),
            None => {
                return Err(serde::de::Error::custom(format!(
                    "unknown transaction type {}",
                    self.tx_type
                )))
            }
        };
        Ok(payload)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsResult {
    #[serde(default)]
    pub events: Vec<EventData>,
}

impl EventsResult {
    pub fn empty() -> Self {
        Self { events: Vec::new() }
    }
}

/// An event as shipped by the node: a type tag and an untyped value.
/// Classification happens in the event service.
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardEventValue {
    pub role: String,
    pub address: String,
    pub amount: String,
    pub validator_pub_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlashEventValue {
    pub address: String,
    pub amount: String,
    pub coin: String,
    pub validator_pub_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateData {
    pub pub_key: String,
    pub reward_address: String,
    pub owner_address: String,
    pub total_stake: String,
    #[serde(deserialize_with = "u64_from_string")]
    pub commission: u64,
    #[serde(deserialize_with = "u64_from_string")]
    pub created_at_block: u64,
    pub status: u8,
    #[serde(default)]
    pub stakes: Vec<StakeData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StakeData {
    pub owner: String,
    pub coin: String,
    pub value: String,
    pub noah_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinInfoResult {
    pub name: String,
    pub symbol: String,
    #[serde(deserialize_with = "u64_from_string")]
    pub crr: u64,
    pub volume: String,
    pub reserve_balance: String,
}

/// Balances of one address: coin symbol to amount.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressBalancesResult {
    #[serde(default)]
    pub balance: BTreeMap<String, String>,
}
