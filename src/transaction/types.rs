//! Types describing the ledger as seen by the subscriber.
//!
//! A [`Block`] is the ordered list of [`Transaction`]s confirmed in one [`Round`]. Every type here
//! is immutable once produced by a ledger client; the sync engine only reads them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discrete, totally ordered unit of ledger history.
pub type Round = u64;

/// Transaction type tag.
///
/// Serialized with the short names the ledger uses on the wire (`pay`, `axfer`, `appl`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "pay")]
    Payment,
    #[serde(rename = "keyreg")]
    KeyRegistration,
    #[serde(rename = "acfg")]
    AssetConfig,
    #[serde(rename = "axfer")]
    AssetTransfer,
    #[serde(rename = "afrz")]
    AssetFreeze,
    #[serde(rename = "appl")]
    ApplicationCall,
    #[serde(rename = "stpf")]
    StateProof,
    #[serde(rename = "hb")]
    Heartbeat,
}

impl TransactionType {
    /// Wire name of the type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "pay",
            TransactionType::KeyRegistration => "keyreg",
            TransactionType::AssetConfig => "acfg",
            TransactionType::AssetTransfer => "axfer",
            TransactionType::AssetFreeze => "afrz",
            TransactionType::ApplicationCall => "appl",
            TransactionType::StateProof => "stpf",
            TransactionType::Heartbeat => "hb",
        }
    }

    /// Whether transactions of this type move an amount.
    pub fn carries_amount(&self) -> bool {
        matches!(
            self,
            TransactionType::Payment | TransactionType::AssetTransfer
        )
    }

    /// Whether transactions of this type reference an asset.
    pub fn carries_asset_id(&self) -> bool {
        matches!(
            self,
            TransactionType::AssetTransfer
                | TransactionType::AssetConfig
                | TransactionType::AssetFreeze
        )
    }

    /// Whether transactions of this type reference an application.
    pub fn carries_app_id(&self) -> bool {
        matches!(self, TransactionType::ApplicationCall)
    }

    /// Whether transactions of this type have a receiving account.
    pub fn carries_receiver(&self) -> bool {
        matches!(
            self,
            TransactionType::Payment | TransactionType::AssetTransfer
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific transaction fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransactionPayload {
    Payment {
        receiver: String,
        amount: u64,
    },
    AssetTransfer {
        receiver: String,
        asset_id: u64,
        amount: u64,
    },
    ApplicationCall {
        app_id: u64,
    },
    AssetConfig {
        asset_id: u64,
    },
    AssetFreeze {
        asset_id: u64,
    },
    /// Types with nothing the subscriber can filter on.
    None,
}

/// A transaction confirmed in a specific round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier.
    pub id: String,
    /// Round the transaction was confirmed in.
    pub round: Round,
    /// Position of the transaction inside its block.
    pub intra_round_offset: u32,
    /// Sender address.
    pub sender: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Type-specific fields.
    pub payload: TransactionPayload,
}

impl Transaction {
    /// Amount moved by the transaction, if its type carries one.
    pub fn amount(&self) -> Option<u64> {
        match &self.payload {
            TransactionPayload::Payment { amount, .. }
            | TransactionPayload::AssetTransfer { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    /// Asset referenced by the transaction, if any.
    pub fn asset_id(&self) -> Option<u64> {
        match &self.payload {
            TransactionPayload::AssetTransfer { asset_id, .. }
            | TransactionPayload::AssetConfig { asset_id }
            | TransactionPayload::AssetFreeze { asset_id } => Some(*asset_id),
            _ => None,
        }
    }

    /// Application called by the transaction, if any.
    pub fn app_id(&self) -> Option<u64> {
        match &self.payload {
            TransactionPayload::ApplicationCall { app_id } => Some(*app_id),
            _ => None,
        }
    }

    /// Receiving account, if the type has one.
    pub fn receiver(&self) -> Option<&str> {
        match &self.payload {
            TransactionPayload::Payment { receiver, .. }
            | TransactionPayload::AssetTransfer { receiver, .. } => Some(receiver.as_str()),
            _ => None,
        }
    }
}

/// The ordered transactions of one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub round: Round,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(round: Round, transactions: Vec<Transaction>) -> Self {
        Self {
            round,
            transactions,
        }
    }

    pub fn empty(round: Round) -> Self {
        Self::new(round, Vec::new())
    }
}
