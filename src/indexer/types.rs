//! Types for the Algorand indexer REST API

use crate::transaction::{Block, Round, Transaction, TransactionPayload, TransactionType};

use serde::{Deserialize, Serialize};

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Latest round the indexer has ingested.
    pub round: Round,
    /// Whether the indexer database is reachable.
    #[serde(rename = "db-available", default)]
    pub db_available: Option<bool>,
    /// Whether the indexer is still catching up.
    #[serde(rename = "is-migrating", default)]
    pub is_migrating: Option<bool>,
}

/// Response of `GET /v2/blocks/{round}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    pub round: Round,
    #[serde(default)]
    pub transactions: Vec<IndexerTransaction>,
}

/// A transaction as returned by the indexer.
///
/// Only the fields the subscriber filters on are decoded; everything else is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerTransaction {
    /// The transaction id.
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Type tag (`pay`, `axfer`, ...).
    #[serde(rename = "tx-type")]
    pub tx_type: TransactionType,
    /// Round the transaction was confirmed in.
    #[serde(rename = "confirmed-round", default)]
    pub confirmed_round: Option<Round>,
    /// Offset inside the block.
    #[serde(rename = "intra-round-offset", default)]
    pub intra_round_offset: Option<u32>,
    #[serde(rename = "payment-transaction", default)]
    pub payment: Option<PaymentFields>,
    #[serde(rename = "asset-transfer-transaction", default)]
    pub asset_transfer: Option<AssetTransferFields>,
    #[serde(rename = "application-transaction", default)]
    pub application: Option<ApplicationFields>,
    #[serde(rename = "asset-config-transaction", default)]
    pub asset_config: Option<AssetReferenceFields>,
    #[serde(rename = "asset-freeze-transaction", default)]
    pub asset_freeze: Option<AssetReferenceFields>,
    /// Set when the transaction created an application.
    #[serde(rename = "created-application-index", default)]
    pub created_application_index: Option<u64>,
    /// Set when the transaction created an asset.
    #[serde(rename = "created-asset-index", default)]
    pub created_asset_index: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFields {
    pub amount: u64,
    pub receiver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTransferFields {
    pub amount: u64,
    #[serde(rename = "asset-id")]
    pub asset_id: u64,
    pub receiver: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationFields {
    #[serde(rename = "application-id", default)]
    pub application_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReferenceFields {
    #[serde(rename = "asset-id", default)]
    pub asset_id: u64,
}

impl IndexerTransaction {
    /// Convert into the subscriber's transaction model.
    ///
    /// `position` is used when the indexer omits `intra-round-offset`. Creation transactions
    /// report id 0 in their payload, so the created index is substituted.
    pub fn into_transaction(self, round: Round, position: u32) -> Result<Transaction, LedgerError> {
        let payload = match self.tx_type {
            TransactionType::Payment => {
                let fields = self.payment.ok_or_else(|| {
                    LedgerError::UnexpectedPayload(format!(
                        "payment transaction {} has no payment fields",
                        self.id
                    ))
                })?;
                TransactionPayload::Payment {
                    receiver: fields.receiver,
                    amount: fields.amount,
                }
            }
            TransactionType::AssetTransfer => {
                let fields = self.asset_transfer.ok_or_else(|| {
                    LedgerError::UnexpectedPayload(format!(
                        "asset transfer {} has no asset-transfer fields",
                        self.id
                    ))
                })?;
                TransactionPayload::AssetTransfer {
                    receiver: fields.receiver,
                    asset_id: fields.asset_id,
                    amount: fields.amount,
                }
            }
            TransactionType::ApplicationCall => {
                let app_id = match self.application.map(|a| a.application_id) {
                    Some(0) | None => self.created_application_index.unwrap_or(0),
                    Some(id) => id,
                };
                TransactionPayload::ApplicationCall { app_id }
            }
            TransactionType::AssetConfig => {
                let asset_id = match self.asset_config.map(|a| a.asset_id) {
                    Some(0) | None => self.created_asset_index.unwrap_or(0),
                    Some(id) => id,
                };
                TransactionPayload::AssetConfig { asset_id }
            }
            TransactionType::AssetFreeze => TransactionPayload::AssetFreeze {
                asset_id: self.asset_freeze.map(|a| a.asset_id).unwrap_or(0),
            },
            TransactionType::KeyRegistration
            | TransactionType::StateProof
            | TransactionType::Heartbeat => TransactionPayload::None,
        };

        Ok(Transaction {
            id: self.id,
            round: self.confirmed_round.unwrap_or(round),
            intra_round_offset: self.intra_round_offset.unwrap_or(position),
            sender: self.sender,
            tx_type: self.tx_type,
            payload,
        })
    }
}

impl BlockResponse {
    /// Convert into a [`Block`], preserving transaction order.
    pub fn into_block(self) -> Result<Block, LedgerError> {
        let round = self.round;
        let transactions = self
            .transactions
            .into_iter()
            .enumerate()
            .map(|(position, tx)| tx.into_transaction(round, position as u32))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block::new(round, transactions))
    }
}

/// Error types for ledger access
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status}: {body}")]
    StatusError { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Round {0} is not available yet")]
    RoundNotAvailable(Round),

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error("Ledger unreachable: {0}")]
    Unreachable(String),
}

impl LedgerError {
    /// Whether retrying the same request can succeed without outside intervention.
    ///
    /// Network failures, server errors, rate limiting and rounds past the tip clear up on
    /// their own. Other client errors and undecodable responses do not.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::HttpError(_)
            | LedgerError::RoundNotAvailable(_)
            | LedgerError::Unreachable(_) => true,
            LedgerError::StatusError { status, .. } => *status >= 500 || *status == 429,
            LedgerError::JsonError(_) | LedgerError::UnexpectedPayload(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_asset_transfer_block() {
        let raw = r#"{
            "round": 40714690,
            "timestamp": 1719000000,
            "transactions": [
                {
                    "id": "TXA",
                    "sender": "SENDERA",
                    "tx-type": "axfer",
                    "confirmed-round": 40714690,
                    "intra-round-offset": 3,
                    "asset-transfer-transaction": {
                        "amount": 2000000,
                        "asset-id": 31566704,
                        "receiver": "RECEIVERA",
                        "close-amount": 0
                    }
                },
                {
                    "id": "TXB",
                    "sender": "SENDERB",
                    "tx-type": "appl",
                    "application-transaction": { "application-id": 0 },
                    "created-application-index": 1212658560
                }
            ]
        }"#;
        let response: BlockResponse = serde_json::from_str(raw).unwrap();
        let block = response.into_block().unwrap();

        assert_eq!(block.round, 40714690);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].asset_id(), Some(31566704));
        assert_eq!(block.transactions[0].intra_round_offset, 3);
        assert_eq!(block.transactions[1].app_id(), Some(1212658560));
        assert_eq!(block.transactions[1].round, 40714690);
        assert_eq!(block.transactions[1].intra_round_offset, 1);
    }

    #[test]
    fn payment_without_fields_is_rejected() {
        let tx = IndexerTransaction {
            id: "TXP".to_string(),
            sender: "S".to_string(),
            tx_type: TransactionType::Payment,
            confirmed_round: Some(5),
            intra_round_offset: None,
            payment: None,
            asset_transfer: None,
            application: None,
            asset_config: None,
            asset_freeze: None,
            created_application_index: None,
            created_asset_index: None,
        };
        assert!(matches!(
            tx.into_transaction(5, 0),
            Err(LedgerError::UnexpectedPayload(_))
        ));
    }
}
