//! # Transaction envelope
//! Sends a planned transaction through an external broadcaster and classifies what became of it.
//!
//! The envelope takes a plan by value, so a plan is sent at most once. Hints and gas are frozen
//! by then; nothing here re-derives them. A hint invalidated by someone else's transaction shows
//! up as `TxOutcome::Failed(FailureReason::StaleHint)`; the remedy is to plan again.

use crate::errors::*;
use crate::operation_planner::*;
use crate::redemption_planner::*;
use crate::registry::*;
use crate::shared_structs::*;
use async_trait::async_trait;
use scrypto::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

/// How often a repriced transaction is followed to its replacement before giving up.
pub const MAX_REPRICE_HOPS: usize = 8;

/// Revert messages that mean the list moved under the hints.
pub const DEFAULT_STALE_HINT_MARKERS: [&str; 3] =
    ["invalid hint", "insert position", "list changed"];

pub type TransactionHash = Hash;

/// A request together with the gas limit it is sent with.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct SizedTransaction {
    pub request: TransactionRequest,
    pub gas_limit: u64,
}

/// How a pending transaction was replaced.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacementKind {
    /// Replaced by a no-op from the same sender.
    Cancelled,
    /// Replaced by a different transaction.
    Replaced,
    /// Replaced by the same transaction with a higher fee.
    Repriced,
}

/// What the broadcaster knows about a transaction.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub enum RawReceipt {
    /// Not mined yet.
    Unknown,
    Mined {
        success: bool,
        block_number: u64,
        gas_used: u64,
        revert_reason: Option<String>,
    },
    Replaced {
        kind: ReplacementKind,
        replacement: TransactionHash,
    },
}

/// Signing, broadcast and receipt retrieval.
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    async fn broadcast(&self, transaction: &SizedTransaction) -> Result<TransactionHash, String>;

    async fn receipt(&self, hash: &TransactionHash) -> RegistryResult<RawReceipt>;

    /// Resolves once the transaction is mined or replaced.
    async fn wait_for_receipt(&self, hash: &TransactionHash) -> RegistryResult<RawReceipt>;
}

/// A plan ready for the envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedTransaction {
    Operation(PlannedOperation),
    Redemption(RedemptionPlan),
}

impl PlannedTransaction {
    fn kind(&self) -> TransactionKind {
        match self {
            PlannedTransaction::Operation(operation) => match operation.kind() {
                OperationKind::Open => TransactionKind::Open,
                OperationKind::Adjust => TransactionKind::Adjust,
            },
            PlannedTransaction::Redemption(_) => TransactionKind::Redeem,
        }
    }

    fn into_sized(self) -> SizedTransaction {
        match self {
            PlannedTransaction::Operation(operation) => SizedTransaction {
                gas_limit: operation.gas_limit(),
                request: operation.request().clone(),
            },
            PlannedTransaction::Redemption(plan) => SizedTransaction {
                gas_limit: plan.gas_limit(),
                request: plan.request(),
            },
        }
    }
}

impl From<PlannedOperation> for PlannedTransaction {
    fn from(operation: PlannedOperation) -> Self {
        PlannedTransaction::Operation(operation)
    }
}

impl From<RedemptionPlan> for PlannedTransaction {
    fn from(plan: RedemptionPlan) -> Self {
        PlannedTransaction::Redemption(plan)
    }
}

#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Open,
    Adjust,
    Redeem,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct SuccessDetails {
    pub hash: TransactionHash,
    pub kind: TransactionKind,
    pub block_number: u64,
    pub gas_used: u64,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The ledger refused the hints because the list changed since planning.
    StaleHint { message: String },
    /// The transaction used its whole gas limit.
    OutOfGas { gas_limit: u64 },
    Reverted { message: Option<String> },
}

/// Final or current state of a sent transaction.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    Pending,
    Succeeded(SuccessDetails),
    Failed(FailureReason),
    ReplacedOrCancelled {
        kind: ReplacementKind,
        replacement: TransactionHash,
    },
}

/// Sends plans through a broadcaster.
pub struct TransactionEnvelope<B: TransactionBroadcaster + ?Sized> {
    broadcaster: Arc<B>,
    stale_hint_markers: Arc<Vec<String>>,
}

impl<B: TransactionBroadcaster + ?Sized> TransactionEnvelope<B> {
    pub fn new(broadcaster: Arc<B>) -> Self {
        Self {
            broadcaster,
            stale_hint_markers: Arc::new(
                DEFAULT_STALE_HINT_MARKERS
                    .iter()
                    .map(|marker| marker.to_string())
                    .collect(),
            ),
        }
    }

    /// Replaces the revert message fragments that classify a failure as a stale hint.
    pub fn with_stale_hint_markers(mut self, markers: Vec<String>) -> Self {
        self.stale_hint_markers = Arc::new(markers);
        self
    }

    /// Broadcasts `planned` with its frozen request and gas limit.
    ///
    /// # Errors
    /// * `Broadcast` if the broadcaster refuses the transaction.
    pub async fn send(
        &self,
        planned: impl Into<PlannedTransaction>,
    ) -> Result<SentTransaction<B>, PlannerError> {
        let planned = planned.into();
        let kind = planned.kind();
        let transaction = planned.into_sized();

        let hash = self
            .broadcaster
            .broadcast(&transaction)
            .await
            .map_err(PlannerError::Broadcast)?;

        info!(?kind, gas_limit = transaction.gas_limit, %hash, "sent transaction");

        Ok(SentTransaction {
            broadcaster: self.broadcaster.clone(),
            stale_hint_markers: self.stale_hint_markers.clone(),
            hash,
            kind,
            gas_limit: transaction.gas_limit,
        })
    }
}

/// A broadcast transaction whose outcome can be queried.
pub struct SentTransaction<B: TransactionBroadcaster + ?Sized> {
    broadcaster: Arc<B>,
    stale_hint_markers: Arc<Vec<String>>,
    hash: TransactionHash,
    kind: TransactionKind,
    gas_limit: u64,
}

impl<B: TransactionBroadcaster + ?Sized> SentTransaction<B> {
    pub fn hash(&self) -> &TransactionHash {
        &self.hash
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Current outcome. `Pending` until the transaction is mined or replaced.
    ///
    /// # Errors
    /// * `RepriceChainTooLong` if more than `MAX_REPRICE_HOPS` repriced replacements are chained.
    pub async fn outcome(&self) -> Result<TxOutcome, PlannerError> {
        let mut hash = self.hash;
        for _ in 0..MAX_REPRICE_HOPS {
            let receipt = self.broadcaster.receipt(&hash).await?;
            match receipt {
                RawReceipt::Replaced {
                    kind: ReplacementKind::Repriced,
                    replacement,
                } => hash = replacement,
                receipt => return Ok(self.classify(hash, receipt)),
            }
        }

        warn!(%hash, "gave up following repriced transaction");
        Err(PlannerError::RepriceChainTooLong {
            last: hash,
            hops: MAX_REPRICE_HOPS,
        })
    }

    /// Waits until the transaction is mined or replaced, following repriced replacements.
    pub async fn wait_for_outcome(&self) -> Result<TxOutcome, PlannerError> {
        let mut hash = self.hash;
        for _ in 0..MAX_REPRICE_HOPS {
            let receipt = self.broadcaster.wait_for_receipt(&hash).await?;
            match receipt {
                RawReceipt::Replaced {
                    kind: ReplacementKind::Repriced,
                    replacement,
                } => hash = replacement,
                receipt => return Ok(self.classify(hash, receipt)),
            }
        }

        warn!(%hash, "gave up following repriced transaction");
        Err(PlannerError::RepriceChainTooLong {
            last: hash,
            hops: MAX_REPRICE_HOPS,
        })
    }

    fn classify(&self, hash: TransactionHash, receipt: RawReceipt) -> TxOutcome {
        let outcome = classify_receipt(
            hash,
            self.kind,
            self.gas_limit,
            receipt,
            &self.stale_hint_markers,
        );
        if let TxOutcome::Failed(reason) = &outcome {
            warn!(%hash, ?reason, "transaction failed");
        }
        outcome
    }
}

/// Maps a broadcaster receipt onto an outcome.
pub fn classify_receipt(
    hash: TransactionHash,
    kind: TransactionKind,
    gas_limit: u64,
    receipt: RawReceipt,
    stale_hint_markers: &[String],
) -> TxOutcome {
    match receipt {
        RawReceipt::Unknown => TxOutcome::Pending,
        RawReceipt::Replaced { kind, replacement } => {
            TxOutcome::ReplacedOrCancelled { kind, replacement }
        }
        RawReceipt::Mined {
            success: true,
            block_number,
            gas_used,
            ..
        } => TxOutcome::Succeeded(SuccessDetails {
            hash,
            kind,
            block_number,
            gas_used,
        }),
        RawReceipt::Mined {
            success: false,
            gas_used,
            revert_reason,
            ..
        } => {
            let stale = revert_reason.as_ref().filter(|message| {
                let message = message.to_lowercase();
                stale_hint_markers
                    .iter()
                    .any(|marker| message.contains(&marker.to_lowercase()))
            });

            if let Some(message) = stale {
                TxOutcome::Failed(FailureReason::StaleHint {
                    message: message.clone(),
                })
            } else if revert_reason.is_none() && gas_used >= gas_limit {
                TxOutcome::Failed(FailureReason::OutOfGas { gas_limit })
            } else {
                TxOutcome::Failed(FailureReason::Reverted {
                    message: revert_reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        DEFAULT_STALE_HINT_MARKERS
            .iter()
            .map(|marker| marker.to_string())
            .collect()
    }

    fn mined(success: bool, gas_used: u64, revert_reason: Option<&str>) -> RawReceipt {
        RawReceipt::Mined {
            success,
            block_number: 42,
            gas_used,
            revert_reason: revert_reason.map(|reason| reason.to_string()),
        }
    }

    #[test]
    fn classifies_success_and_pending() {
        let tx = hash("tx");

        assert_eq!(
            classify_receipt(
                tx,
                TransactionKind::Open,
                500_000,
                RawReceipt::Unknown,
                &markers()
            ),
            TxOutcome::Pending
        );
        assert_eq!(
            classify_receipt(
                tx,
                TransactionKind::Open,
                500_000,
                mined(true, 400_000, None),
                &markers()
            ),
            TxOutcome::Succeeded(SuccessDetails {
                hash: tx,
                kind: TransactionKind::Open,
                block_number: 42,
                gas_used: 400_000,
            })
        );
    }

    #[test]
    fn classifies_failures() {
        let tx = hash("tx");

        assert_eq!(
            classify_receipt(
                tx,
                TransactionKind::Adjust,
                500_000,
                mined(false, 120_000, Some("SortedList: Invalid hint")),
                &markers()
            ),
            TxOutcome::Failed(FailureReason::StaleHint {
                message: "SortedList: Invalid hint".to_string()
            })
        );
        assert_eq!(
            classify_receipt(
                tx,
                TransactionKind::Adjust,
                500_000,
                mined(false, 500_000, None),
                &markers()
            ),
            TxOutcome::Failed(FailureReason::OutOfGas { gas_limit: 500_000 })
        );
        assert_eq!(
            classify_receipt(
                tx,
                TransactionKind::Redeem,
                500_000,
                mined(false, 90_000, Some("Fee exceeded provided maximum")),
                &markers()
            ),
            TxOutcome::Failed(FailureReason::Reverted {
                message: Some("Fee exceeded provided maximum".to_string())
            })
        );
    }

    #[test]
    fn classifies_replacements() {
        let replacement = hash("replacement");

        assert_eq!(
            classify_receipt(
                hash("tx"),
                TransactionKind::Redeem,
                500_000,
                RawReceipt::Replaced {
                    kind: ReplacementKind::Cancelled,
                    replacement,
                },
                &markers()
            ),
            TxOutcome::ReplacedOrCancelled {
                kind: ReplacementKind::Cancelled,
                replacement,
            }
        );
    }
}
