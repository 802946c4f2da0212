//! # Registry client
//! The read-only surface of the remote sorted registry and the gas estimator the planners consult.
//!
//! Both are external collaborators. Every method is an await point: planners hold no state across
//! these calls and re-read everything for each plan.

use crate::shared_structs::*;
use async_trait::async_trait;
use scrypto::prelude::*;
use thiserror::Error;

/// Failure of a remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The call did not reach the ledger or timed out.
    #[error("`{call}` unavailable: {message}")]
    Unavailable { call: &'static str, message: String },
    /// The ledger answered with a refusal, e.g. a reverting gas estimate.
    #[error("`{call}` rejected: {message}")]
    Rejected { call: &'static str, message: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result of one approximate hint call.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct ApproxHint {
    /// Seed to pass to the next call so batches keep sampling new entries.
    pub next_seed: u64,
    /// The sampled entry closest to the target ratio.
    pub candidate: EntryId,
    /// Absolute difference between the candidate's ratio and the target ratio.
    pub distance: Decimal,
}

/// Result of the ledger's redemption hint query.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct RedemptionHints {
    /// Part of the requested amount that can be redeemed without leaving a position under the debt floor.
    pub redeemable_amount: Decimal,
    /// First position the redemption touches.
    pub first_hint: Option<EntryId>,
    /// Ratio of the partially redeemed position afterwards. Zero when no position is redeemed partially.
    pub partial_ratio: Decimal,
}

/// Read access to the sorted registry, its aggregates and the fee bookkeeping.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Number of entries in the list.
    async fn length(&self) -> RegistryResult<u64>;

    /// Head of the list (highest ratio).
    async fn first(&self) -> RegistryResult<Option<EntryId>>;

    /// Entry after `id`, towards lower ratios.
    async fn next(&self, id: &EntryId) -> RegistryResult<Option<EntryId>>;

    /// Entry before `id`, towards higher ratios.
    async fn prev(&self, id: &EntryId) -> RegistryResult<Option<EntryId>>;

    /// Samples `trials` entries from `seed` and reports the one closest to `target`.
    async fn approximate_hint(
        &self,
        target: Decimal,
        trials: u64,
        seed: u64,
    ) -> RegistryResult<ApproxHint>;

    /// Exact neighbors of `target`, walking from the given hints.
    async fn find_insertion_position(
        &self,
        target: Decimal,
        prev_hint: Option<&EntryId>,
        next_hint: Option<&EntryId>,
    ) -> RegistryResult<NeighborPair>;

    /// How much of `amount` can be redeemed at `price` within `max_iterations` positions.
    async fn redemption_hints(
        &self,
        amount: Decimal,
        price: Decimal,
        max_iterations: u64,
    ) -> RegistryResult<RedemptionHints>;

    /// Current collateral price.
    async fn price(&self) -> RegistryResult<Decimal>;

    /// Total debt across all positions.
    async fn total_debt(&self) -> RegistryResult<Decimal>;

    async fn fee_state(&self) -> RegistryResult<FeeState>;

    /// Timestamp of the latest block, the "now" of every plan.
    async fn latest_block_time(&self) -> RegistryResult<Instant>;
}

/// Quotes the gas a fully specified transaction would use if mined now.
#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate_gas(&self, request: &TransactionRequest) -> RegistryResult<u64>;
}
