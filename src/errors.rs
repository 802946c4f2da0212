//! # Planner errors
//! Failures raised while planning, split by whether a retry with the same inputs can help.

use crate::registry::RegistryError;
use scrypto::prelude::*;
use thiserror::Error;

/// A guard that stopped a plan before anything reached the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreflightRejection {
    /// The position produced by the operation carries less debt than the protocol accepts.
    #[error("position debt {debt} is below the minimum debt of {minimum}")]
    DebtBelowMinimum { debt: Decimal, minimum: Decimal },
    /// The position would drop below the debt floor if the transaction is mined after the fee decayed.
    #[error(
        "position debt might fall to {decayed_debt}, below the minimum debt of {minimum}, within {tolerance_minutes} minutes"
    )]
    DecayedDebtBelowMinimum {
        decayed_debt: Decimal,
        minimum: Decimal,
        tolerance_minutes: u64,
    },
    /// The continuation of a redemption plan that was not truncated was requested.
    #[error("redemption of {amount} was not truncated and has no continuation")]
    NoContinuation { amount: Decimal },
    /// An adjustment that changes neither collateral nor debt.
    #[error("adjustment changes nothing")]
    EmptyAdjustment,
    /// A parameter that cannot be planned with.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Everything that can go wrong while planning or sending.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// A guard rejected the plan. Change the parameters before trying again.
    #[error("preflight rejected: {0}")]
    PreflightRejected(#[from] PreflightRejection),
    /// The requested redemption rounds down to nothing.
    #[error("amount {attempted} too low to redeem (try at least {minimum_net_debt})")]
    AmountTooLowToRedeem {
        attempted: Decimal,
        minimum_net_debt: Decimal,
    },
    /// Registry or fee state could not be read. Safe to retry unchanged.
    #[error("transient read failure: {0}")]
    TransientReadFailure(RegistryError),
    /// The remote side answered but refused the call, e.g. a gas estimate that reverts.
    #[error("remote call rejected: {0}")]
    RemoteRejected(RegistryError),
    /// The broadcaster refused to send the transaction.
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    /// A sent transaction was repriced more often than the envelope follows.
    #[error("stopped following repriced transaction at {last} after {hops} hops")]
    RepriceChainTooLong { last: Hash, hops: usize },
}

impl PlannerError {
    /// Whether repeating the same call with the same inputs may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlannerError::TransientReadFailure(_))
    }
}

impl From<RegistryError> for PlannerError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Unavailable { .. } => PlannerError::TransientReadFailure(error),
            RegistryError::Rejected { .. } => PlannerError::RemoteRejected(error),
        }
    }
}
