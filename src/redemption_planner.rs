//! # Redemption planner
//! Plans redemptions against the riskiest positions of the sorted registry.
//!
//! ## Overview
//! A redemption walks the list from its riskiest end and retires debt position by position. The
//! last position touched may only be redeemed partially if what remains is at least the minimum
//! net debt; the ledger's redemption hint query therefore returns the part of a requested amount
//! that can actually be redeemed. A plan for less than requested is *truncated* and carries a
//! continuation: the next amount above the redeemable one that retires the partial position
//! completely (`redeemable + minimum_net_debt`).
//!
//! Plans are immutable values. Following a continuation produces a new plan through
//! `RedemptionPlanner::advance`; the old plan stays as it was.

use crate::errors::*;
use crate::fee_decay::*;
use crate::hint_resolver::HintResolver;
use crate::parameters::PlannerParameters;
use crate::registry::*;
use crate::shared_structs::*;
use scrypto::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

/// Where a truncated redemption can continue.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct Continuation {
    /// Amount the next plan attempts. Always above the amount attempted by the current plan.
    pub next_amount: Decimal,
    /// Rate cap the caller set explicitly on the current plan, carried forward unless replaced.
    pub max_redemption_rate: Option<Decimal>,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub enum RedemptionStatus {
    /// The whole attempted amount is redeemable.
    Final,
    /// Only part of the attempted amount is redeemable.
    Truncated { continuation: Continuation },
}

/// A fully specified redemption.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct RedemptionPlan {
    attempted_amount: Decimal,
    redeemable_amount: Decimal,
    first_hint: Option<EntryId>,
    partial_hints: NeighborPair,
    partial_ratio: Decimal,
    max_iterations: u64,
    max_redemption_rate: Decimal,
    gas_limit: u64,
    status: RedemptionStatus,
}

impl RedemptionPlan {
    /// Amount the caller asked to redeem.
    pub fn attempted_amount(&self) -> Decimal {
        self.attempted_amount
    }

    /// Amount the transaction will redeem.
    pub fn redeemable_amount(&self) -> Decimal {
        self.redeemable_amount
    }

    pub fn is_truncated(&self) -> bool {
        self.redeemable_amount < self.attempted_amount
    }

    pub fn first_hint(&self) -> Option<&EntryId> {
        self.first_hint.as_ref()
    }

    /// Exact neighbors of the partially redeemed position. `(None, None)` without a partial redemption.
    pub fn partial_hints(&self) -> &NeighborPair {
        &self.partial_hints
    }

    pub fn partial_ratio(&self) -> Decimal {
        self.partial_ratio
    }

    pub fn max_iterations(&self) -> u64 {
        self.max_iterations
    }

    pub fn max_redemption_rate(&self) -> Decimal {
        self.max_redemption_rate
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn status(&self) -> &RedemptionStatus {
        &self.status
    }

    /// The continuation of a truncated plan.
    ///
    /// # Errors
    /// * `PreflightRejected(NoContinuation)` if the plan is not truncated. Callers must check
    ///   `is_truncated` first; this is reported rather than ignored.
    pub fn continuation(&self) -> Result<&Continuation, PlannerError> {
        match &self.status {
            RedemptionStatus::Truncated { continuation } => Ok(continuation),
            RedemptionStatus::Final => Err(PreflightRejection::NoContinuation {
                amount: self.attempted_amount,
            }
            .into()),
        }
    }

    /// The ledger call as it will be broadcast.
    pub fn request(&self) -> TransactionRequest {
        let (partial_upper_hint, partial_lower_hint) = self.partial_hints.call_hints();
        TransactionRequest::Redeem {
            amount: self.redeemable_amount,
            first_hint: self.first_hint.clone(),
            partial_upper_hint,
            partial_lower_hint,
            partial_ratio: self.partial_ratio,
            max_iterations: self.max_iterations,
            max_redemption_rate: self.max_redemption_rate,
        }
    }
}

/// Plans redemptions and follows their continuations.
pub struct RedemptionPlanner<R: RegistryClient + ?Sized, G: GasEstimator + ?Sized> {
    registry: Arc<R>,
    gas: Arc<G>,
    resolver: HintResolver<R>,
    fees: FeeDecayModel,
    parameters: PlannerParameters,
}

impl<R: RegistryClient + ?Sized, G: GasEstimator + ?Sized> RedemptionPlanner<R, G> {
    pub fn new(registry: Arc<R>, gas: Arc<G>, parameters: PlannerParameters) -> Self {
        Self {
            resolver: HintResolver::new(registry.clone(), parameters),
            registry,
            gas,
            fees: FeeDecayModel::new(parameters),
            parameters,
        }
    }

    /// Plans a redemption of `amount` touching at most `redemption_max_iterations` positions.
    pub async fn plan_redemption(
        &self,
        amount: Decimal,
        max_redemption_rate: Option<Decimal>,
    ) -> Result<RedemptionPlan, PlannerError> {
        self.plan_redemption_with_iterations(
            amount,
            max_redemption_rate,
            self.parameters.redemption_max_iterations,
        )
        .await
    }

    /// Plans a redemption of `amount`.
    ///
    /// # Arguments
    /// * `amount`: The amount of debt to redeem.
    /// * `max_redemption_rate`: Highest redemption rate the caller accepts. Defaults to the
    ///   current rate for the redeemable amount plus `redemption_rate_slippage_tolerance`, capped at 1.
    /// * `max_iterations`: Positions the redemption may touch.
    ///
    /// # Returns
    /// * `RedemptionPlan`, truncated with a continuation if less than `amount` is redeemable.
    ///
    /// # Logic
    /// 1. **Read state:** price, total debt, fee state and latest block time.
    /// 2. **Redemption hints:** asks the ledger how much of `amount` is redeemable and where to start.
    /// 3. **Partial hints:** resolves the neighbors of the partially redeemed position when there is one.
    /// 4. **Rate cap:** defaults the maximum redemption rate.
    /// 5. **Gas:** quotes the redemption and adds the base rate allowance.
    /// 6. **Continuation:** attaches `redeemable + minimum_net_debt` to a truncated plan.
    ///
    /// # Errors
    /// * `AmountTooLowToRedeem` if nothing is redeemable. Raised before any gas quote.
    /// * `TransientReadFailure` if a registry read fails.
    pub async fn plan_redemption_with_iterations(
        &self,
        amount: Decimal,
        max_redemption_rate: Option<Decimal>,
        max_iterations: u64,
    ) -> Result<RedemptionPlan, PlannerError> {
        if amount <= Decimal::ZERO {
            return Err(self.too_low(amount));
        }
        if let Some(rate) = max_redemption_rate {
            if rate.is_negative() || rate > Decimal::ONE {
                return Err(PreflightRejection::InvalidParameter {
                    name: "max_redemption_rate",
                    reason: "must lie between 0 and 1".to_string(),
                }
                .into());
            }
        }

        let price = self.registry.price().await?;
        let total_debt = self.registry.total_debt().await?;
        let fee_state = self.registry.fee_state().await?;
        let now = self.registry.latest_block_time().await?;

        let hints = self
            .registry
            .redemption_hints(amount, price, max_iterations)
            .await?;
        let redeemable_amount = hints.redeemable_amount.min(amount);
        if redeemable_amount <= Decimal::ZERO {
            return Err(self.too_low(amount));
        }

        let partial_hints = if hints.partial_ratio.is_zero() {
            NeighborPair::NONE
        } else {
            self.resolver
                .resolve_hints(NominalRatio::Finite(hints.partial_ratio), None)
                .await?
        };

        let max_rate = max_redemption_rate.unwrap_or_else(|| {
            let redeemed_fraction = if total_debt.is_positive() {
                redeemable_amount / total_debt
            } else {
                Decimal::ONE
            };
            (self.fees.redemption_rate(&fee_state, redeemed_fraction, now)
                + self.parameters.redemption_rate_slippage_tolerance)
                .min(Decimal::ONE)
        });

        let status = if redeemable_amount < amount {
            let continuation = Continuation {
                next_amount: self.next_amount(redeemable_amount, amount),
                max_redemption_rate,
            };
            warn!(
                attempted = %amount,
                redeemable = %redeemable_amount,
                next = %continuation.next_amount,
                "redemption truncated"
            );
            RedemptionStatus::Truncated { continuation }
        } else {
            RedemptionStatus::Final
        };

        let mut plan = RedemptionPlan {
            attempted_amount: amount,
            redeemable_amount,
            first_hint: hints.first_hint,
            partial_hints,
            partial_ratio: hints.partial_ratio,
            max_iterations,
            max_redemption_rate: max_rate,
            gas_limit: 0,
            status,
        };

        let gas_estimate = self.gas.estimate_gas(&plan.request()).await?;
        plan.gas_limit = gas_estimate.saturating_add(
            self.parameters
                .base_rate_update_gas_for(self.parameters.default_decay_tolerance_minutes),
        );

        info!(
            attempted = %plan.attempted_amount,
            redeemable = %plan.redeemable_amount,
            max_redemption_rate = %plan.max_redemption_rate,
            gas_limit = plan.gas_limit,
            "planned redemption"
        );

        Ok(plan)
    }

    /// Plans the continuation of a truncated plan.
    ///
    /// # Arguments
    /// * `plan`: A truncated plan.
    /// * `new_max_redemption_rate`: Replaces the rate cap. Without it, an explicit cap on `plan`
    ///   is kept and a defaulted one is recomputed.
    ///
    /// # Errors
    /// * `PreflightRejected(NoContinuation)` if `plan` is not truncated, before any remote call.
    pub async fn advance(
        &self,
        plan: &RedemptionPlan,
        new_max_redemption_rate: Option<Decimal>,
    ) -> Result<RedemptionPlan, PlannerError> {
        let continuation = plan.continuation()?;
        let max_redemption_rate = new_max_redemption_rate.or(continuation.max_redemption_rate);

        self.plan_redemption_with_iterations(
            continuation.next_amount,
            max_redemption_rate,
            plan.max_iterations,
        )
        .await
    }

    /// `redeemable + minimum_net_debt`, moved past `attempted` when the truncation came from the
    /// iteration cap or the end of the list rather than the debt floor.
    fn next_amount(&self, redeemable: Decimal, attempted: Decimal) -> Decimal {
        let next = redeemable + self.parameters.minimum_net_debt;
        if next > attempted {
            next
        } else {
            attempted + self.parameters.minimum_net_debt
        }
    }

    fn too_low(&self, attempted: Decimal) -> PlannerError {
        PlannerError::AmountTooLowToRedeem {
            attempted,
            minimum_net_debt: self.parameters.minimum_net_debt,
        }
    }
}
