//! # Operation planner
//! Builds ready-to-send open and adjust operations for a position in the sorted registry.
//!
//! ## Overview
//! A borrow pays a fee at whatever rate applies when the transaction is mined, not when it is
//! planned. The base rate decays every minute, so a transaction that waits in the mempool lands
//! with less debt, at a different ratio, and possibly a few list hops away from the planned
//! neighbors. The planner sizes every operation for both ends of a tolerance window:
//! - **Hints** are resolved for the position as priced now.
//! - **Guards** reject the operation if the position, priced now or after the full decay window,
//!   would carry less than the minimum debt. The ledger would accept such a transaction and
//!   leave the position invalid, so it never leaves the client.
//! - **Gas** is quoted twice, once as priced now and once with the borrow amount that reproduces
//!   the decayed position. The limit covers the larger of the two plus allowances for extra list
//!   hops and, for borrows, the base rate bookkeeping.
//!
//! Planning only reads. Each call re-reads the fee state and the latest block time.

use crate::errors::*;
use crate::fee_decay::*;
use crate::hint_resolver::HintResolver;
use crate::parameters::PlannerParameters;
use crate::registry::*;
use crate::shared_structs::*;
use scrypto::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a planned operation does to the registry.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Open,
    Adjust,
}

/// Caller overrides for a single plan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlanOverrides {
    /// Fixed gas limit. Skips both gas quotes; the headroom is then zero.
    pub gas_limit: Option<u64>,
    /// Initial seed for hint sampling. Random when absent.
    pub hint_seed: Option<u64>,
}

/// A fully specified open or adjust operation. Built once, handed to the envelope once.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct PlannedOperation {
    kind: OperationKind,
    request: TransactionRequest,
    position: Position,
    hints: NeighborPair,
    borrowing_rate: Decimal,
    decay_tolerance_minutes: u64,
    gas_limit: u64,
    gas_headroom: u64,
}

impl PlannedOperation {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The ledger call as it will be broadcast.
    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    /// The position the operation produces if mined right away.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Exact neighbors of `position`, before sentinel substitution.
    pub fn hints(&self) -> &NeighborPair {
        &self.hints
    }

    /// Borrowing rate at planning time.
    pub fn borrowing_rate(&self) -> Decimal {
        self.borrowing_rate
    }

    pub fn decay_tolerance_minutes(&self) -> u64 {
        self.decay_tolerance_minutes
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Gas added on top of the quote for the operation as priced now.
    pub fn gas_headroom(&self) -> u64 {
        self.gas_headroom
    }
}

/// Plans open and adjust operations.
pub struct OperationPlanner<R: RegistryClient + ?Sized, G: GasEstimator + ?Sized> {
    registry: Arc<R>,
    gas: Arc<G>,
    resolver: HintResolver<R>,
    fees: FeeDecayModel,
    parameters: PlannerParameters,
}

impl<R: RegistryClient + ?Sized, G: GasEstimator + ?Sized> OperationPlanner<R, G> {
    pub fn new(registry: Arc<R>, gas: Arc<G>, parameters: PlannerParameters) -> Self {
        Self {
            resolver: HintResolver::new(registry.clone(), parameters),
            registry,
            gas,
            fees: FeeDecayModel::new(parameters),
            parameters,
        }
    }

    pub async fn plan_open(
        &self,
        params: &OpenParams,
        tolerance_minutes: Option<u64>,
    ) -> Result<PlannedOperation, PlannerError> {
        self.plan_open_with(params, tolerance_minutes, PlanOverrides::default())
            .await
    }

    /// Plans opening a new position.
    ///
    /// # Arguments
    /// * `params`: Collateral to deposit, amount to borrow and an optional borrowing rate cap.
    /// * `tolerance_minutes`: Minutes of fee decay the operation must survive unconfirmed.
    ///   Defaults to `default_decay_tolerance_minutes`.
    /// * `overrides`: Optional fixed gas limit and hint seed.
    ///
    /// # Returns
    /// * `PlannedOperation` carrying the open request, its hints and the gas limit.
    ///
    /// # Logic
    /// 1. **Read state:** fee state and latest block time; computes the current borrowing rate.
    /// 2. **Price now:** derives the resulting position and rejects it below the minimum debt.
    /// 3. **Price after decay:** derives the position the same borrow produces once the rate has
    ///    decayed for `tolerance_minutes` and rejects it below the minimum debt. The borrow amount
    ///    that reproduces it at the current rate is kept for the second gas quote.
    /// 4. **Hints:** resolves the neighbors of the position as priced now.
    /// 5. **Gas:** quotes both cases and adds the traversal and base rate allowances.
    ///
    /// # Errors
    /// * `PreflightRejected` for invalid amounts or a (decayed) debt below the floor. Raised before
    ///   any gas quote.
    /// * `TransientReadFailure` if a registry read fails.
    pub async fn plan_open_with(
        &self,
        params: &OpenParams,
        tolerance_minutes: Option<u64>,
        overrides: PlanOverrides,
    ) -> Result<PlannedOperation, PlannerError> {
        if params.deposit_collateral.is_negative() || params.borrow_amount.is_negative() {
            return Err(PreflightRejection::InvalidParameter {
                name: "open_params",
                reason: "amounts must be non-negative".to_string(),
            }
            .into());
        }

        let tolerance =
            tolerance_minutes.unwrap_or(self.parameters.default_decay_tolerance_minutes);
        let fee_state = self.registry.fee_state().await?;
        let now = self.registry.latest_block_time().await?;

        let current_rate = self.fees.borrowing_rate(&fee_state, now);
        let decayed_rate = self.fees.borrowing_rate(&fee_state, project(now, tolerance));
        let reserve = self.parameters.liquidation_reserve;

        let position = Position::create(params, current_rate, reserve);
        self.check_minimum_debt(&position)?;

        let decayed_position = Position::create(params, decayed_rate, reserve);
        self.check_decayed_minimum_debt(&decayed_position, tolerance)?;
        let simulated_params = decayed_position.recreate(current_rate, reserve);

        let hints = self
            .resolve(position.nominal_ratio(), None, overrides.hint_seed)
            .await?;

        let max_borrowing_rate = params
            .max_borrowing_rate
            .unwrap_or_else(|| self.default_max_borrowing_rate(current_rate));
        let request = TransactionRequest::open(params, max_borrowing_rate, &hints);
        let simulated_request =
            TransactionRequest::open(&simulated_params, max_borrowing_rate, &hints);

        let (gas_limit, gas_headroom) = self
            .size_gas(&request, &simulated_request, true, tolerance, &overrides)
            .await?;

        info!(
            kind = "open",
            ratio = %position.nominal_ratio(),
            borrowing_rate = %current_rate,
            gas_limit,
            gas_headroom,
            "planned operation"
        );

        Ok(PlannedOperation {
            kind: OperationKind::Open,
            request,
            position,
            hints,
            borrowing_rate: current_rate,
            decay_tolerance_minutes: tolerance,
            gas_limit,
            gas_headroom,
        })
    }

    pub async fn plan_adjust(
        &self,
        cdp_id: &EntryId,
        current: &Position,
        change: &PositionAdjustment,
        tolerance_minutes: Option<u64>,
    ) -> Result<PlannedOperation, PlannerError> {
        self.plan_adjust_with(cdp_id, current, change, tolerance_minutes, PlanOverrides::default())
            .await
    }

    /// Plans a change to an existing position.
    ///
    /// # Arguments
    /// * `cdp_id`: The registry entry of the position. Excluded from its own hints.
    /// * `current`: The position as it is now.
    /// * `change`: Collateral and debt changes plus an optional borrowing rate cap.
    /// * `tolerance_minutes`: Minutes of fee decay the operation must survive unconfirmed.
    /// * `overrides`: Optional fixed gas limit and hint seed.
    ///
    /// # Returns
    /// * `PlannedOperation` carrying the adjust request, its hints and the gas limit.
    ///
    /// # Logic
    /// Same as `plan_open_with`, except that only a borrowing adjustment is exposed to fee decay:
    /// deposits, withdrawals and repayments cost the same whenever they are mined, so their second
    /// quote uses the unchanged request and no base rate allowance is added.
    ///
    /// # Errors
    /// * `PreflightRejected` for an empty adjustment, withdrawals or repayments larger than the
    ///   position, or a (decayed) debt below the floor.
    /// * `TransientReadFailure` if a registry read fails.
    pub async fn plan_adjust_with(
        &self,
        cdp_id: &EntryId,
        current: &Position,
        change: &PositionAdjustment,
        tolerance_minutes: Option<u64>,
        overrides: PlanOverrides,
    ) -> Result<PlannedOperation, PlannerError> {
        self.check_adjustment(current, change)?;

        let tolerance =
            tolerance_minutes.unwrap_or(self.parameters.default_decay_tolerance_minutes);
        let fee_state = self.registry.fee_state().await?;
        let now = self.registry.latest_block_time().await?;

        let current_rate = self.fees.borrowing_rate(&fee_state, now);
        let position = current.adjust(change, current_rate);
        self.check_minimum_debt(&position)?;

        let simulated_change = if change.borrows() {
            let decayed_rate = self.fees.borrowing_rate(&fee_state, project(now, tolerance));
            let decayed_position = current.adjust(change, decayed_rate);
            self.check_decayed_minimum_debt(&decayed_position, tolerance)?;

            PositionAdjustment {
                max_borrowing_rate: change.max_borrowing_rate,
                ..current.adjust_to(&decayed_position, current_rate)
            }
        } else {
            change.clone()
        };

        let hints = self
            .resolve(position.nominal_ratio(), Some(cdp_id), overrides.hint_seed)
            .await?;

        let max_borrowing_rate = change
            .max_borrowing_rate
            .unwrap_or_else(|| self.default_max_borrowing_rate(current_rate));
        let request = TransactionRequest::adjust(cdp_id, change, max_borrowing_rate, &hints);
        let simulated_request =
            TransactionRequest::adjust(cdp_id, &simulated_change, max_borrowing_rate, &hints);

        let (gas_limit, gas_headroom) = self
            .size_gas(
                &request,
                &simulated_request,
                change.borrows(),
                tolerance,
                &overrides,
            )
            .await?;

        info!(
            kind = "adjust",
            cdp = ?cdp_id,
            ratio = %position.nominal_ratio(),
            borrowing_rate = %current_rate,
            gas_limit,
            gas_headroom,
            "planned operation"
        );

        Ok(PlannedOperation {
            kind: OperationKind::Adjust,
            request,
            position,
            hints,
            borrowing_rate: current_rate,
            decay_tolerance_minutes: tolerance,
            gas_limit,
            gas_headroom,
        })
    }

    /// Quotes the current and the decayed request and returns `(gas_limit, headroom)`.
    ///
    /// `gas_limit = max(now + list_traversal_gas, later)`, plus the base rate allowance when the
    /// operation borrows. The limit never drops below the current quote.
    async fn size_gas(
        &self,
        request: &TransactionRequest,
        simulated_request: &TransactionRequest,
        borrows: bool,
        tolerance_minutes: u64,
        overrides: &PlanOverrides,
    ) -> Result<(u64, u64), PlannerError> {
        if let Some(gas_limit) = overrides.gas_limit {
            return Ok((gas_limit, 0));
        }

        let gas_now = self.gas.estimate_gas(request).await?;
        let gas_later = self.gas.estimate_gas(simulated_request).await?;

        let mut gas_limit = gas_now
            .saturating_add(self.parameters.list_traversal_gas)
            .max(gas_later);
        if borrows {
            gas_limit = gas_limit
                .saturating_add(self.parameters.base_rate_update_gas_for(tolerance_minutes));
        }

        debug!(gas_now, gas_later, gas_limit, borrows, "sized gas");

        Ok((gas_limit, gas_limit - gas_now))
    }

    async fn resolve(
        &self,
        ratio: NominalRatio,
        exclude: Option<&EntryId>,
        seed: Option<u64>,
    ) -> Result<NeighborPair, PlannerError> {
        match seed {
            Some(seed) => {
                self.resolver
                    .resolve_hints_with_seed(ratio, exclude, seed)
                    .await
            }
            None => self.resolver.resolve_hints(ratio, exclude).await,
        }
    }

    fn default_max_borrowing_rate(&self, current_rate: Decimal) -> Decimal {
        (current_rate + self.parameters.borrowing_rate_slippage_tolerance)
            .min(self.parameters.maximum_borrowing_rate)
    }

    fn check_minimum_debt(&self, position: &Position) -> Result<(), PlannerError> {
        let minimum = self.parameters.minimum_debt();
        if position.debt < minimum {
            warn!(debt = %position.debt, minimum = %minimum, "debt below minimum");
            return Err(PreflightRejection::DebtBelowMinimum {
                debt: position.debt,
                minimum,
            }
            .into());
        }
        Ok(())
    }

    fn check_decayed_minimum_debt(
        &self,
        decayed_position: &Position,
        tolerance_minutes: u64,
    ) -> Result<(), PlannerError> {
        let minimum = self.parameters.minimum_debt();
        if decayed_position.debt < minimum {
            warn!(
                decayed_debt = %decayed_position.debt,
                minimum = %minimum,
                tolerance_minutes,
                "debt might fall below minimum before the transaction is mined"
            );
            return Err(PreflightRejection::DecayedDebtBelowMinimum {
                decayed_debt: decayed_position.debt,
                minimum,
                tolerance_minutes,
            }
            .into());
        }
        Ok(())
    }

    fn check_adjustment(
        &self,
        current: &Position,
        change: &PositionAdjustment,
    ) -> Result<(), PlannerError> {
        if change.is_empty() {
            return Err(PreflightRejection::EmptyAdjustment.into());
        }

        let invalid = |name: &'static str, reason: &str| -> Result<(), PlannerError> {
            Err(PreflightRejection::InvalidParameter {
                name,
                reason: reason.to_string(),
            }
            .into())
        };

        if change.deposit_collateral.is_negative()
            || change.withdraw_collateral.is_negative()
            || change.borrow_amount.is_negative()
            || change.repay_amount.is_negative()
        {
            return invalid("adjustment", "amounts must be non-negative");
        }
        if change.withdraw_collateral > current.collateral {
            return invalid("withdraw_collateral", "exceeds the position's collateral");
        }
        if change.repay_amount > current.net_debt(self.parameters.liquidation_reserve) {
            return invalid("repay_amount", "exceeds the position's net debt");
        }

        Ok(())
    }
}
