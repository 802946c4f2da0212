//! # Planner Parameters
//! Protocol constants consulted by the fee model, the hint resolver and both planners.
//!
//! A single `PlannerParameters` value is handed to every component at construction. Nothing in
//! the crate reads a global, so tests can run side by side with different curves and floors.

use crate::errors::*;
use scrypto::prelude::*;
use scrypto_math::*;

/// Protocol parameters for planning against a sorted CDP registry.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannerParameters {
    /// Factor the base rate is multiplied by for every full minute without a fee reset (value < 1).
    pub decay_factor_per_minute: Decimal,
    /// Fee floor added on top of the decayed base rate when borrowing.
    pub minimum_borrowing_rate: Decimal,
    /// Cap on the borrowing rate.
    pub maximum_borrowing_rate: Decimal,
    /// Fee floor added on top of the decayed base rate when redeeming.
    pub minimum_redemption_rate: Decimal,
    /// The redeemed fraction of total debt is divided by this before it is added to the redemption rate.
    pub redemption_beta: Decimal,
    /// Debt added to every position on opening and refunded on close. Not part of net debt.
    pub liquidation_reserve: Decimal,
    /// Smallest net debt a position may be left with.
    pub minimum_net_debt: Decimal,
    /// Largest number of trials sent in a single approximate hint call.
    pub max_trials_per_call: u64,
    /// Total trials are `trial_multiplier * sqrt(registry length)`, rounded up.
    pub trial_multiplier: u64,
    /// Added to the current borrowing rate when the caller does not cap it.
    pub borrowing_rate_slippage_tolerance: Decimal,
    /// Added to the current redemption rate when the caller does not cap it.
    pub redemption_rate_slippage_tolerance: Decimal,
    /// Minutes of fee decay a planned operation is sized for when the caller does not say.
    pub default_decay_tolerance_minutes: u64,
    /// Positions a redemption may touch.
    pub redemption_max_iterations: u64,
    /// Extra gas for the list walking a few hops further than estimated.
    pub list_traversal_gas: u64,
    /// Fixed part of the gas spent updating the base rate bookkeeping.
    pub base_rate_update_gas: u64,
    /// Gas per decay squaring step when updating the base rate.
    pub base_rate_update_gas_per_step: u64,
}

impl Default for PlannerParameters {
    fn default() -> Self {
        Self {
            decay_factor_per_minute: dec!("0.999037758833783"),
            minimum_borrowing_rate: dec!("0.005"),
            maximum_borrowing_rate: dec!("0.05"),
            minimum_redemption_rate: dec!("0.005"),
            redemption_beta: dec!(2),
            liquidation_reserve: dec!(200),
            minimum_net_debt: dec!(1800),
            max_trials_per_call: 2500,
            trial_multiplier: 10,
            borrowing_rate_slippage_tolerance: dec!("0.005"),
            redemption_rate_slippage_tolerance: dec!("0.001"),
            default_decay_tolerance_minutes: 10,
            redemption_max_iterations: 70,
            list_traversal_gas: 80_000,
            base_rate_update_gas: 10_000,
            base_rate_update_gas_per_step: 1_414,
        }
    }
}

impl PlannerParameters {
    /// Default parameters with the decay factor derived from a half-life.
    ///
    /// # Arguments
    /// * `half_life_minutes`: Minutes after which an untouched base rate has halved.
    ///
    /// # Returns
    /// * `PlannerParameters` with `decay_factor_per_minute = 0.5 ^ (1 / half_life_minutes)`.
    ///
    /// # Errors
    /// * `PreflightRejected(InvalidParameter)` if the half-life is zero or the power cannot be computed.
    pub fn with_half_life(half_life_minutes: u64) -> Result<Self, PlannerError> {
        if half_life_minutes == 0 {
            return Err(PreflightRejection::InvalidParameter {
                name: "half_life_minutes",
                reason: "must be at least one minute".to_string(),
            }
            .into());
        }

        let exponent = Decimal::ONE / Decimal::from(half_life_minutes);
        let decay_factor_per_minute = dec!("0.5").pow(exponent).ok_or_else(|| {
            PlannerError::from(PreflightRejection::InvalidParameter {
                name: "half_life_minutes",
                reason: "decay factor out of range".to_string(),
            })
        })?;

        let parameters = Self {
            decay_factor_per_minute,
            ..Self::default()
        };
        parameters.validate()?;

        Ok(parameters)
    }

    /// Smallest total debt a position may carry: reserve plus minimum net debt.
    pub fn minimum_debt(&self) -> Decimal {
        self.liquidation_reserve + self.minimum_net_debt
    }

    /// Gas needed to update the base rate after up to `minutes` without an update.
    ///
    /// The ledger decays by repeated squaring, so the cost grows with `ceil(log2(minutes + 1))`.
    pub fn base_rate_update_gas_for(&self, minutes: u64) -> u64 {
        let steps = ceil_log2(minutes.saturating_add(1));
        self.base_rate_update_gas
            .saturating_add(self.base_rate_update_gas_per_step.saturating_mul(steps))
    }

    /// Rejects parameter sets that would make the fee model or the sampler misbehave.
    pub fn validate(&self) -> Result<(), PlannerError> {
        let invalid = |name: &'static str, reason: &str| -> Result<(), PlannerError> {
            Err(PreflightRejection::InvalidParameter {
                name,
                reason: reason.to_string(),
            }
            .into())
        };

        if self.decay_factor_per_minute <= Decimal::ZERO
            || self.decay_factor_per_minute >= Decimal::ONE
        {
            return invalid("decay_factor_per_minute", "must lie strictly between 0 and 1");
        }
        if self.max_trials_per_call == 0 {
            return invalid("max_trials_per_call", "must be positive");
        }
        if self.trial_multiplier == 0 {
            return invalid("trial_multiplier", "must be positive");
        }
        if self.minimum_borrowing_rate.is_negative()
            || self.minimum_redemption_rate.is_negative()
            || self.maximum_borrowing_rate < self.minimum_borrowing_rate
        {
            return invalid("fees", "minimum fees must be non-negative and below the maximum");
        }
        if self.redemption_beta <= Decimal::ZERO {
            return invalid("redemption_beta", "must be positive");
        }
        if self.liquidation_reserve.is_negative() {
            return invalid("liquidation_reserve", "must be non-negative");
        }
        if self.minimum_net_debt <= Decimal::ZERO {
            return invalid("minimum_net_debt", "must be positive");
        }

        Ok(())
    }
}

fn ceil_log2(value: u64) -> u64 {
    if value <= 1 {
        0
    } else {
        (u64::BITS - (value - 1).leading_zeros()) as u64
    }
}
