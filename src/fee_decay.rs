//! # Fee decay model
//! Pure view of the protocol fee curve.
//!
//! The ledger multiplies the base rate by `decay_factor_per_minute` for every full minute since
//! the last fee reset. Resets happen on the ledger (redemptions, fee-paying borrows); this model
//! only reflects a `FeeState` snapshot and never initiates one.

use crate::parameters::PlannerParameters;
use crate::shared_structs::*;
use scrypto::prelude::*;

/// Fee curve evaluated against a `FeeState` snapshot.
#[derive(Clone, Copy, Debug)]
pub struct FeeDecayModel {
    parameters: PlannerParameters,
}

impl FeeDecayModel {
    pub fn new(parameters: PlannerParameters) -> Self {
        Self { parameters }
    }

    /// Whole minutes between the last fee reset and `at`. Times before the reset count as zero.
    pub fn minutes_elapsed(&self, fee_state: &FeeState, at: Instant) -> i64 {
        let seconds = at.seconds_since_unix_epoch - fee_state.last_update.seconds_since_unix_epoch;
        seconds.max(0) / 60
    }

    /// The base rate after decay at time `at`.
    ///
    /// Total and non-increasing in `at`: a factor below one raised to more minutes never grows,
    /// and a power that underflows reads as zero.
    pub fn effective_base_rate(&self, fee_state: &FeeState, at: Instant) -> Decimal {
        let minutes = self.minutes_elapsed(fee_state, at);
        let decay = self
            .parameters
            .decay_factor_per_minute
            .checked_powi(minutes)
            .unwrap_or(Decimal::ZERO);

        (fee_state.base_rate * decay).max(Decimal::ZERO)
    }

    /// Fee rate charged on borrowed amounts at time `at`. Zero in the emergency regime.
    pub fn borrowing_rate(&self, fee_state: &FeeState, at: Instant) -> Decimal {
        if fee_state.is_emergency_regime {
            return Decimal::ZERO;
        }

        (self.parameters.minimum_borrowing_rate + self.effective_base_rate(fee_state, at))
            .min(self.parameters.maximum_borrowing_rate)
    }

    /// Fee rate charged on a redemption of `redeemed_fraction` of the total debt at time `at`.
    pub fn redemption_rate(
        &self,
        fee_state: &FeeState,
        redeemed_fraction: Decimal,
        at: Instant,
    ) -> Decimal {
        (self.parameters.minimum_redemption_rate
            + self.effective_base_rate(fee_state, at)
            + redeemed_fraction / self.parameters.redemption_beta)
            .min(Decimal::ONE)
    }
}

/// `at` moved `minutes` into the future.
pub fn project(at: Instant, minutes: u64) -> Instant {
    let seconds = i64::try_from(minutes.saturating_mul(60)).unwrap_or(i64::MAX);
    Instant::new(at.seconds_since_unix_epoch.saturating_add(seconds))
}
