//! # Shared structs
//! Values passed between the hint resolver, the planners, the registry client and the envelope.

use scrypto::prelude::*;
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a registry entry: the local id of the CDP receipt.
pub type EntryId = NonFungibleLocalId;

/// Collateral divided by debt. The registry is sorted by this value, highest first.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NominalRatio {
    Finite(Decimal),
    /// Ratio of a position without debt. Sorts above every finite ratio.
    Infinite,
}

impl NominalRatio {
    /// Ratio of `collateral` to `debt`, `Infinite` when there is no debt.
    pub fn of(collateral: Decimal, debt: Decimal) -> Self {
        if debt.is_zero() {
            NominalRatio::Infinite
        } else {
            NominalRatio::Finite(collateral / debt)
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, NominalRatio::Infinite)
    }

    pub fn finite(&self) -> Option<Decimal> {
        match self {
            NominalRatio::Finite(ratio) => Some(*ratio),
            NominalRatio::Infinite => None,
        }
    }
}

impl Ord for NominalRatio {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (NominalRatio::Finite(a), NominalRatio::Finite(b)) => a.cmp(b),
            (NominalRatio::Finite(_), NominalRatio::Infinite) => Ordering::Less,
            (NominalRatio::Infinite, NominalRatio::Finite(_)) => Ordering::Greater,
            (NominalRatio::Infinite, NominalRatio::Infinite) => Ordering::Equal,
        }
    }
}

impl PartialOrd for NominalRatio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NominalRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NominalRatio::Finite(ratio) => write!(f, "{}", ratio),
            NominalRatio::Infinite => write!(f, "inf"),
        }
    }
}

/// Collateral and debt of a single position.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Position {
    /// Collateral held by the position.
    pub collateral: Decimal,
    /// Total debt, liquidation reserve included.
    pub debt: Decimal,
}

/// Parameters for opening a new position.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct OpenParams {
    /// Collateral to deposit.
    pub deposit_collateral: Decimal,
    /// Amount to borrow, before the borrowing fee is added.
    pub borrow_amount: Decimal,
    /// Highest borrowing rate the caller accepts. Defaulted from the current rate if absent.
    pub max_borrowing_rate: Option<Decimal>,
}

/// A change to an existing position. Fields not involved stay zero.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct PositionAdjustment {
    pub deposit_collateral: Decimal,
    pub withdraw_collateral: Decimal,
    /// Amount to borrow, before the borrowing fee is added.
    pub borrow_amount: Decimal,
    pub repay_amount: Decimal,
    /// Highest borrowing rate the caller accepts. Defaulted from the current rate if absent.
    pub max_borrowing_rate: Option<Decimal>,
}

impl PositionAdjustment {
    pub fn is_empty(&self) -> bool {
        self.deposit_collateral.is_zero()
            && self.withdraw_collateral.is_zero()
            && self.borrow_amount.is_zero()
            && self.repay_amount.is_zero()
    }

    /// Whether the adjustment mints new debt and therefore pays (and resets) the borrowing fee.
    pub fn borrows(&self) -> bool {
        self.borrow_amount > Decimal::ZERO
    }
}

impl Position {
    pub fn new(collateral: Decimal, debt: Decimal) -> Self {
        Self { collateral, debt }
    }

    pub fn nominal_ratio(&self) -> NominalRatio {
        NominalRatio::of(self.collateral, self.debt)
    }

    pub fn is_empty(&self) -> bool {
        self.collateral.is_zero() && self.debt.is_zero()
    }

    /// Debt without the liquidation reserve.
    pub fn net_debt(&self, liquidation_reserve: Decimal) -> Decimal {
        (self.debt - liquidation_reserve).max(Decimal::ZERO)
    }

    /// The position produced by opening with `params` while `borrowing_rate` applies.
    pub fn create(
        params: &OpenParams,
        borrowing_rate: Decimal,
        liquidation_reserve: Decimal,
    ) -> Self {
        Self {
            collateral: params.deposit_collateral,
            debt: liquidation_reserve + params.borrow_amount * (Decimal::ONE + borrowing_rate),
        }
    }

    /// The opening parameters that reproduce this position while `borrowing_rate` applies.
    pub fn recreate(&self, borrowing_rate: Decimal, liquidation_reserve: Decimal) -> OpenParams {
        OpenParams {
            deposit_collateral: self.collateral,
            borrow_amount: self.net_debt(liquidation_reserve) / (Decimal::ONE + borrowing_rate),
            max_borrowing_rate: None,
        }
    }

    /// The position after `change` is applied while `borrowing_rate` applies.
    ///
    /// The fee is only charged on borrowed amounts. Callers check that withdrawals and repayments
    /// fit the position beforehand.
    pub fn adjust(&self, change: &PositionAdjustment, borrowing_rate: Decimal) -> Self {
        Self {
            collateral: self.collateral + change.deposit_collateral - change.withdraw_collateral,
            debt: self.debt + change.borrow_amount * (Decimal::ONE + borrowing_rate)
                - change.repay_amount,
        }
    }

    /// The adjustment that turns this position into `target` while `borrowing_rate` applies.
    pub fn adjust_to(&self, target: &Position, borrowing_rate: Decimal) -> PositionAdjustment {
        let collateral_change = target.collateral - self.collateral;
        let debt_change = target.debt - self.debt;

        let mut change = PositionAdjustment::default();
        if collateral_change.is_positive() {
            change.deposit_collateral = collateral_change;
        } else if collateral_change.is_negative() {
            change.withdraw_collateral = -collateral_change;
        }
        if debt_change.is_positive() {
            change.borrow_amount = debt_change / (Decimal::ONE + borrowing_rate);
        } else if debt_change.is_negative() {
            change.repay_amount = -debt_change;
        }

        change
    }
}

/// The registry entries that bound a target ratio. `None` is the sentinel for a list end.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct NeighborPair {
    /// Entry with a ratio at or above the target.
    pub prev: Option<EntryId>,
    /// Entry with a ratio at or below the target.
    pub next: Option<EntryId>,
}

impl NeighborPair {
    pub const NONE: NeighborPair = NeighborPair {
        prev: None,
        next: None,
    };

    pub fn new(prev: Option<EntryId>, next: Option<EntryId>) -> Self {
        Self { prev, next }
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.prev.as_ref() == Some(id) || self.next.as_ref() == Some(id)
    }

    /// The `(upper, lower)` hints passed to the ledger.
    ///
    /// Starting a search from the sentinel makes the ledger walk from the list end, so a missing
    /// side borrows the other side's entry.
    pub fn call_hints(&self) -> (Option<EntryId>, Option<EntryId>) {
        match (&self.prev, &self.next) {
            (None, next) => (next.clone(), next.clone()),
            (prev, None) => (prev.clone(), prev.clone()),
            (prev, next) => (prev.clone(), next.clone()),
        }
    }
}

/// Fee bookkeeping read from the ledger before every plan.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct FeeState {
    /// Base rate as of `last_update`.
    pub base_rate: Decimal,
    /// Time of the last fee reset (a redemption or a fee-paying borrow).
    pub last_update: Instant,
    /// Whether the system runs in the emergency (recovery) regime, where borrowing is fee-free.
    pub is_emergency_regime: bool,
}

/// A fully specified ledger call, as estimated and as broadcast.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub enum TransactionRequest {
    OpenPosition {
        deposit_collateral: Decimal,
        borrow_amount: Decimal,
        max_borrowing_rate: Decimal,
        upper_hint: Option<EntryId>,
        lower_hint: Option<EntryId>,
    },
    AdjustPosition {
        cdp_id: EntryId,
        deposit_collateral: Decimal,
        withdraw_collateral: Decimal,
        borrow_amount: Decimal,
        repay_amount: Decimal,
        max_borrowing_rate: Decimal,
        upper_hint: Option<EntryId>,
        lower_hint: Option<EntryId>,
    },
    Redeem {
        amount: Decimal,
        first_hint: Option<EntryId>,
        partial_upper_hint: Option<EntryId>,
        partial_lower_hint: Option<EntryId>,
        partial_ratio: Decimal,
        max_iterations: u64,
        max_redemption_rate: Decimal,
    },
}

impl TransactionRequest {
    pub fn open(params: &OpenParams, max_borrowing_rate: Decimal, hints: &NeighborPair) -> Self {
        let (upper_hint, lower_hint) = hints.call_hints();
        TransactionRequest::OpenPosition {
            deposit_collateral: params.deposit_collateral,
            borrow_amount: params.borrow_amount,
            max_borrowing_rate,
            upper_hint,
            lower_hint,
        }
    }

    pub fn adjust(
        cdp_id: &EntryId,
        change: &PositionAdjustment,
        max_borrowing_rate: Decimal,
        hints: &NeighborPair,
    ) -> Self {
        let (upper_hint, lower_hint) = hints.call_hints();
        TransactionRequest::AdjustPosition {
            cdp_id: cdp_id.clone(),
            deposit_collateral: change.deposit_collateral,
            withdraw_collateral: change.withdraw_collateral,
            borrow_amount: change.borrow_amount,
            repay_amount: change.repay_amount,
            max_borrowing_rate,
            upper_hint,
            lower_hint,
        }
    }
}
