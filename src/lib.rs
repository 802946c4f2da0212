//! # Flux Planner Crate
//!
//! This crate is the client-side planning layer for a Flux-style borrowing protocol, where
//! Collateralized Debt Positions (CDPs) live in an on-ledger list sorted by nominal collateral ratio.
//!
//! Every call that inserts or moves a position in that list takes *hints*: the neighbors the
//! position will end up between. Good hints keep the ledger from walking the list; stale or
//! missing ones make the transaction expensive or make it fail. The crate resolves those hints
//! without reading the whole list, sizes gas so a transaction survives a window of fee decay
//! while it waits to be mined, and plans redemptions that respect the minimum debt floor.
//!
//! ## Modules
//!
//! The crate is organized into the following modules:
//!
//! - `parameters`: The `PlannerParameters` struct holding fee curve constants, debt floors,
//!   sampling caps and gas allowances. Injected into every component.
//! - `shared_structs`: Data structures shared across components, such as `Position`,
//!   `NominalRatio`, `NeighborPair`, `FeeState` and `TransactionRequest`.
//! - `errors`: The `PlannerError` taxonomy, separating preflight rejections from retryable read failures.
//! - `registry`: The async traits through which the remote registry and the gas estimator are read.
//! - `fee_decay`: A pure model of the decaying base rate and the borrowing and redemption rates derived from it.
//! - `hint_resolver`: Probabilistic sampling plus exact refinement of neighbor hints.
//! - `operation_planner`: Plans opening and adjusting positions, including the gas headroom for fee decay.
//! - `redemption_planner`: Plans redemptions, truncating them at the debt floor and offering a continuation.
//! - `envelope`: Sends a plan through an external broadcaster and classifies the outcome.

pub mod envelope;
pub mod errors;
pub mod fee_decay;
pub mod hint_resolver;
pub mod operation_planner;
pub mod parameters;
pub mod redemption_planner;
pub mod registry;
pub mod shared_structs;
