//! # Hint resolver
//! Finds the neighbors a position with a given nominal ratio would get in the sorted registry,
//! without reading the whole list.
//!
//! ## Overview
//! Resolution runs in two stages:
//! - **Sampling:** the registry's approximate hint call samples random entries and reports the one
//!   closest to the target. `ceil(trial_multiplier * sqrt(length))` trials are spread over calls of
//!   at most `max_trials_per_call` trials each, carrying the random seed from call to call. The
//!   closest candidate over all calls wins. With trials growing as the square root of the list
//!   length, the winner is a few hops away from the true insertion point with high probability.
//! - **Refinement:** one exact `find_insertion_position` call walks the remaining hops from the
//!   winning candidate.
//!
//! Both stages only read. Batch partitioning and the closest-candidate fold are pure functions so
//! they can be exercised without a registry.

use crate::errors::*;
use crate::parameters::PlannerParameters;
use crate::registry::*;
use crate::shared_structs::*;
use scrypto::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Number of sampling trials for a registry of `length` entries.
pub fn total_trials(length: u64, trial_multiplier: u64) -> u64 {
    (trial_multiplier as f64 * (length as f64).sqrt()).ceil() as u64
}

/// Batch sizes that add up to `total`, none larger than `cap`.
pub fn trial_batches(total: u64, cap: u64) -> TrialBatches {
    TrialBatches {
        remaining: total,
        cap: cap.max(1),
    }
}

/// Number of batches `trial_batches(total, cap)` yields.
pub fn batch_count(total: u64, cap: u64) -> u64 {
    total.div_ceil(cap.max(1))
}

/// Restartable sequence of trial batch sizes. Cloning restarts from the same point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialBatches {
    remaining: u64,
    cap: u64,
}

impl Iterator for TrialBatches {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        let batch = self.remaining.min(self.cap);
        self.remaining -= batch;
        Some(batch)
    }
}

/// A sampled entry and its distance to the target ratio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampledHint {
    pub candidate: EntryId,
    pub distance: Decimal,
}

/// The sample with the smallest distance. The earliest one wins a tie.
pub fn closest_candidate<I>(samples: I) -> Option<SampledHint>
where
    I: IntoIterator<Item = SampledHint>,
{
    samples.into_iter().fold(None, |best, sample| match best {
        Some(best) if best.distance <= sample.distance => Some(best),
        _ => Some(sample),
    })
}

/// Resolves neighbor pairs against a registry.
pub struct HintResolver<R: RegistryClient + ?Sized> {
    registry: Arc<R>,
    parameters: PlannerParameters,
}

impl<R: RegistryClient + ?Sized> HintResolver<R> {
    pub fn new(registry: Arc<R>, parameters: PlannerParameters) -> Self {
        Self {
            registry,
            parameters,
        }
    }

    /// Resolves the neighbors of `target` starting from a random seed.
    ///
    /// See `resolve_hints_with_seed`.
    pub async fn resolve_hints(
        &self,
        target: NominalRatio,
        exclude: Option<&EntryId>,
    ) -> Result<NeighborPair, PlannerError> {
        self.resolve_hints_with_seed(target, exclude, rand::random())
            .await
    }

    /// Resolves the neighbors a position with ratio `target` would get once inserted.
    ///
    /// # Arguments
    /// * `target`: The nominal ratio of the position being inserted or reinserted.
    /// * `exclude`: The entry being reinserted, if any. It is still in the list while hints are
    ///   computed and can never be its own neighbor.
    /// * `seed`: Initial random seed for the sampling stage.
    ///
    /// # Returns
    /// * `NeighborPair` with `ratio(prev) >= target >= ratio(next)`. A side is `None` only at a
    ///   list end; the sentinel is substituted when the pair becomes call hints.
    ///
    /// # Logic
    /// 1. **Empty list:** returns `(None, None)` without sampling.
    /// 2. **Infinite ratio:** the position becomes the new head, returns `(None, first)`, or
    ///    `(None, next(first))` when `first` is the excluded entry.
    /// 3. **Sampling:** runs the trial batches and keeps the closest candidate.
    /// 4. **Refinement:** one `find_insertion_position` call seeded with that candidate on both sides.
    /// 5. **Self exclusion:** if `exclude` ended up as a neighbor, steps one hop past it.
    ///
    /// # Errors
    /// * `TransientReadFailure` if any registry read fails.
    pub async fn resolve_hints_with_seed(
        &self,
        target: NominalRatio,
        exclude: Option<&EntryId>,
        seed: u64,
    ) -> Result<NeighborPair, PlannerError> {
        let length = self.registry.length().await?;
        if length == 0 {
            return Ok(NeighborPair::NONE);
        }

        let target = match target {
            NominalRatio::Infinite => {
                let head = match (self.registry.first().await?, exclude) {
                    (Some(first), Some(own)) if &first == own => self.registry.next(own).await?,
                    (first, _) => first,
                };
                return Ok(NeighborPair::new(None, head));
            }
            NominalRatio::Finite(ratio) => ratio,
        };

        let trials = total_trials(length, self.parameters.trial_multiplier);
        let seed_hint = self.sample_closest(target, trials, seed).await?;

        let candidate = seed_hint.as_ref().map(|hint| &hint.candidate);
        let mut pair = self
            .registry
            .find_insertion_position(target, candidate, candidate)
            .await?;

        if let Some(own) = exclude {
            if pair.prev.as_ref() == Some(own) {
                pair.prev = self.registry.prev(own).await?;
            } else if pair.next.as_ref() == Some(own) {
                pair.next = self.registry.next(own).await?;
            }
        }

        debug!(
            ratio = %target,
            length,
            trials,
            batches = batch_count(trials, self.parameters.max_trials_per_call),
            distance = ?seed_hint.as_ref().map(|hint| hint.distance),
            prev = ?pair.prev,
            next = ?pair.next,
            "resolved hints"
        );

        Ok(pair)
    }

    /// Runs every trial batch in order, carrying the seed forward, and folds the closest sample.
    async fn sample_closest(
        &self,
        target: Decimal,
        trials: u64,
        seed: u64,
    ) -> Result<Option<SampledHint>, PlannerError> {
        let mut seed = seed;
        let mut best = None;

        for batch in trial_batches(trials, self.parameters.max_trials_per_call) {
            let hint = self.registry.approximate_hint(target, batch, seed).await?;
            seed = hint.next_seed;

            best = closest_candidate(best.into_iter().chain(Some(SampledHint {
                candidate: hint.candidate,
                distance: hint.distance,
            })));
        }

        Ok(best)
    }
}
