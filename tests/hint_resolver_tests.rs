
use flux_planner::errors::PlannerError;
use flux_planner::hint_resolver::HintResolver;
use flux_planner::parameters::PlannerParameters;
use flux_planner::registry::ApproxHint;
use flux_planner::shared_structs::{NeighborPair, NominalRatio};
use helper::{CallCounters, Helper};
use scrypto_test::prelude::*;

#[tokio::test]
async fn test_empty_registry_resolves_to_sentinels() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;

    // Resolve
    let pair = helper
        .resolver
        .resolve_hints(NominalRatio::Finite(dec!("1.5")), None)
        .await?;

    // Assert
    assert_eq!(pair, NeighborPair::NONE);
    assert_eq!(pair.call_hints(), (None, None));
    assert_eq!(
        CallCounters::get(&helper.registry.calls.approximate_hint),
        0
    );
    assert_eq!(
        CallCounters::get(&helper.registry.calls.find_insertion_position),
        0
    );

    Ok(())
}

#[tokio::test]
async fn test_single_entry_above_target() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    let only = helper.open_position(1, dec!(4400), dec!(2200));

    // Resolve a ratio of 1.1 against the single entry with ratio 2.0
    let pair = helper
        .resolver
        .resolve_hints(NominalRatio::Finite(dec!("1.1")), None)
        .await?;

    // Assert exact neighbors and the ledger hints
    assert_eq!(pair, NeighborPair::new(Some(only.clone()), None));
    assert_eq!(pair.call_hints(), (Some(only.clone()), Some(only)));

    Ok(())
}

#[tokio::test]
async fn test_neighbors_bound_every_target() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    helper.populate(50);

    // Walk targets below, between, on and above the entries
    for k in 0..110u64 {
        let target = Decimal::from(5 * k + 3) / dec!(2200);
        let pair = helper
            .resolver
            .resolve_hints_with_seed(NominalRatio::Finite(target), None, k)
            .await?;

        helper.assert_bounds(&pair, target);
    }

    Ok(())
}

#[tokio::test]
async fn test_infinite_ratio_becomes_head() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    let ids = helper.populate(10);

    // Resolve
    let pair = helper
        .resolver
        .resolve_hints(NominalRatio::Infinite, None)
        .await?;

    // Assert the highest ratio entry follows
    assert_eq!(pair, NeighborPair::new(None, ids.last().cloned()));
    assert_eq!(
        CallCounters::get(&helper.registry.calls.approximate_hint),
        0
    );

    Ok(())
}

#[tokio::test]
async fn test_trials_are_split_into_batches() -> Result<(), PlannerError> {
    // Initialize helper with a small per call cap
    let helper = Helper::with_parameters(PlannerParameters {
        max_trials_per_call: 7,
        ..PlannerParameters::default()
    })?;
    helper.populate(50);

    // ceil(10 * sqrt(50)) = 71 trials, 7 per call
    let target = dec!(255) / dec!(2200);
    let pair = helper
        .resolver
        .resolve_hints_with_seed(NominalRatio::Finite(target), None, 42)
        .await?;

    // Assert
    assert_eq!(
        CallCounters::get(&helper.registry.calls.approximate_hint),
        11
    );
    assert_eq!(
        CallCounters::get(&helper.registry.calls.find_insertion_position),
        1
    );
    helper.assert_bounds(&pair, target);

    Ok(())
}

#[tokio::test]
async fn test_entry_is_never_its_own_neighbor() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    let ids = helper.populate(20);

    // Reinsert every entry at its own ratio
    for (seed, own) in ids.iter().enumerate() {
        let ratio = helper.registry.ratio_of(own).unwrap();
        let pair = helper
            .resolver
            .resolve_hints_with_seed(ratio, Some(own), seed as u64)
            .await?;

        assert!(!pair.contains(own));
        let (upper, lower) = pair.call_hints();
        assert_ne!(upper.as_ref(), Some(own));
        assert_ne!(lower.as_ref(), Some(own));
    }

    Ok(())
}

#[tokio::test]
async fn test_own_entry_at_list_end_is_skipped() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    let lowest = helper.open_position(1, dec!(10), dec!(2200));
    let highest = helper.open_position(2, dec!(20), dec!(2200));

    // Moving the lowest entry slightly up still lands right above it
    let target = dec!("10.5") / dec!(2200);
    let pair = helper
        .resolver
        .resolve_hints(NominalRatio::Finite(target), Some(&lowest))
        .await?;

    // Assert
    assert_eq!(pair, NeighborPair::new(Some(highest.clone()), None));
    assert_eq!(pair.call_hints(), (Some(highest.clone()), Some(highest)));

    Ok(())
}

#[tokio::test]
async fn test_registry_outage_is_retryable() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    helper.populate(5);
    helper.registry.set_unavailable(true);

    // Resolve
    let result = helper
        .resolver
        .resolve_hints(NominalRatio::Finite(dec!("0.01")), None)
        .await;

    // Assert
    let error = result.unwrap_err();
    assert!(matches!(error, PlannerError::TransientReadFailure(_)));
    assert!(error.is_retryable());

    // Retry once the registry is back
    helper.registry.set_unavailable(false);
    let pair = helper
        .resolver
        .resolve_hints(NominalRatio::Finite(dec!("0.01")), None)
        .await?;
    helper.assert_bounds(&pair, dec!("0.01"));

    Ok(())
}

#[tokio::test]
async fn test_head_reinserted_at_infinite_ratio_skips_itself() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    let ids = helper.populate(5);
    let head = ids[4].clone();

    // Repay the head position in full
    let pair = helper
        .resolver
        .resolve_hints(NominalRatio::Infinite, Some(&head))
        .await?;

    // Assert the entry below the head becomes the lower neighbor
    assert_eq!(pair, NeighborPair::new(None, Some(ids[3].clone())));
    assert!(!pair.contains(&head));

    Ok(())
}

#[tokio::test]
async fn test_closest_sample_seeds_the_refinement() -> Result<(), PlannerError> {
    // Initialize helper with 11 batches of at most 7 trials
    let helper = Helper::with_parameters(PlannerParameters {
        max_trials_per_call: 7,
        ..PlannerParameters::default()
    })?;
    let ids = helper.populate(50);

    // The closest sample comes from the fourth batch; the last batch ties it
    let hints = (0..11usize)
        .map(|batch| ApproxHint {
            next_seed: 1000 + batch as u64,
            candidate: ids[batch].clone(),
            distance: if batch == 3 || batch == 10 {
                dec!("0.0001")
            } else {
                dec!("0.5")
            },
        })
        .collect();
    helper.registry.script_approximate_hints(hints);

    // Resolve
    let target = dec!(255) / dec!(2200);
    let pair = helper
        .resolver
        .resolve_hints_with_seed(NominalRatio::Finite(target), None, 42)
        .await?;

    // Assert every batch continued from the previous seed
    let mut expected_seeds = vec![42u64];
    expected_seeds.extend(1000..1010u64);
    assert_eq!(helper.registry.sampling_seeds(), expected_seeds);

    // Assert the earliest closest candidate was passed on both sides
    assert_eq!(
        helper.registry.refinement_hints(),
        vec![(Some(ids[3].clone()), Some(ids[3].clone()))]
    );
    helper.assert_bounds(&pair, target);

    Ok(())
}

#[tokio::test]
async fn test_zero_trial_cap_samples_one_trial_per_call() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    helper.populate(50);

    // A resolver built without validated parameters
    let resolver = HintResolver::new(
        helper.registry.clone(),
        PlannerParameters {
            max_trials_per_call: 0,
            ..PlannerParameters::default()
        },
    );

    // Resolve
    let target = dec!(255) / dec!(2200);
    let pair = resolver
        .resolve_hints_with_seed(NominalRatio::Finite(target), None, 7)
        .await?;

    // Assert 71 calls of a single trial each
    assert_eq!(
        CallCounters::get(&helper.registry.calls.approximate_hint),
        71
    );
    helper.assert_bounds(&pair, target);

    Ok(())
}
