
use flux_planner::errors::{PlannerError, PreflightRejection};
use flux_planner::redemption_planner::{Continuation, RedemptionStatus};
use flux_planner::shared_structs::{EntryId, NeighborPair, TransactionRequest};
use helper::{CallCounters, Helper};
use scrypto_test::prelude::*;

/// Three positions at a price of 1000: A (net 2000) is the riskiest, then B (net 2100), then C.
fn three_positions(helper: &Helper) -> (EntryId, EntryId, EntryId) {
    let a = helper.open_position(1, dec!(10), dec!(2200));
    let b = helper.open_position(2, dec!(12), dec!(2300));
    let c = helper.open_position(3, dec!(20), dec!(2500));
    (a, b, c)
}

#[tokio::test]
async fn test_redemption_truncated_at_debt_floor() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    let (a, b, c) = three_positions(&helper);

    // A is redeemed fully, B only down to the minimum net debt
    let plan = helper.redemptions.plan_redemption(dec!(3000), None).await?;

    // Assert
    assert_eq!(plan.attempted_amount(), dec!(3000));
    assert_eq!(plan.redeemable_amount(), dec!(2300));
    assert!(plan.is_truncated());
    assert_eq!(plan.first_hint(), Some(&a));
    assert_eq!(plan.partial_ratio(), dec!("0.00585"));
    assert_eq!(
        plan.partial_hints(),
        &NeighborPair::new(Some(c.clone()), Some(b.clone()))
    );
    assert_eq!(
        plan.continuation()?,
        &Continuation {
            next_amount: dec!(4100),
            max_redemption_rate: None,
        }
    );
    assert_eq!(plan.max_iterations(), 70);
    assert_eq!(plan.gas_limit(), 515_656);

    // The request redeems only what is redeemable
    assert_eq!(
        plan.request(),
        TransactionRequest::Redeem {
            amount: dec!(2300),
            first_hint: Some(a),
            partial_upper_hint: Some(c),
            partial_lower_hint: Some(b),
            partial_ratio: dec!("0.00585"),
            max_iterations: 70,
            max_redemption_rate: plan.max_redemption_rate(),
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_continuation_retires_partial_position() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    three_positions(&helper);

    // Plan and follow the continuation
    let plan = helper.redemptions.plan_redemption(dec!(3000), None).await?;
    let next = helper.redemptions.advance(&plan, None).await?;

    // Assert
    assert_eq!(next.attempted_amount(), dec!(4100));
    assert_eq!(next.redeemable_amount(), dec!(4100));
    assert!(!next.is_truncated());
    assert_eq!(next.status(), &RedemptionStatus::Final);
    assert_eq!(next.partial_ratio(), Decimal::ZERO);
    assert_eq!(next.partial_hints(), &NeighborPair::NONE);

    // The original plan is untouched
    assert_eq!(plan.attempted_amount(), dec!(3000));
    assert!(plan.is_truncated());

    Ok(())
}

#[tokio::test]
async fn test_exact_redemption_has_no_continuation() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    three_positions(&helper);

    // A's net debt exactly
    let plan = helper.redemptions.plan_redemption(dec!(2000), None).await?;

    // Assert
    assert_eq!(plan.redeemable_amount(), dec!(2000));
    assert!(!plan.is_truncated());
    assert_eq!(plan.status(), &RedemptionStatus::Final);
    assert_eq!(
        plan.continuation().unwrap_err(),
        PlannerError::PreflightRejected(PreflightRejection::NoContinuation {
            amount: dec!(2000)
        })
    );

    // Advancing is rejected without asking the registry
    let calls = CallCounters::get(&helper.registry.calls.redemption_hints);
    let result = helper.redemptions.advance(&plan, None).await;
    assert!(matches!(
        result,
        Err(PlannerError::PreflightRejected(
            PreflightRejection::NoContinuation { .. }
        ))
    ));
    assert_eq!(
        CallCounters::get(&helper.registry.calls.redemption_hints),
        calls
    );

    Ok(())
}

#[tokio::test]
async fn test_amount_too_low_to_redeem() -> Result<(), PlannerError> {
    // Initialize helper with a single position sitting at the minimum net debt
    let helper = Helper::new()?;
    helper.open_position(1, dec!(10), dec!(2000));

    // Plan
    let result = helper.redemptions.plan_redemption(dec!(100), None).await;

    // Assert
    assert_eq!(
        result.unwrap_err(),
        PlannerError::AmountTooLowToRedeem {
            attempted: dec!(100),
            minimum_net_debt: dec!(1800),
        }
    );
    assert_eq!(helper.gas.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_continuations_always_grow() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    for i in 1..=6u64 {
        helper.open_position(i, Decimal::from(10 + i), dec!(2200));
    }

    // Two iterations per redemption cap every plan at 4000
    let mut plan = helper
        .redemptions
        .plan_redemption_with_iterations(dec!(10000), None, 2)
        .await?;

    for _ in 0..3 {
        assert!(plan.is_truncated());
        assert_eq!(plan.redeemable_amount(), dec!(4000));

        let next_amount = plan.continuation()?.next_amount;
        assert!(next_amount > plan.attempted_amount());

        let next = helper.redemptions.advance(&plan, None).await?;
        assert_eq!(next.attempted_amount(), next_amount);
        assert_eq!(next.max_iterations(), 2);
        plan = next;
    }

    Ok(())
}

#[tokio::test]
async fn test_default_rate_cap_includes_slippage() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    three_positions(&helper);

    // Plan
    let plan = helper.redemptions.plan_redemption(dec!(3000), None).await?;

    // 0.005 + (2300 / 7000) / 2 + 0.001
    let expected = dec!("0.005") + dec!(2300) / dec!(7000) / dec!(2) + dec!("0.001");
    assert!(Helper::abs_diff(plan.max_redemption_rate(), expected) < dec!("0.000000001"));

    Ok(())
}

#[tokio::test]
async fn test_explicit_rate_cap_carries_into_continuation() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    three_positions(&helper);

    // Plan with an explicit cap
    let plan = helper
        .redemptions
        .plan_redemption(dec!(3000), Some(dec!("0.2")))
        .await?;
    assert_eq!(plan.max_redemption_rate(), dec!("0.2"));
    assert_eq!(plan.continuation()?.max_redemption_rate, Some(dec!("0.2")));

    // Kept without a new cap, replaced with one
    let kept = helper.redemptions.advance(&plan, None).await?;
    assert_eq!(kept.max_redemption_rate(), dec!("0.2"));
    let replaced = helper
        .redemptions
        .advance(&plan, Some(dec!("0.3")))
        .await?;
    assert_eq!(replaced.max_redemption_rate(), dec!("0.3"));

    Ok(())
}

#[tokio::test]
async fn test_rate_cap_above_one_rejected() -> Result<(), PlannerError> {
    // Initialize helper
    let helper = Helper::new()?;
    three_positions(&helper);

    // Plan
    let result = helper
        .redemptions
        .plan_redemption(dec!(3000), Some(dec!("1.5")))
        .await;

    // Assert
    assert!(matches!(
        result,
        Err(PlannerError::PreflightRejected(
            PreflightRejection::InvalidParameter { .. }
        ))
    ));
    assert_eq!(
        CallCounters::get(&helper.registry.calls.redemption_hints),
        0
    );

    Ok(())
}
