//! Payout Calculator.
//!
//! `calculate(rules, effective_count)` is a pure function. Components are kept at
//! full precision and only the total is rounded, so identical inputs always give
//! an identical [`PayoutBreakdown`]. Arithmetic is checked: terms too large for a
//! `Decimal` give [`AmountOverflow`], never a panic.

use crate::rules::{Bonus, CommissionRules, ContractShape};
use crate::types::{AmountOverflow, Money};
use serde::{Deserialize, Serialize};

/// Every component of one promoter's payout, in pipeline order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    /// Rule-set classification at calculation time
    pub shape: ContractShape,
    /// Count the math ran on
    pub effective_count: u32,
    /// `per_head_rate × effective_count`
    pub base_amount: Money,
    /// Whether the minimum-guest scaling applied
    pub below_minimum: bool,
    /// Base after minimum-guest scaling, floor and cap
    pub per_head_amount: Money,
    /// Bonus awarded
    pub bonus_amount: Money,
    /// Threshold of the tier or flat bonus that was awarded
    pub bonus_threshold_met: Option<u32>,
    /// Fixed fee
    pub fixed_fee: Money,
    /// Signed manual adjustment
    pub manual_adjustment: Money,
    /// Rounded total
    pub total: Money,
}

/// Computes the payout for `effective_count` under `rules`.
///
/// # Errors
///
/// [`AmountOverflow`] when an intermediate amount leaves the `Decimal` range.
pub fn calculate(
    rules: &CommissionRules,
    effective_count: u32,
) -> Result<PayoutBreakdown, AmountOverflow> {
    let base_amount = match rules.per_head {
        Some(per_head) => per_head.rate.checked_times(effective_count)?,
        None => Money::ZERO,
    };

    let (mut per_head_amount, below_minimum) = match rules.minimum_guests {
        Some(minimum) if effective_count < minimum.minimum => {
            (minimum.below_minimum_percent.checked_of(base_amount)?, true)
        }
        _ => (base_amount, false),
    };

    if let Some(per_head) = rules.per_head {
        if let Some(floor) = per_head.floor {
            per_head_amount = per_head_amount.max(floor);
        }
        if let Some(cap) = per_head.cap {
            per_head_amount = per_head_amount.min(cap);
        }
    }

    let (bonus_amount, bonus_threshold_met) = match &rules.bonus {
        Some(Bonus::Tiered { tiers }) => tiers
            .iter()
            .filter(|tier| tier.threshold <= effective_count)
            .next_back()
            .map_or((Money::ZERO, None), |tier| (tier.amount, Some(tier.threshold))),
        Some(Bonus::Flat { threshold, amount }) if effective_count >= *threshold => {
            (*amount, Some(*threshold))
        }
        Some(Bonus::Flat { .. }) | None => (Money::ZERO, None),
    };

    let fixed_fee = rules.fixed_fee.unwrap_or(Money::ZERO);
    let manual_adjustment = rules
        .adjustment
        .as_ref()
        .map_or(Money::ZERO, |adjustment| adjustment.amount);

    let total = per_head_amount
        .checked_add(bonus_amount)?
        .checked_add(fixed_fee)?
        .checked_add(manual_adjustment)?
        .round_cents();

    Ok(PayoutBreakdown {
        shape: rules.shape(),
        effective_count,
        base_amount,
        below_minimum,
        per_head_amount,
        bonus_amount,
        bonus_threshold_met,
        fixed_fee,
        manual_adjustment,
        total,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rules::{BonusTier, ManualAdjustment, MinimumGuests, PerHead};
    use crate::types::Percentage;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn pay(rules: &CommissionRules, count: u32) -> PayoutBreakdown {
        calculate(rules, count).unwrap()
    }

    fn per_head(rate: i64) -> Option<PerHead> {
        Some(PerHead {
            rate: Money::from_units(rate),
            floor: None,
            cap: None,
        })
    }

    fn scenario_a() -> CommissionRules {
        CommissionRules {
            per_head: per_head(5),
            bonus: Some(Bonus::Flat {
                threshold: 50,
                amount: Money::from_units(100),
            }),
            ..CommissionRules::default()
        }
    }

    #[test]
    fn flat_per_head_with_bonus() {
        let breakdown = pay(&scenario_a(), 60);
        assert_eq!(breakdown.base_amount, Money::from_units(300));
        assert_eq!(breakdown.bonus_amount, Money::from_units(100));
        assert_eq!(breakdown.bonus_threshold_met, Some(50));
        assert_eq!(breakdown.total, Money::from_units(400));
        assert_eq!(breakdown.shape, ContractShape::FlatPerHead);
    }

    #[test]
    fn below_minimum_scales_base_and_misses_bonus() {
        let rules = CommissionRules {
            minimum_guests: Some(MinimumGuests {
                minimum: 20,
                below_minimum_percent: Percentage::from_whole(50),
            }),
            ..scenario_a()
        };
        let breakdown = pay(&rules, 10);
        assert_eq!(breakdown.base_amount, Money::from_units(50));
        assert!(breakdown.below_minimum);
        assert_eq!(breakdown.per_head_amount, Money::from_units(25));
        assert_eq!(breakdown.bonus_amount, Money::ZERO);
        assert_eq!(breakdown.total, Money::from_units(25));
    }

    #[test]
    fn meeting_the_minimum_pays_in_full() {
        let rules = CommissionRules {
            minimum_guests: Some(MinimumGuests {
                minimum: 20,
                below_minimum_percent: Percentage::from_whole(50),
            }),
            ..scenario_a()
        };
        let breakdown = pay(&rules, 20);
        assert!(!breakdown.below_minimum);
        assert_eq!(breakdown.per_head_amount, Money::from_units(100));
    }

    #[test]
    fn clamp_applies_after_scaling() {
        let rules = CommissionRules {
            per_head: Some(PerHead {
                rate: Money::from_units(5),
                floor: Some(Money::from_units(40)),
                cap: Some(Money::from_units(200)),
            }),
            minimum_guests: Some(MinimumGuests {
                minimum: 20,
                below_minimum_percent: Percentage::from_whole(50),
            }),
            ..CommissionRules::default()
        };
        // 5 × 10 = 50, scaled to 25, floored to 40
        assert_eq!(pay(&rules, 10).per_head_amount, Money::from_units(40));
        // 5 × 100 = 500, capped to 200
        assert_eq!(pay(&rules, 100).per_head_amount, Money::from_units(200));
    }

    #[test]
    fn highest_qualifying_tier_wins() {
        let rules = CommissionRules {
            bonus: Some(Bonus::Tiered {
                tiers: vec![
                    BonusTier { threshold: 25, amount: Money::from_units(50) },
                    BonusTier { threshold: 50, amount: Money::from_units(120) },
                    BonusTier { threshold: 100, amount: Money::from_units(300) },
                ],
            }),
            ..CommissionRules::default()
        };
        assert_eq!(pay(&rules, 24).bonus_amount, Money::ZERO);
        assert_eq!(pay(&rules, 25).bonus_amount, Money::from_units(50));
        assert_eq!(pay(&rules, 99).bonus_amount, Money::from_units(120));
        let top = pay(&rules, 400);
        assert_eq!(top.bonus_amount, Money::from_units(300));
        assert_eq!(top.bonus_threshold_met, Some(100));
    }

    #[test]
    fn fixed_fee_is_count_independent() {
        let rules = CommissionRules {
            fixed_fee: Some(Money::from_units(250)),
            ..CommissionRules::default()
        };
        assert_eq!(pay(&rules, 0).total, Money::from_units(250));
        assert_eq!(pay(&rules, 1000).total, Money::from_units(250));
    }

    #[test]
    fn manual_adjustment_is_applied_last_and_visible() {
        let rules = CommissionRules {
            adjustment: Some(ManualAdjustment {
                amount: Money::from_units(-150),
                reason: Some("comped bottles".to_string()),
            }),
            ..scenario_a()
        };
        let breakdown = pay(&rules, 60);
        assert_eq!(breakdown.manual_adjustment, Money::from_units(-150));
        assert_eq!(breakdown.total, Money::from_units(250));
    }

    #[test]
    fn rounding_happens_once_at_the_end() {
        let rules = CommissionRules {
            per_head: Some(PerHead {
                rate: Money::new(dec!(0.335)),
                floor: None,
                cap: None,
            }),
            adjustment: Some(ManualAdjustment {
                amount: Money::new(dec!(-0.001)),
                reason: Some("rounding check".to_string()),
            }),
            ..CommissionRules::default()
        };
        let breakdown = pay(&rules, 3);
        assert_eq!(breakdown.base_amount, Money::new(dec!(1.005)));
        // Rounding each step would give 1.01; the pipeline total is 1.004
        assert_eq!(breakdown.total, Money::new(dec!(1.00)));
    }

    #[test]
    fn unconfigured_rules_pay_nothing() {
        let breakdown = pay(&CommissionRules::default(), 42);
        assert_eq!(breakdown.total, Money::ZERO);
        assert_eq!(breakdown.shape, ContractShape::Unconfigured);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let rules = scenario_a();
        let first = serde_json::to_vec(&pay(&rules, 60)).unwrap();
        let second = serde_json::to_vec(&pay(&rules, 60)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rate_too_large_for_the_count_overflows_without_panicking() {
        let rules = CommissionRules {
            per_head: Some(PerHead {
                rate: Money::new(Decimal::MAX),
                floor: None,
                cap: None,
            }),
            ..CommissionRules::default()
        };
        assert_eq!(
            calculate(&rules, 2),
            Err(AmountOverflow("per-head multiplication"))
        );
        assert_eq!(pay(&rules, 1).total, Money::new(Decimal::MAX).round_cents());
    }

    #[test]
    fn oversized_components_overflow_the_total() {
        let rules = CommissionRules {
            fixed_fee: Some(Money::new(Decimal::MAX)),
            bonus: Some(Bonus::Flat {
                threshold: 0,
                amount: Money::new(Decimal::MAX),
            }),
            ..CommissionRules::default()
        };
        assert!(calculate(&rules, 10).is_err());
    }
}
