//! Commission Rule Resolver.
//!
//! A commission contract is stored as one flat record of optional fields
//! ([`ContractTerms`]). This module turns that record into a [`CommissionRules`]
//! value made of tagged components, so the payout calculator never has to reason
//! about invalid combinations:
//!
//! - [`ContractTerms::validate`] runs when a contract is written and rejects
//!   inconsistent terms outright.
//! - [`resolve`] runs when a contract is read for calculation. It never fails:
//!   malformed bonus tiers degrade to "no tiers" and a flat bonus configured next
//!   to tiers is shadowed by the tiers. Each degrade is reported as a
//!   [`DegradedInput`] and logged.

use crate::types::{ContractId, EventId, Money, Percentage, PromoterId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Largest magnitude accepted for any money term of a contract.
///
/// Keeps `rate × count` and the summed components far inside the `Decimal`
/// range for every `u32` head count.
pub const MAX_TERM_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

// ============================================================================
// Raw contract record
// ============================================================================

/// Contract terms exactly as stored: every field optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractTerms {
    /// Amount paid per effective check-in
    pub per_head_rate: Option<Money>,
    /// Floor for the per-head amount
    pub per_head_min: Option<Money>,
    /// Cap for the per-head amount
    pub per_head_max: Option<Money>,
    /// Count-independent fee
    pub fixed_fee: Option<Money>,
    /// Turnout below which the per-head amount is scaled down
    pub minimum_guests: Option<u32>,
    /// Share of the per-head amount paid below the minimum (0-100)
    pub below_minimum_percent: Option<Percentage>,
    /// Count at which the flat bonus is earned
    pub bonus_threshold: Option<u32>,
    /// Flat bonus amount
    pub bonus_amount: Option<Money>,
    /// Tiered bonuses as stored (`[{"threshold": n, "amount": x}, ...]`)
    pub bonus_tiers: Option<serde_json::Value>,
    /// Signed human adjustment applied after all rule math
    pub manual_adjustment_amount: Option<Money>,
    /// Why the adjustment was made
    pub manual_adjustment_reason: Option<String>,
    /// Count to use instead of the aggregated check-ins
    pub manual_checkins_override: Option<u32>,
    /// Why the count was overridden
    pub manual_checkins_reason: Option<String>,
}

/// The per-event, per-promoter agreement defining how that promoter is paid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommissionContract {
    /// Contract identifier
    pub id: ContractId,
    /// Event the promoter is attached to
    pub event_id: EventId,
    /// Promoter being paid
    pub promoter_id: PromoterId,
    /// Stored terms
    pub terms: ContractTerms,
    /// When the promoter was attached
    pub created_at: DateTime<Utc>,
    /// When the terms last changed
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Normalized rules
// ============================================================================

/// Per-head component: `rate × count`, then floored and capped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerHead {
    /// Amount per check-in (zero when only bounds were configured)
    pub rate: Money,
    /// Lower bound for the per-head amount
    pub floor: Option<Money>,
    /// Upper bound for the per-head amount
    pub cap: Option<Money>,
}

/// Partial payout for turnout below a minimum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumGuests {
    /// Required turnout
    pub minimum: u32,
    /// Share of the per-head amount paid below `minimum`
    pub below_minimum_percent: Percentage,
}

/// One step of a tiered bonus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusTier {
    /// Count at which the tier is earned
    pub threshold: u32,
    /// Bonus paid for the tier
    pub amount: Money,
}

/// Bonus component; flat and tiered are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Bonus {
    /// A single threshold/amount pair
    Flat {
        /// Count at which the bonus is earned
        threshold: u32,
        /// Bonus amount
        amount: Money,
    },
    /// Highest qualifying tier wins; sorted by ascending threshold
    Tiered {
        /// Tiers in ascending threshold order
        tiers: Vec<BonusTier>,
    },
}

/// Signed human override applied after all rule math.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAdjustment {
    /// Signed delta
    pub amount: Money,
    /// Why it was made
    pub reason: Option<String>,
}

/// Count to use instead of the aggregated check-ins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinOverride {
    /// Overriding count
    pub count: u32,
    /// Why it was overridden
    pub reason: Option<String>,
}

/// One evaluable rule set for a promoter at an event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRules {
    /// Per-head pay
    pub per_head: Option<PerHead>,
    /// Below-minimum scaling
    pub minimum_guests: Option<MinimumGuests>,
    /// Bonus
    pub bonus: Option<Bonus>,
    /// Count-independent fee
    pub fixed_fee: Option<Money>,
    /// Human adjustment
    pub adjustment: Option<ManualAdjustment>,
    /// Human check-in override
    pub checkins_override: Option<CheckinOverride>,
}

/// Audit classification of a rule set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractShape {
    /// Nothing configured
    Unconfigured,
    /// Per-head pay, optionally with a flat bonus
    FlatPerHead,
    /// Tiered bonus only
    Tiered,
    /// Fixed fee only
    FixedFee,
    /// Any other combination
    Hybrid,
}

impl CommissionRules {
    /// Classifies the rule set for audit display
    #[must_use]
    pub const fn shape(&self) -> ContractShape {
        match (&self.per_head, &self.bonus, &self.fixed_fee) {
            (None, None, None) => ContractShape::Unconfigured,
            (Some(_), None | Some(Bonus::Flat { .. }), None) => ContractShape::FlatPerHead,
            (None, Some(Bonus::Tiered { .. }), None) => ContractShape::Tiered,
            (None, None, Some(_)) => ContractShape::FixedFee,
            _ => ContractShape::Hybrid,
        }
    }
}

// ============================================================================
// Errors and degrades
// ============================================================================

/// Why stored bonus tiers could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierParseError {
    /// Not a list of `{threshold, amount}` objects
    #[error("bonus tiers are not a list of {{threshold, amount}} objects: {0}")]
    Malformed(String),

    /// Two tiers share a threshold
    #[error("bonus tiers repeat threshold {0}")]
    DuplicateThreshold(u32),
}

/// Terms rejected when a contract is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractValidationError {
    /// A money field is below zero
    #[error("{field} must not be negative")]
    NegativeAmount {
        /// Offending field
        field: &'static str,
    },

    /// A money field exceeds [`MAX_TERM_AMOUNT`] in magnitude
    #[error("{field} must not exceed {max} in magnitude")]
    AmountTooLarge {
        /// Offending field
        field: &'static str,
        /// The accepted maximum
        max: Decimal,
    },

    /// `per_head_min` exceeds `per_head_max`
    #[error("per_head_min ({min}) exceeds per_head_max ({max})")]
    InvertedPerHeadBounds {
        /// Configured floor
        min: Money,
        /// Configured cap
        max: Money,
    },

    /// `below_minimum_percent` outside 0-100
    #[error("below_minimum_percent must be between 0 and 100, got {0}")]
    PercentOutOfRange(Percentage),

    /// A field that another field depends on is missing
    #[error("{field} is required when {required_by} is set")]
    MissingField {
        /// The missing field
        field: &'static str,
        /// The field that requires it
        required_by: &'static str,
    },

    /// Both a flat bonus and tiers are configured
    #[error("configure either bonus_threshold/bonus_amount or bonus_tiers, not both")]
    ConflictingBonus,

    /// Tiers could not be parsed
    #[error("invalid bonus_tiers: {0}")]
    InvalidBonusTiers(#[from] TierParseError),
}

/// A read-time inconsistency that was resolved instead of rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedInput {
    /// Tiers were unreadable and treated as absent
    MalformedBonusTiers {
        /// Parse failure
        reason: String,
    },
    /// A flat bonus was configured alongside tiers and ignored
    FlatBonusShadowedByTiers,
    /// Only one of `bonus_threshold`/`bonus_amount` was set; no flat bonus applies
    IncompleteFlatBonus,
}

// ============================================================================
// Parsing, validation, resolution
// ============================================================================

/// Parses stored bonus tiers into ascending threshold order.
///
/// Accepts a JSON list or a JSON string containing a list; `null` is no tiers.
///
/// # Errors
///
/// [`TierParseError::Malformed`] for anything else,
/// [`TierParseError::DuplicateThreshold`] when thresholds repeat.
pub fn parse_bonus_tiers(raw: &serde_json::Value) -> Result<Vec<BonusTier>, TierParseError> {
    let value = match raw {
        serde_json::Value::Null => return Ok(Vec::new()),
        serde_json::Value::String(text) => serde_json::from_str::<serde_json::Value>(text)
            .map_err(|e| TierParseError::Malformed(e.to_string()))?,
        other => other.clone(),
    };

    let mut tiers: Vec<BonusTier> =
        serde_json::from_value(value).map_err(|e| TierParseError::Malformed(e.to_string()))?;

    let mut seen = HashSet::with_capacity(tiers.len());
    for tier in &tiers {
        if !seen.insert(tier.threshold) {
            return Err(TierParseError::DuplicateThreshold(tier.threshold));
        }
    }

    tiers.sort_by_key(|tier| tier.threshold);
    Ok(tiers)
}

impl ContractTerms {
    /// Validates terms at write time.
    ///
    /// # Errors
    ///
    /// Returns the first [`ContractValidationError`] found.
    pub fn validate(&self) -> Result<(), ContractValidationError> {
        let money_fields = [
            ("per_head_rate", self.per_head_rate),
            ("per_head_min", self.per_head_min),
            ("per_head_max", self.per_head_max),
            ("fixed_fee", self.fixed_fee),
            ("bonus_amount", self.bonus_amount),
        ];
        for (field, value) in money_fields {
            if value.is_some_and(|amount| amount.is_negative()) {
                return Err(ContractValidationError::NegativeAmount { field });
            }
        }
        let bounded_fields = money_fields
            .into_iter()
            .chain([("manual_adjustment_amount", self.manual_adjustment_amount)]);
        for (field, value) in bounded_fields {
            if value.is_some_and(exceeds_term_bound) {
                return Err(ContractValidationError::AmountTooLarge {
                    field,
                    max: MAX_TERM_AMOUNT,
                });
            }
        }

        if let (Some(min), Some(max)) = (self.per_head_min, self.per_head_max) {
            if min > max {
                return Err(ContractValidationError::InvertedPerHeadBounds { min, max });
            }
        }

        if let Some(percent) = self.below_minimum_percent {
            if percent.value() < Decimal::ZERO || percent.value() > Decimal::ONE_HUNDRED {
                return Err(ContractValidationError::PercentOutOfRange(percent));
            }
        }
        if self.minimum_guests.is_some() && self.below_minimum_percent.is_none() {
            return Err(ContractValidationError::MissingField {
                field: "below_minimum_percent",
                required_by: "minimum_guests",
            });
        }

        match (self.bonus_threshold, self.bonus_amount) {
            (Some(_), None) => {
                return Err(ContractValidationError::MissingField {
                    field: "bonus_amount",
                    required_by: "bonus_threshold",
                });
            }
            (None, Some(_)) => {
                return Err(ContractValidationError::MissingField {
                    field: "bonus_threshold",
                    required_by: "bonus_amount",
                });
            }
            _ => {}
        }

        let tiers = match &self.bonus_tiers {
            Some(raw) => parse_bonus_tiers(raw)?,
            None => Vec::new(),
        };
        if !tiers.is_empty() && self.bonus_threshold.is_some() {
            return Err(ContractValidationError::ConflictingBonus);
        }
        if tiers.iter().any(|tier| tier.amount.is_negative()) {
            return Err(ContractValidationError::NegativeAmount {
                field: "bonus_tiers.amount",
            });
        }
        if tiers.iter().any(|tier| exceeds_term_bound(tier.amount)) {
            return Err(ContractValidationError::AmountTooLarge {
                field: "bonus_tiers.amount",
                max: MAX_TERM_AMOUNT,
            });
        }

        if self.manual_adjustment_amount.is_some() && blank(self.manual_adjustment_reason.as_deref())
        {
            return Err(ContractValidationError::MissingField {
                field: "manual_adjustment_reason",
                required_by: "manual_adjustment_amount",
            });
        }
        if self.manual_checkins_override.is_some() && blank(self.manual_checkins_reason.as_deref()) {
            return Err(ContractValidationError::MissingField {
                field: "manual_checkins_reason",
                required_by: "manual_checkins_override",
            });
        }

        Ok(())
    }
}

fn exceeds_term_bound(amount: Money) -> bool {
    amount.amount().abs() > MAX_TERM_AMOUNT
}

fn blank(value: Option<&str>) -> bool {
    value.is_none_or(|text| text.trim().is_empty())
}

/// A resolved rule set plus whatever had to be degraded to produce it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRules {
    /// Evaluable rules
    pub rules: CommissionRules,
    /// Inconsistencies resolved along the way
    pub degraded: Vec<DegradedInput>,
}

/// Normalizes stored terms into one evaluable rule set. Never fails.
#[must_use]
pub fn resolve(terms: &ContractTerms) -> ResolvedRules {
    let mut degraded = Vec::new();

    let per_head = if terms.per_head_rate.is_some()
        || terms.per_head_min.is_some()
        || terms.per_head_max.is_some()
    {
        Some(PerHead {
            rate: terms.per_head_rate.unwrap_or(Money::ZERO),
            floor: terms.per_head_min,
            cap: terms.per_head_max,
        })
    } else {
        None
    };

    let minimum_guests = terms.minimum_guests.map(|minimum| MinimumGuests {
        minimum,
        below_minimum_percent: terms
            .below_minimum_percent
            .unwrap_or(Percentage::new(Decimal::ZERO)),
    });

    let tiers = match terms.bonus_tiers.as_ref().map(parse_bonus_tiers) {
        Some(Ok(tiers)) => tiers,
        Some(Err(error)) => {
            degraded.push(DegradedInput::MalformedBonusTiers {
                reason: error.to_string(),
            });
            Vec::new()
        }
        None => Vec::new(),
    };

    let flat = match (terms.bonus_threshold, terms.bonus_amount) {
        (Some(threshold), Some(amount)) => Some(Bonus::Flat { threshold, amount }),
        (None, None) => None,
        _ => {
            degraded.push(DegradedInput::IncompleteFlatBonus);
            None
        }
    };

    let bonus = if tiers.is_empty() {
        flat
    } else {
        if flat.is_some() {
            degraded.push(DegradedInput::FlatBonusShadowedByTiers);
        }
        Some(Bonus::Tiered { tiers })
    };

    let rules = CommissionRules {
        per_head,
        minimum_guests,
        bonus,
        fixed_fee: terms.fixed_fee,
        adjustment: terms.manual_adjustment_amount.map(|amount| ManualAdjustment {
            amount,
            reason: terms.manual_adjustment_reason.clone(),
        }),
        checkins_override: terms.manual_checkins_override.map(|count| CheckinOverride {
            count,
            reason: terms.manual_checkins_reason.clone(),
        }),
    };

    ResolvedRules { rules, degraded }
}

/// Resolves a stored contract, logging every degrade with its identifiers.
#[must_use]
pub fn resolve_contract(contract: &CommissionContract) -> ResolvedRules {
    let resolved = resolve(&contract.terms);
    for degrade in &resolved.degraded {
        tracing::warn!(
            event_id = %contract.event_id,
            promoter_id = %contract.promoter_id,
            contract_id = %contract.id,
            degrade = ?degrade,
            "Commission contract degraded at read time"
        );
    }
    resolved
}
