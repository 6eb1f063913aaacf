//! Check-in Aggregator.

use crate::rules::CheckinOverride;
use crate::types::{AttributedCheckIn, PromoterId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Counts valid check-ins per referring promoter.
///
/// Undone check-ins and check-ins whose registration has no referrer are ignored.
#[must_use]
pub fn aggregate(checkins: &[AttributedCheckIn]) -> HashMap<PromoterId, u32> {
    let mut counts = HashMap::new();
    for attributed in checkins {
        if !attributed.check_in.is_valid() {
            continue;
        }
        if let Some(promoter_id) = attributed.referred_by {
            *counts.entry(promoter_id).or_insert(0) += 1;
        }
    }
    counts
}

/// The count used in payout math, with the aggregated count kept for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveCount {
    /// Count fed to the calculator
    pub effective: u32,
    /// Aggregated count ("actual: N")
    pub actual: u32,
    /// Whether a manual override replaced the actual count
    pub overridden: bool,
    /// Why it was overridden
    pub override_reason: Option<String>,
}

impl EffectiveCount {
    /// The override when present, else the aggregated count.
    #[must_use]
    pub fn resolve(actual: u32, checkins_override: Option<&CheckinOverride>) -> Self {
        match checkins_override {
            Some(overridden) => Self {
                effective: overridden.count,
                actual,
                overridden: true,
                override_reason: overridden.reason.clone(),
            },
            None => Self {
                effective: actual,
                actual,
                overridden: false,
                override_reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckIn, CheckInId, RegistrationId};
    use chrono::{TimeZone, Utc};

    fn check_in(referred_by: Option<PromoterId>, undone: bool) -> AttributedCheckIn {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).single().unwrap_or_default();
        AttributedCheckIn {
            check_in: CheckIn {
                id: CheckInId::new(),
                registration_id: RegistrationId::new(),
                checked_in_at: at,
                undo_at: undone.then_some(at),
            },
            referred_by,
        }
    }

    #[test]
    fn counts_only_valid_attributed_checkins() {
        let alice = PromoterId::new();
        let bob = PromoterId::new();
        let checkins = vec![
            check_in(Some(alice), false),
            check_in(Some(alice), false),
            check_in(Some(alice), true),
            check_in(Some(bob), false),
            check_in(None, false),
        ];

        let counts = aggregate(&checkins);
        assert_eq!(counts.get(&alice), Some(&2));
        assert_eq!(counts.get(&bob), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn promoter_with_only_undone_checkins_is_absent() {
        let alice = PromoterId::new();
        let counts = aggregate(&[check_in(Some(alice), true)]);
        assert!(counts.get(&alice).is_none());
    }

    #[test]
    fn override_replaces_count_but_keeps_actual() {
        let overridden = CheckinOverride {
            count: 10,
            reason: Some("scanner outage".to_string()),
        };
        let count = EffectiveCount::resolve(37, Some(&overridden));
        assert_eq!(count.effective, 10);
        assert_eq!(count.actual, 37);
        assert!(count.overridden);
        assert_eq!(count.override_reason.as_deref(), Some("scanner outage"));
    }

    #[test]
    fn zero_override_is_still_an_override() {
        let overridden = CheckinOverride { count: 0, reason: None };
        assert_eq!(EffectiveCount::resolve(12, Some(&overridden)).effective, 0);
    }

    #[test]
    fn no_override_uses_actual() {
        let count = EffectiveCount::resolve(37, None);
        assert_eq!(count.effective, 37);
        assert!(!count.overridden);
    }
}
