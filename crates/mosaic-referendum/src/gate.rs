//! Pass/fail decision for a tallied proposal.

use crate::error::ReferendumError;
use crate::quorum::meets_quorum;

/// Yes/no vote counts for one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tally {
    pub yes: u64,
    pub no: u64,
}

impl Tally {
    pub const fn new(yes: u64, no: u64) -> Self {
        Self { yes, no }
    }

    /// Total number of voters.
    pub const fn total(&self) -> u64 {
        self.yes + self.no
    }

    /// Fraction of yes votes. An empty tally has zero approval.
    pub fn approval(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.yes as f64 / total as f64
        }
    }
}

/// Quorum and approval threshold, validated once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferendumRules {
    quorum: u64,
    approval_fraction: f64,
}

impl ReferendumRules {
    /// Build rules, rejecting an approval fraction outside `[0, 1]`.
    pub fn new(quorum: u64, approval_fraction: f64) -> Result<Self, ReferendumError> {
        let rules = Self {
            quorum,
            approval_fraction,
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Check the approval fraction is a real number in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ReferendumError> {
        if !(0.0..=1.0).contains(&self.approval_fraction) {
            return Err(ReferendumError::InvalidApprovalFraction(self.approval_fraction));
        }
        Ok(())
    }

    pub const fn quorum(&self) -> u64 {
        self.quorum
    }

    pub const fn approval_fraction(&self) -> f64 {
        self.approval_fraction
    }

    /// True if `tally` satisfies both quorum and approval.
    pub fn admits(&self, tally: &Tally) -> bool {
        meets_quorum(tally.total(), self.quorum) && tally.approval() >= self.approval_fraction
    }
}

impl Default for ReferendumRules {
    fn default() -> Self {
        Self {
            quorum: 5,
            approval_fraction: 0.51,
        }
    }
}

/// Why a proposal failed its referendum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailReason {
    /// Not enough voters took part
    BelowQuorum { total: u64, quorum: u64 },
    /// Quorum met but the yes share is too low
    InsufficientApproval { approval: f64, required: f64 },
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailReason::BelowQuorum { total, quorum } => {
                write!(f, "{} votes cast, quorum is {}", total, quorum)
            }
            FailReason::InsufficientApproval { approval, required } => write!(
                f,
                "approval {:.1}% below required {:.1}%",
                approval * 100.0,
                required * 100.0
            ),
        }
    }
}

/// Outcome of the referendum gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Passed,
    Failed(FailReason),
}

impl Verdict {
    pub const fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

/// Decide a proposal's referendum.
///
/// `force` bypasses quorum and approval entirely.
pub fn decide(tally: &Tally, rules: &ReferendumRules, force: bool) -> Verdict {
    if force {
        return Verdict::Passed;
    }

    let total = tally.total();
    if !meets_quorum(total, rules.quorum) {
        return Verdict::Failed(FailReason::BelowQuorum {
            total,
            quorum: rules.quorum,
        });
    }

    let approval = tally.approval();
    if approval >= rules.approval_fraction {
        Verdict::Passed
    } else {
        Verdict::Failed(FailReason::InsufficientApproval {
            approval,
            required: rules.approval_fraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rules(quorum: u64, fraction: f64) -> ReferendumRules {
        ReferendumRules::new(quorum, fraction).unwrap()
    }

    #[test]
    fn force_always_passes() {
        let r = rules(100, 1.0);
        assert_eq!(decide(&Tally::new(0, 50), &r, true), Verdict::Passed);
        assert_eq!(decide(&Tally::default(), &r, true), Verdict::Passed);
    }

    #[test]
    fn below_quorum_fails_even_when_unanimous() {
        let r = rules(5, 0.51);
        assert_eq!(
            decide(&Tally::new(4, 0), &r, false),
            Verdict::Failed(FailReason::BelowQuorum { total: 4, quorum: 5 })
        );
    }

    #[test]
    fn approval_boundary_is_inclusive() {
        let r = rules(4, 0.5);
        assert!(decide(&Tally::new(2, 2), &r, false).is_passed());
        assert!(!decide(&Tally::new(1, 3), &r, false).is_passed());
    }

    #[test]
    fn empty_tally_has_zero_approval() {
        assert_eq!(Tally::default().approval(), 0.0);
        // Zero quorum and zero threshold: an empty tally passes
        assert!(decide(&Tally::default(), &rules(0, 0.0), false).is_passed());
        // Zero quorum but a real threshold: it does not
        assert!(!decide(&Tally::default(), &rules(0, 0.51), false).is_passed());
    }

    #[test]
    fn invalid_fraction_rejected() {
        assert!(ReferendumRules::new(1, 1.5).is_err());
        assert!(ReferendumRules::new(1, -0.1).is_err());
        assert!(ReferendumRules::new(1, f64::NAN).is_err());
    }

    #[test]
    fn fail_reason_is_readable() {
        let reason = FailReason::BelowQuorum { total: 2, quorum: 5 };
        assert_eq!(reason.to_string(), "2 votes cast, quorum is 5");
    }

    proptest! {
        #[test]
        fn decide_matches_admits(yes in 0u64..50, no in 0u64..50, quorum in 0u64..20, pct in 0u32..=100) {
            let r = rules(quorum, pct as f64 / 100.0);
            let t = Tally::new(yes, no);
            prop_assert_eq!(decide(&t, &r, false).is_passed(), r.admits(&t));
        }

        #[test]
        fn adding_yes_never_hurts(yes in 0u64..50, no in 0u64..50, quorum in 0u64..20, pct in 0u32..=100) {
            let r = rules(quorum, pct as f64 / 100.0);
            let before = decide(&Tally::new(yes, no), &r, false).is_passed();
            let after = decide(&Tally::new(yes + 1, no), &r, false).is_passed();
            prop_assert!(!before || after);
        }
    }
}
