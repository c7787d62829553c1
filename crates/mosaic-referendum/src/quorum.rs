//! Quorum arithmetic and "how far from passing" helpers.
//!
//! The board's API reports `yes_votes_needed` on open proposals so voters
//! can see how far each one is from passing.

use crate::gate::{ReferendumRules, Tally};

/// Check if a vote total meets quorum.
pub const fn meets_quorum(total: u64, quorum: u64) -> bool {
    total >= quorum
}

/// How many more voters are needed to reach quorum.
pub const fn votes_needed_for_quorum(total: u64, quorum: u64) -> u64 {
    if total >= quorum {
        0
    } else {
        quorum - total
    }
}

/// Minimum number of additional yes votes that would make `tally` pass.
///
/// Returns `None` when no number of yes votes can pass it (a threshold of
/// 100% with at least one no vote already cast).
pub fn yes_votes_needed(tally: &Tally, rules: &ReferendumRules) -> Option<u64> {
    let f = rules.approval_fraction();
    if f >= 1.0 && tally.no > 0 {
        return None;
    }

    let total = tally.total() as f64;
    // (yes + k) / (total + k) >= f  <=>  k >= (f * total - yes) / (1 - f)
    let by_approval = if f >= 1.0 {
        0.0
    } else {
        ((f * total - tally.yes as f64) / (1.0 - f)).max(0.0).ceil()
    };
    let by_quorum = votes_needed_for_quorum(tally.total(), rules.quorum());
    let mut k = (by_approval as u64).max(by_quorum);

    // Float rounding can land one off either way
    while k > by_quorum && rules.admits(&Tally::new(tally.yes + k - 1, tally.no)) {
        k -= 1;
    }
    while !rules.admits(&Tally::new(tally.yes + k, tally.no)) {
        k += 1;
    }
    Some(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_needed_calculation() {
        assert_eq!(votes_needed_for_quorum(0, 0), 0);
        assert_eq!(votes_needed_for_quorum(0, 5), 5);
        assert_eq!(votes_needed_for_quorum(3, 5), 2);
        assert_eq!(votes_needed_for_quorum(9, 5), 0);
    }

    #[test]
    fn yes_needed_for_quorum_only() {
        let rules = ReferendumRules::new(5, 0.51).unwrap();
        assert_eq!(yes_votes_needed(&Tally::new(2, 0), &rules), Some(3));
    }

    #[test]
    fn yes_needed_for_approval() {
        let rules = ReferendumRules::new(1, 0.51).unwrap();
        // 2 yes / 5 no: three more gives 5/10 (fails), four gives 6/11
        assert_eq!(yes_votes_needed(&Tally::new(2, 5), &rules), Some(4));
    }

    #[test]
    fn already_passing_needs_nothing() {
        let rules = ReferendumRules::new(3, 0.5).unwrap();
        assert_eq!(yes_votes_needed(&Tally::new(3, 1), &rules), Some(0));
    }

    #[test]
    fn unanimity_blocked_by_a_no() {
        let rules = ReferendumRules::new(1, 1.0).unwrap();
        assert_eq!(yes_votes_needed(&Tally::new(10, 1), &rules), None);
        assert_eq!(yes_votes_needed(&Tally::new(0, 0), &rules), Some(1));
    }
}
