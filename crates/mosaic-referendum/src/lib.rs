//! Referendum Gate
//!
//! Community votes decide whether a proposal is even eligible for
//! allocation. A proposal passes when two conditions hold:
//!
//! 1. **Quorum**: at least `quorum` distinct voters took part
//! 2. **Approval**: `yes / (yes + no) >= approval_fraction`
//!
//! The gate is a pure function of an already-tallied vote count. It never
//! mutates proposals and never looks at bids or geometry; those belong to
//! the allocation pass that runs afterwards.
//!
//! # Administrative override
//!
//! A forced decision always passes. Operators use it to bootstrap an empty
//! board or to exercise the pipeline in tests without collecting votes.

mod error;
mod gate;
mod quorum;

pub use error::ReferendumError;
pub use gate::{decide, FailReason, ReferendumRules, Tally, Verdict};
pub use quorum::{meets_quorum, votes_needed_for_quorum, yes_votes_needed};
