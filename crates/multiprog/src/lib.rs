//! # multiprog
//!
//! Decides which ranks of a parallel job run under instrumentation and which
//! run the plain workload, and renders the result as a job launcher
//! multi-program configuration (one `<rank-or-range> <command>` line per
//! contiguous run of ranks).
//!
//! ```
//! use std::collections::BTreeSet;
//! use multiprog::{MultiProgConfig, RankIntervalPlanner};
//!
//! let selected: BTreeSet<u32> = [1, 2].into_iter().collect();
//! let intervals = RankIntervalPlanner::new(4, selected).unwrap().plan();
//!
//! let config = MultiProgConfig::new("./lpprof_wrapper.sh %t", "./a.out");
//! assert_eq!(
//!     config.render(&intervals),
//!     "0 ./a.out\n1-2 ./lpprof_wrapper.sh %t\n3 ./a.out\n"
//! );
//! ```

pub mod planner;
pub mod rank_list;

pub use planner::*;
pub use rank_list::parse_rank_list;

use thiserror::Error;

/// Errors raised while planning rank intervals
#[derive(Error, Debug, PartialEq)]
pub enum Error {
    /// A job needs at least one rank
    #[error("invalid rank count {0}: a job needs at least one rank")]
    InvalidRankCount(i64),

    /// A rank list could not be parsed
    #[error("invalid rank list {list:?}: {reason}")]
    InvalidRankList { list: String, reason: String },
}
