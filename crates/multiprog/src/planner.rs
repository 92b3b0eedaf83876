use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use metrics_store::Rank;

use crate::Error;

/// Contiguous run of ranks sharing the same treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankInterval {
    pub first: Rank,
    pub last: Rank,
    /// Ranks of this run start under the instrumentation wrapper
    pub instrumented: bool,
}

impl RankInterval {
    fn single(rank: Rank, instrumented: bool) -> Self {
        Self {
            first: rank,
            last: rank,
            instrumented,
        }
    }

    /// Ranks covered, both ends included
    pub fn ranks(&self) -> RangeInclusive<Rank> {
        self.first..=self.last
    }

    /// Number of ranks in the interval
    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }
}

/// Formats as `{rank}` for a single rank and `{first}-{last}` otherwise.
impl fmt::Display for RankInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Splits `[0, total_ranks - 1]` into maximal runs of instrumented and plain
/// ranks.
#[derive(Debug, Clone)]
pub struct RankIntervalPlanner {
    total_ranks: Rank,
    /// `None` instruments every rank
    selected: Option<BTreeSet<Rank>>,
}

impl RankIntervalPlanner {
    /// Creates a planner for a job of `total_ranks` ranks.
    ///
    /// An empty selection instruments every rank. Selected ranks outside the
    /// job are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRankCount` when `total_ranks` is not positive or does
    /// not fit the rank type.
    pub fn new(
        total_ranks: i64,
        selected: impl IntoIterator<Item = Rank>,
    ) -> Result<Self, Error> {
        if total_ranks <= 0 || total_ranks > i64::from(Rank::MAX) {
            return Err(Error::InvalidRankCount(total_ranks));
        }
        let total_ranks = total_ranks as Rank;

        let mut selected = selected.into_iter().peekable();
        let selected = if selected.peek().is_none() {
            None
        } else {
            Some(selected.filter(|&rank| rank < total_ranks).collect())
        };

        Ok(Self {
            total_ranks,
            selected,
        })
    }

    pub fn total_ranks(&self) -> Rank {
        self.total_ranks
    }

    /// Whether `rank` starts under instrumentation
    pub fn is_instrumented(&self, rank: Rank) -> bool {
        match &self.selected {
            None => rank < self.total_ranks,
            Some(selected) => selected.contains(&rank),
        }
    }

    /// Run-length encodes the instrumented predicate over all ranks, in
    /// ascending order. Adjacent intervals always differ in treatment.
    pub fn plan(&self) -> Vec<RankInterval> {
        let mut intervals = Vec::new();
        let mut open = RankInterval::single(0, self.is_instrumented(0));

        for rank in 1..self.total_ranks {
            let instrumented = self.is_instrumented(rank);
            if instrumented == open.instrumented {
                open.last = rank;
            } else {
                intervals.push(open);
                open = RankInterval::single(rank, instrumented);
            }
        }
        intervals.push(open);

        intervals
    }
}

/// Pair of commands a launcher runs per interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiProgConfig {
    /// Instrumentation wrapper; `%t` is replaced by the launcher with the task id
    pub instrumented_command: String,
    /// The unmodified workload
    pub plain_command: String,
}

impl MultiProgConfig {
    pub fn new(instrumented_command: impl Into<String>, plain_command: impl Into<String>) -> Self {
        Self {
            instrumented_command: instrumented_command.into(),
            plain_command: plain_command.into(),
        }
    }

    /// One `<rank-or-range> <command>` line
    pub fn line(&self, interval: &RankInterval) -> String {
        let command = if interval.instrumented {
            &self.instrumented_command
        } else {
            &self.plain_command
        };
        format!("{} {}", interval, command)
    }

    /// Full configuration file contents, newline terminated
    pub fn render(&self, intervals: &[RankInterval]) -> String {
        intervals
            .iter()
            .map(|interval| self.line(interval) + "\n")
            .collect()
    }
}
