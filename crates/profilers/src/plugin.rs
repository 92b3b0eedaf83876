use std::path::{Path, PathBuf};

use metrics_store::{MetricsStore, Rank};

use crate::runner::ToolRunner;
use crate::symbols::SymbolResolutionCache;
use crate::ProfilerError;

/// Process a profiling command is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Rank of the profiled process; `None` for a single-process run
    pub rank: Option<Rank>,
    /// Running process to attach to instead of launching the workload
    pub pid: Option<u32>,
}

impl Invocation {
    pub fn standalone() -> Self {
        Self::default()
    }

    pub fn rank(rank: Rank) -> Self {
        Self {
            rank: Some(rank),
            pid: None,
        }
    }

    pub fn attach(rank: Rank, pid: u32) -> Self {
        Self {
            rank: Some(rank),
            pid: Some(pid),
        }
    }
}

/// Shared state handed to every plugin during analysis.
pub struct AnalysisContext<'a> {
    pub metrics: &'a mut MetricsStore,
    pub symbols: &'a mut SymbolResolutionCache,
    pub runner: &'a dyn ToolRunner,
}

/// Contract implemented by each instrumentation flavor.
pub trait ProfilerPlugin {
    /// Short name used in logs and reports
    fn name(&self) -> &'static str;

    /// Command prefix that runs the workload (or follows `invocation.pid`)
    /// under this profiler. Ends with a space so prefixes can be chained.
    fn profile_command(&self, invocation: &Invocation) -> String;

    /// Reads every per-rank artifact and records metrics in `ctx.metrics`
    fn analyze(&mut self, ctx: &mut AnalysisContext<'_>) -> Result<(), ProfilerError>;

    /// Free-form text appended to the report
    fn report(&self) -> Option<String> {
        None
    }
}

/// Where a plugin writes its artifacts and which rank each one belongs to.
///
/// Rank-specific artifacts are named `<stem>_<rank>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFiles {
    stem: PathBuf,
    outputs: Vec<(Rank, PathBuf)>,
    per_rank: bool,
}

impl TraceFiles {
    /// A single artifact at `stem`, attributed to rank 0
    pub fn single(stem: impl Into<PathBuf>) -> Self {
        let stem = stem.into();
        Self {
            outputs: vec![(0, stem.clone())],
            stem,
            per_rank: false,
        }
    }

    /// One `<stem>_<rank>` artifact per rank
    pub fn per_rank(stem: impl Into<PathBuf>, ranks: impl IntoIterator<Item = Rank>) -> Self {
        let stem = stem.into();
        let outputs = ranks
            .into_iter()
            .map(|rank| (rank, rank_file(&stem, rank)))
            .collect();
        Self {
            stem,
            outputs,
            per_rank: true,
        }
    }

    /// Artifact path for a profiled process
    pub fn trace_file(&self, rank: Option<Rank>) -> PathBuf {
        match rank {
            Some(rank) if self.per_rank => rank_file(&self.stem, rank),
            _ => self.stem.clone(),
        }
    }

    pub fn outputs(&self) -> &[(Rank, PathBuf)] {
        &self.outputs
    }
}

fn rank_file(stem: &Path, rank: Rank) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(format!("_{}", rank));
    PathBuf::from(name)
}
