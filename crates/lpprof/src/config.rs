use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::ValueEnum;
use metrics_store::Rank;

/// How the workload is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LaunchMode {
    /// One process, run directly
    Std,
    /// Parallel job through `srun --multi-prog`
    Srun,
    /// Already running processes, one rank per pid
    Attach,
}

/// Profilers that can be enabled for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfilerKind {
    /// `perf stat` hardware counters
    Hwc,
    /// `perf record` instruction samples
    Samples,
    /// valgrind massif memory footprint
    Memory,
}

/// Everything a profiling session needs, resolved up front.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: LaunchMode,
    /// Workload command line; unused when attaching
    pub workload: Vec<String>,
    /// Total ranks of the parallel job
    pub ntasks: Option<i64>,
    /// Ranks to instrument, empty for all
    pub ranks: BTreeSet<Rank>,
    /// Processes to attach to
    pub pids: Vec<u32>,
    /// How long to profile attached processes, in seconds
    pub duration_secs: u64,
    /// Sampling frequency in Hz
    pub frequency: u32,
    pub profilers: Vec<ProfilerKind>,
    /// Where artifacts, launcher files and flame graphs are written
    pub output_dir: PathBuf,
    pub flame_graph: bool,
    /// Extra arguments passed verbatim to the launcher
    pub launcher_args: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: LaunchMode::Std,
            workload: Vec::new(),
            ntasks: None,
            ranks: BTreeSet::new(),
            pids: Vec::new(),
            duration_secs: 10,
            frequency: 99,
            profilers: vec![ProfilerKind::Samples, ProfilerKind::Hwc],
            output_dir: PathBuf::from("PERF"),
            flame_graph: false,
            launcher_args: String::new(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.profilers.is_empty() {
            bail!("no profiler enabled");
        }
        match self.mode {
            LaunchMode::Std | LaunchMode::Srun if self.workload.is_empty() => {
                bail!("no workload command given")
            }
            LaunchMode::Srun if self.ntasks.is_none() => {
                bail!("srun needs the number of tasks (--ntasks or SLURM_NTASKS)")
            }
            LaunchMode::Attach if self.pids.is_empty() => {
                bail!("attach needs at least one pid")
            }
            LaunchMode::Attach if self.profilers.contains(&ProfilerKind::Memory) => {
                bail!("the memory profiler cannot attach to a running process")
            }
            LaunchMode::Attach if self.duration_secs == 0 => {
                bail!("attach needs a non-zero duration")
            }
            _ => Ok(()),
        }
    }
}
