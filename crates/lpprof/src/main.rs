use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use multiprog::parse_rank_list;
use profilers::SystemRunner;

mod config;
mod report;
mod session;

use config::{LaunchMode, ProfilerKind, SessionConfig};
use session::Session;

/// Profiles a workload, a parallel job or running processes with perf and
/// valgrind, and reports per-rank metrics
#[derive(Debug, Parser)]
#[command(name = "lpprof")]
struct Command {
    /// Verbose debug output
    #[arg(short, long)]
    verbose: bool,

    /// How the workload is started
    #[arg(short, long, value_enum, default_value = "std")]
    launcher: LaunchMode,

    /// Extra arguments for the job launcher
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    launcher_args: String,

    /// Number of tasks of the parallel job
    #[arg(short, long, env = "SLURM_NTASKS")]
    ntasks: Option<i64>,

    /// Ranks to instrument, e.g. "0,2,5-7" (default: all)
    #[arg(short, long, default_value = "")]
    ranks: String,

    /// Running processes to attach to, one rank each
    #[arg(short, long, value_delimiter = ',')]
    pids: Vec<u32>,

    /// Seconds to follow attached processes
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Sampling frequency in Hz
    #[arg(short, long, default_value = "99")]
    frequency: u32,

    /// Profilers to enable
    #[arg(long, value_enum, value_delimiter = ',', default_value = "samples,hwc")]
    profilers: Vec<ProfilerKind>,

    /// Directory receiving the profiling artifacts
    #[arg(short, long, default_value = "PERF")]
    output_dir: PathBuf,

    /// Render a flame graph per sampled rank
    #[arg(long)]
    flame_graph: bool,

    /// Workload command line
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    workload: Vec<String>,
}

impl Command {
    fn into_config(self) -> Result<SessionConfig> {
        let ranks = parse_rank_list(&self.ranks).context("bad --ranks")?;
        Ok(SessionConfig {
            mode: self.launcher,
            workload: self.workload,
            ntasks: self.ntasks,
            ranks,
            pids: self.pids,
            duration_secs: self.duration,
            frequency: self.frequency,
            profilers: self.profilers,
            output_dir: self.output_dir,
            flame_graph: self.flame_graph,
            launcher_args: self.launcher_args,
        })
    }
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let default_level = if opts.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = opts.into_config()?;
    let mut session = Session::new(config, SystemRunner)?;
    session.launch()?;
    session.analyze()?;
    debug!(
        "metrics recorded for {:?}",
        session.metrics().metric_types()
    );
    println!("{}", session.report());
    Ok(())
}
