use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use metrics_store::{MetricsStore, Rank};
use multiprog::{MultiProgConfig, RankIntervalPlanner};
use profilers::{
    AnalysisContext, HardwareCounterProfiler, HwcConfig, InstructionSampleProfiler, Invocation,
    MemoryProfiler, Objdump, ProfilerPlugin, SampleConfig, SymbolResolutionCache, ToolRunner,
    TraceFiles,
};

use crate::config::{LaunchMode, ProfilerKind, SessionConfig};
use crate::report;

const WRAPPER_SCRIPT: &str = "lpprof_wrapper.sh";
const MULTIPROG_CONF: &str = "lpprofiler.conf";

/// One profiling run: launch, analysis and report.
///
/// The session owns the metrics store and hands it, together with a symbol
/// cache living for the analysis phase, to every plugin in turn.
pub struct Session<R> {
    config: SessionConfig,
    runner: R,
    planner: Option<RankIntervalPlanner>,
    plugins: Vec<Box<dyn ProfilerPlugin>>,
    metrics: MetricsStore,
}

impl<R: ToolRunner + Clone + 'static> Session<R> {
    pub fn new(config: SessionConfig, runner: R) -> Result<Self> {
        config.validate()?;

        let planner = match (config.mode, config.ntasks) {
            (LaunchMode::Srun, Some(ntasks)) => Some(
                RankIntervalPlanner::new(ntasks, config.ranks.iter().copied())
                    .context("cannot plan the instrumented ranks")?,
            ),
            _ => None,
        };

        let ranks: Vec<Rank> = match (&planner, config.mode) {
            (Some(planner), _) => planner
                .plan()
                .iter()
                .filter(|interval| interval.instrumented)
                .flat_map(|interval| interval.ranks())
                .collect(),
            (None, LaunchMode::Attach) => (0..config.pids.len() as Rank).collect(),
            (None, _) => Vec::new(),
        };
        if planner.is_some() && ranks.is_empty() {
            warn!("none of the selected ranks exists, the job runs uninstrumented");
        }

        let files = |stem: &str| {
            let stem = config.output_dir.join(stem);
            match config.mode {
                LaunchMode::Std => TraceFiles::single(stem),
                LaunchMode::Srun | LaunchMode::Attach => {
                    TraceFiles::per_rank(stem, ranks.iter().copied())
                }
            }
        };

        let mut plugins: Vec<Box<dyn ProfilerPlugin>> = Vec::new();
        for kind in &config.profilers {
            let plugin: Box<dyn ProfilerPlugin> = match kind {
                ProfilerKind::Hwc => Box::new(HardwareCounterProfiler::new(
                    HwcConfig::default(),
                    files("perf.stats"),
                )),
                ProfilerKind::Samples => Box::new(InstructionSampleProfiler::new(
                    SampleConfig {
                        frequency: config.frequency,
                        flame_graph: config.flame_graph,
                        ..SampleConfig::default()
                    },
                    files("perf.data"),
                )),
                ProfilerKind::Memory => Box::new(MemoryProfiler::new(files("massif.out"))),
            };
            plugins.push(plugin);
        }

        Ok(Self {
            config,
            runner,
            planner,
            plugins,
            metrics: MetricsStore::new(),
        })
    }

    /// Runs the workload, or follows the attached processes, under every
    /// enabled profiler.
    pub fn launch(&self) -> Result<()> {
        let output_dir = &self.config.output_dir;
        fs::create_dir_all(output_dir)
            .with_context(|| format!("cannot create {}", output_dir.display()))?;

        let command_line = match self.config.mode {
            LaunchMode::Std => format!(
                "{}{}",
                self.prefix(&Invocation::standalone()),
                self.workload()
            ),
            LaunchMode::Srun => self.prepare_multi_prog()?,
            LaunchMode::Attach => self.attach_command(),
        };

        info!("start profiling: {}", command_line);
        let output = self
            .runner
            .run_shell(&command_line)
            .context("cannot start the profiled run")?;
        if output.success() {
            info!("profiled run finished");
        } else {
            warn!(
                "profiled run exited with status {:?}, analysing the artifacts left behind",
                output.status
            );
        }
        Ok(())
    }

    /// Feeds every plugin's artifacts into the metrics store, in plugin order
    pub fn analyze(&mut self) -> Result<()> {
        let mut symbols = SymbolResolutionCache::new(Box::new(Objdump::new(self.runner.clone())));

        for plugin in &mut self.plugins {
            info!("analysing {} artifacts", plugin.name());
            let mut ctx = AnalysisContext {
                metrics: &mut self.metrics,
                symbols: &mut symbols,
                runner: &self.runner,
            };
            plugin
                .analyze(&mut ctx)
                .with_context(|| format!("{} analysis failed", plugin.name()))?;
        }

        debug!("{} instructions resolved", symbols.len());
        Ok(())
    }

    pub fn report(&self) -> String {
        let plugin_reports: Vec<(&str, String)> = self
            .plugins
            .iter()
            .filter_map(|plugin| plugin.report().map(|text| (plugin.name(), text)))
            .collect();
        format!(
            "{}\n{}",
            report::header(),
            report::render(&self.metrics, &plugin_reports)
        )
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    fn workload(&self) -> String {
        self.config.workload.join(" ")
    }

    /// Chained profiler prefixes for one process
    fn prefix(&self, invocation: &Invocation) -> String {
        self.plugins
            .iter()
            .map(|plugin| plugin.profile_command(invocation))
            .collect()
    }

    /// Writes the wrapper script and the multi-program configuration, and
    /// returns the launcher command line.
    fn prepare_multi_prog(&self) -> Result<String> {
        let Some(planner) = &self.planner else {
            anyhow::bail!("srun launch without a rank plan");
        };

        let wrapper = self.config.output_dir.join(WRAPPER_SCRIPT);
        write_file(&wrapper, &self.wrapper_script(planner))?;
        fs::set_permissions(&wrapper, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("cannot make {} executable", wrapper.display()))?;

        let conf = self.config.output_dir.join(MULTIPROG_CONF);
        let multi_prog =
            MultiProgConfig::new(format!("{} %t", wrapper.display()), self.workload());
        write_file(&conf, &multi_prog.render(&planner.plan()))?;

        Ok(["srun", self.config.launcher_args.trim(), "--multi-prog"]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.to_string())
            .chain([conf.display().to_string()])
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// `sh` script started by the launcher with the task id as `$1`
    fn wrapper_script(&self, planner: &RankIntervalPlanner) -> String {
        let workload = self.workload();
        let mut script = String::from("#!/bin/sh\ncase \"$1\" in\n");
        for rank in (0..planner.total_ranks()).filter(|&rank| planner.is_instrumented(rank)) {
            script.push_str(&format!(
                "  {}) exec {}{} ;;\n",
                rank,
                self.prefix(&Invocation::rank(rank)),
                workload
            ));
        }
        script.push_str(&format!("  *) exec {} ;;\nesac\n", workload));
        script
    }

    /// Every pid is followed concurrently for the configured duration
    fn attach_command(&self) -> String {
        let followers: Vec<String> = self
            .config
            .pids
            .iter()
            .zip(0..)
            .map(|(&pid, rank)| {
                format!(
                    "{}sleep {}",
                    self.prefix(&Invocation::attach(rank, pid)),
                    self.config.duration_secs
                )
            })
            .collect();
        format!("{} & wait", followers.join(" & "))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("cannot write {}", path.display()))
}
