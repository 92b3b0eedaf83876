//! Instruction-pointer sampling with `perf record`, classified into
//! assembly mnemonics and symbols.

use std::path::Path;

use metrics_store::{analyze_vectorization, MetricType};
use log::{debug, info, warn};

use crate::flamegraph::render_flame_graph;
use crate::mmap::BinaryMapping;
use crate::plugin::{AnalysisContext, Invocation, ProfilerPlugin, TraceFiles};
use crate::runner::stdout_of;
use crate::symbols::UNKNOWN_MNEMONIC;
use crate::ProfilerError;

#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Sampling frequency in Hz
    pub frequency: u32,
    /// Render `flames_<rank>.svg` beside every artifact
    pub flame_graph: bool,
    /// Mnemonics and symbols never above this percentage are dropped
    pub prune_threshold: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            frequency: 99,
            flame_graph: false,
            prune_threshold: 1.0,
        }
    }
}

/// One sample of `perf script -G -f ip,sym,dso`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample<'a> {
    pub ip: u64,
    pub symbol: &'a str,
    pub binary: &'a str,
}

/// Parses `<ip> <symbol> (<binary>)`. The symbol may contain spaces or be
/// empty.
pub fn parse_sample_line(line: &str) -> Option<Sample<'_>> {
    let line = line.trim();
    let head = line.strip_suffix(')')?;
    let open = head.rfind(" (")?;
    let binary = &head[open + 2..];

    let head = head[..open].trim();
    let (ip, symbol) = match head.split_once(char::is_whitespace) {
        Some((ip, symbol)) => (ip, symbol.trim()),
        None => (head, ""),
    };
    let ip = u64::from_str_radix(ip, 16).ok()?;

    Some(Sample {
        ip,
        symbol: if symbol.is_empty() { "[unknown]" } else { symbol },
        binary,
    })
}

/// Samples instruction pointers and reports the instruction, symbol and
/// vectorization mix of every rank.
pub struct InstructionSampleProfiler {
    config: SampleConfig,
    files: TraceFiles,
}

impl InstructionSampleProfiler {
    pub fn new(config: SampleConfig, files: TraceFiles) -> Self {
        Self { config, files }
    }

    fn perf_script(
        ctx: &AnalysisContext<'_>,
        artifact: &Path,
        options: &[&str],
    ) -> Result<String, ProfilerError> {
        let mut args = vec!["script".to_string(), "-i".to_string(), artifact.display().to_string()];
        args.extend(options.iter().map(|option| option.to_string()));
        Ok(stdout_of("perf", ctx.runner.run("perf", &args)?))
    }
}

impl ProfilerPlugin for InstructionSampleProfiler {
    fn name(&self) -> &'static str {
        "samples"
    }

    fn profile_command(&self, invocation: &Invocation) -> String {
        let pid = invocation
            .pid
            .map(|pid| format!("--pid={} ", pid))
            .unwrap_or_default();
        format!(
            "perf record -g {}-F {} -o {} ",
            pid,
            self.config.frequency,
            self.files.trace_file(invocation.rank).display()
        )
    }

    fn analyze(&mut self, ctx: &mut AnalysisContext<'_>) -> Result<(), ProfilerError> {
        for (rank, artifact) in self.files.outputs() {
            let rank = *rank;

            let mapping = BinaryMapping::parse(&Self::perf_script(
                ctx,
                artifact,
                &["--show-mmap-events"],
            )?);
            let samples = Self::perf_script(ctx, artifact, &["-G", "-f", "ip,sym,dso"])?;

            let mut sample_count = 0u64;
            for sample in samples.lines().filter_map(parse_sample_line) {
                let binary = Path::new(sample.binary);
                // [kernel.kallsyms] and vanished files cannot be disassembled
                let mnemonic = if binary.exists() {
                    ctx.symbols.resolve(binary, sample.ip, mapping.load_base(binary))
                } else {
                    UNKNOWN_MNEMONIC.to_string()
                };

                ctx.metrics.increment(rank, MetricType::Assembly, &mnemonic);
                ctx.metrics.increment(rank, MetricType::Symbols, sample.symbol);
                sample_count += 1;
            }

            let (hits, misses) = ctx.symbols.stats();
            debug!(
                "rank {}: {} samples, {} binaries mapped, symbol cache {} hits / {} misses",
                rank,
                sample_count,
                mapping.len(),
                hits,
                misses
            );

            // Vectorization is derived from raw counts, before normalisation
            analyze_vectorization(ctx.metrics, rank);
            ctx.metrics.to_ratios(MetricType::Assembly, rank, 1.0);
            ctx.metrics.to_ratios(MetricType::Symbols, rank, 1.0);

            if self.config.flame_graph {
                let stacks = Self::perf_script(ctx, artifact, &[])?;
                let svg = artifact
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(format!("flames_{}.svg", rank));
                match render_flame_graph(&stacks, &svg) {
                    Ok(()) => info!("flame graph of rank {} written to {}", rank, svg.display()),
                    Err(e) => warn!("no flame graph for rank {}: {}", rank, e),
                }
            }
        }

        ctx.metrics
            .prune_low_ratio(MetricType::Symbols, self.config.prune_threshold);
        ctx.metrics
            .prune_low_ratio(MetricType::Assembly, self.config.prune_threshold);
        Ok(())
    }
}
