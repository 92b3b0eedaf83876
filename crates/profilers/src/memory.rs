//! Memory footprint measured with valgrind's massif tool.

use std::fs;

use metrics_store::MetricType;
use log::warn;

use crate::plugin::{AnalysisContext, Invocation, ProfilerPlugin, TraceFiles};
use crate::runner::stdout_of;
use crate::ProfilerError;

pub const PEAK_MEM_MIB: &str = "peak_mem_MiB";

const SNAPSHOT_FIELDS: [&str; 3] = ["mem_heap_B=", "mem_heap_extra_B=", "mem_stacks_B="];

/// Runs the workload under massif. The profiled program runs much slower.
pub struct MemoryProfiler {
    files: TraceFiles,
    graph: String,
}

impl MemoryProfiler {
    pub fn new(files: TraceFiles) -> Self {
        Self {
            files,
            graph: String::new(),
        }
    }
}

/// Largest total footprint over all snapshots of a massif output, in bytes
pub fn peak_bytes(massif_out: &str) -> Option<u64> {
    let mut peak = None;
    let mut current: Option<u64> = None;

    for line in massif_out.lines().map(str::trim) {
        if line.starts_with("snapshot=") {
            peak = peak.max(current.take());
            continue;
        }
        for field in SNAPSHOT_FIELDS {
            if let Some(value) = line.strip_prefix(field).and_then(|v| v.parse::<u64>().ok()) {
                *current.get_or_insert(0) += value;
            }
        }
    }
    peak.max(current)
}

impl ProfilerPlugin for MemoryProfiler {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn profile_command(&self, invocation: &Invocation) -> String {
        format!(
            "valgrind --trace-children=yes --tool=massif --pages-as-heap=yes --massif-out-file={} ",
            self.files.trace_file(invocation.rank).display()
        )
    }

    fn analyze(&mut self, ctx: &mut AnalysisContext<'_>) -> Result<(), ProfilerError> {
        for (rank, path) in self.files.outputs() {
            let text = fs::read_to_string(path).map_err(|source| ProfilerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            match peak_bytes(&text) {
                Some(bytes) => ctx.metrics.add(
                    *rank,
                    MetricType::Memory,
                    PEAK_MEM_MIB,
                    bytes as f64 / (1024.0 * 1024.0),
                ),
                None => warn!("no massif snapshot in {}", path.display()),
            }
        }

        // The text graph of the first artifact stands for the whole run
        if let Some((_, first)) = self.files.outputs().first() {
            let output = ctx
                .runner
                .run("ms_print", &[first.display().to_string()])?;
            self.graph = stdout_of("ms_print", output);
        }
        Ok(())
    }

    fn report(&self) -> Option<String> {
        if self.graph.is_empty() {
            None
        } else {
            Some(self.graph.clone())
        }
    }
}
