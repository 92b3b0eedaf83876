//! # profilers
//!
//! Profiler plugins and the external-tool plumbing they share.
//!
//! A [`ProfilerPlugin`] knows how to prefix a workload with its profiling
//! tool and how to turn the tool's per-rank artifacts into entries of a
//! shared [`MetricsStore`](metrics_store::MetricsStore). Every external
//! program is reached through a [`ToolRunner`], so analysis can be driven by
//! canned output.

pub mod disasm;
pub mod flamegraph;
pub mod hwcounters;
pub mod memory;
pub mod mmap;
pub mod plugin;
pub mod runner;
pub mod samples;
pub mod symbols;

pub use disasm::{Disassembler, Objdump};
pub use hwcounters::{HardwareCounterProfiler, HwcConfig};
pub use memory::MemoryProfiler;
pub use mmap::BinaryMapping;
pub use plugin::{AnalysisContext, Invocation, ProfilerPlugin, TraceFiles};
pub use runner::{SystemRunner, ToolOutput, ToolRunner};
pub use samples::{InstructionSampleProfiler, SampleConfig};
pub use symbols::{SymbolResolutionCache, UNKNOWN_MNEMONIC};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while driving or reading external profiling tools
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// Missing or inconsistent profiling setup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external program could not be started
    #[error("failed to run {tool}: {source}")]
    ExternalTool {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// A counter value could not be converted to a number
    #[error("counter {name} has non-numeric value {value:?} in {}", path.display())]
    CounterValue {
        name: String,
        value: String,
        path: PathBuf,
    },

    /// A profiling artifact could not be read or written
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Flame graph collapsing or rendering failed
    #[error("flame graph rendering failed: {0}")]
    FlameGraph(String),
}
