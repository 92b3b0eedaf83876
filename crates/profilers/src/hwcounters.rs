//! Hardware counters read with `perf stat`.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use metrics_store::{MetricType, MetricsStore, Rank};
use log::{debug, error};

use crate::plugin::{AnalysisContext, Invocation, ProfilerPlugin, TraceFiles};
use crate::ProfilerError;

const METRIC_TYPE: MetricType = MetricType::HardwareCounters;

const INSTRUCTIONS: &str = "instructions";
const CYCLES: &str = "cycles";
const TASK_CLOCK: &str = "task-clock";
const DTLB_MISS_CYCLES: &str = "dTLBmiss_cycles";
const ITLB_MISS_CYCLES: &str = "iTLBmiss_cycles";

pub const INS_PER_CYCLE: &str = "ins-per-cycle";
pub const TLB_MISS_CYCLES_PCT: &str = "cycles spent due to TLBmiss (%)";
pub const CPUS_UTILIZED: &str = "CPUs-utilized";
pub const GHZ: &str = "GHz";
pub const ELAPSED_TIME: &str = "elapsed_time";

/// Letters perf accepts as event modifiers
const EVENT_MODIFIERS: &str = "ukhIGHpPSDWe";

/// Counters selected with `perf stat -e`
#[derive(Debug, Clone)]
pub struct HwcConfig {
    pub counters: Vec<String>,
    /// Delay before counting starts, keeps the profiler's own start-up out
    pub delay_ms: u64,
}

impl Default for HwcConfig {
    fn default() -> Self {
        Self {
            counters: vec![
                INSTRUCTIONS.to_string(),
                CYCLES.to_string(),
                "cpu-clock".to_string(),
                TASK_CLOCK.to_string(),
                format!("cpu/event=0x08,umask=0x10,name={}/", DTLB_MISS_CYCLES),
                format!("cpu/event=0x85,umask=0x10,name={}/", ITLB_MISS_CYCLES),
            ],
            delay_ms: 100,
        }
    }
}

/// Counts hardware events per rank and derives IPC and TLB pressure.
pub struct HardwareCounterProfiler {
    config: HwcConfig,
    files: TraceFiles,
}

impl HardwareCounterProfiler {
    pub fn new(config: HwcConfig, files: TraceFiles) -> Self {
        Self { config, files }
    }

    /// Records one `perf stat` output for `rank`, returning the counters
    /// whose value was unusable.
    fn analyze_stats(
        &self,
        metrics: &mut MetricsStore,
        rank: Rank,
        path: &Path,
    ) -> Result<Vec<ProfilerError>, ProfilerError> {
        let text = fs::read_to_string(path).map_err(|source| ProfilerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut failures = Vec::new();
        for line in text.lines() {
            match parse_stat_line(line) {
                StatLine::Counter {
                    name,
                    value,
                    derived,
                } => {
                    metrics.add(rank, METRIC_TYPE, &name, value);
                    if let Some((derived_name, derived_value)) = derived {
                        metrics.add(rank, METRIC_TYPE, derived_name, derived_value);
                    }
                }
                StatLine::Unusable { name, value } => {
                    failures.push(ProfilerError::CounterValue {
                        name,
                        value,
                        path: path.to_path_buf(),
                    });
                }
                StatLine::Other => {}
            }
        }

        let instructions = metrics.count(METRIC_TYPE, INSTRUCTIONS, rank);
        let cycles = metrics.count(METRIC_TYPE, CYCLES, rank);
        if instructions > 0.0 && cycles > 0.0 {
            metrics.add(rank, METRIC_TYPE, INS_PER_CYCLE, instructions / cycles);
        }

        let dtlb = metrics.count(METRIC_TYPE, DTLB_MISS_CYCLES, rank);
        let itlb = metrics.count(METRIC_TYPE, ITLB_MISS_CYCLES, rank);
        if cycles > 0.0 && dtlb > 0.0 && itlb > 0.0 {
            metrics.add(
                rank,
                METRIC_TYPE,
                TLB_MISS_CYCLES_PCT,
                (dtlb + itlb) / cycles * 100.0,
            );
        }

        Ok(failures)
    }
}

impl ProfilerPlugin for HardwareCounterProfiler {
    fn name(&self) -> &'static str {
        "hwcounters"
    }

    fn profile_command(&self, invocation: &Invocation) -> String {
        let pid = invocation
            .pid
            .map(|pid| format!("--pid={} ", pid))
            .unwrap_or_default();
        format!(
            "perf stat {}-e {} -D {} -o {} ",
            pid,
            self.config.counters.join(","),
            self.config.delay_ms,
            self.files.trace_file(invocation.rank).display()
        )
    }

    fn analyze(&mut self, ctx: &mut AnalysisContext<'_>) -> Result<(), ProfilerError> {
        let mut failed = BTreeSet::new();
        for (rank, path) in self.files.outputs() {
            debug!("reading hardware counters of rank {} from {}", rank, path.display());
            for failure in self.analyze_stats(ctx.metrics, *rank, path)? {
                error!("{}; dropping the counter for this run", failure);
                if let ProfilerError::CounterValue { name, .. } = failure {
                    failed.insert(name);
                }
            }
        }

        // Intermediate counters only feed derived metrics
        for name in [INSTRUCTIONS, DTLB_MISS_CYCLES, ITLB_MISS_CYCLES] {
            ctx.metrics.remove(METRIC_TYPE, name);
        }
        for name in &failed {
            ctx.metrics.remove(METRIC_TYPE, name);
        }
        Ok(())
    }
}

/// One line of `perf stat` text output
#[derive(Debug, PartialEq)]
pub enum StatLine {
    /// A counter value, with the figure perf prints after `#` when it is
    /// worth keeping
    Counter {
        name: String,
        value: f64,
        derived: Option<(&'static str, f64)>,
    },
    /// A counter whose value is not a number, e.g. `<not counted>`
    Unusable { name: String, value: String },
    /// Headers, blank lines and anything else
    Other,
}

/// Parses `perf stat` lines such as
///
/// ```text
///        1,234.56 msec task-clock   #    0.998 CPUs utilized
///       4,567,890      cycles       #    3.700 GHz
///        0.001234 seconds time elapsed
/// ```
pub fn parse_stat_line(line: &str) -> StatLine {
    let (body, comment) = match line.split_once('#') {
        Some((body, comment)) => (body, Some(comment)),
        None => (line, None),
    };
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.is_empty() {
        return StatLine::Other;
    }

    let numeric = tokens.iter().take_while(|t| is_numeric_token(t)).count();
    if numeric == 0 {
        return unusable_counter(&tokens);
    }

    let mut rest = tokens[numeric..].iter().copied().skip_while(|t| is_unit(t));
    let name = match rest.next() {
        Some("seconds") => match rest.next() {
            Some("time") => ELAPSED_TIME.to_string(),
            Some("user") => "user_time".to_string(),
            Some("sys") => "sys_time".to_string(),
            _ => return StatLine::Other,
        },
        Some(name) => counter_name(name).to_string(),
        None => return StatLine::Other,
    };

    let raw = tokens[..numeric].concat();
    let Some(value) = parse_number(&raw) else {
        return StatLine::Unusable { name, value: raw };
    };

    let derived = comment.and_then(|comment| derived_metric(&name, comment));
    StatLine::Counter {
        name,
        value,
        derived,
    }
}

/// Drops the privilege modifiers perf appends to event names, e.g. the `:u`
/// of `cycles:u`
fn counter_name(event: &str) -> &str {
    match event.rsplit_once(':') {
        Some((name, modifiers))
            if !name.is_empty()
                && !modifiers.is_empty()
                && modifiers.chars().all(|c| EVENT_MODIFIERS.contains(c)) =>
        {
            name
        }
        _ => event,
    }
}

/// `<not counted> cycles` and similar placeholders
fn unusable_counter(tokens: &[&str]) -> StatLine {
    if !tokens[0].starts_with('<') {
        return StatLine::Other;
    }
    let Some(end) = tokens.iter().position(|t| t.ends_with('>')) else {
        return StatLine::Other;
    };
    let mut rest = tokens[end + 1..].iter().skip_while(|t| is_unit(t));
    match rest.next() {
        Some(name) => StatLine::Unusable {
            name: counter_name(name).to_string(),
            value: tokens[..=end].join(" "),
        },
        None => StatLine::Other,
    }
}

fn derived_metric(name: &str, comment: &str) -> Option<(&'static str, f64)> {
    let tokens: Vec<&str> = comment.split_whitespace().collect();
    let numeric = tokens.iter().take_while(|t| is_numeric_token(t)).count();
    let raw = tokens[..numeric].concat();
    // Ratios are never digit-grouped, so a lone comma is a decimal mark
    let value = if raw.contains('.') {
        parse_number(&raw)?
    } else {
        parse_number(&raw.replace(',', "."))?
    };
    let label = tokens[numeric..].join(" ");

    match name {
        TASK_CLOCK if label.starts_with("CPUs utilized") => Some((CPUS_UTILIZED, value)),
        CYCLES if label.starts_with("GHz") => Some((GHZ, value)),
        _ => None,
    }
}

fn is_unit(token: &str) -> bool {
    matches!(token, "msec" | "ms" | "ns" | "us")
}

fn is_numeric_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
}

/// Converts a number printed with locale separators.
///
/// When both `,` and `.` occur the last one is the decimal mark. Repeated
/// marks are thousands separators. A lone `,` followed by exactly three
/// digits after a non-zero integer part is a thousands separator, otherwise
/// a decimal comma.
pub fn parse_number(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    let commas = raw.matches(',').count();
    let dots = raw.matches('.').count();

    let normalized = match (commas, dots) {
        (0, 0) | (0, 1) => raw.to_string(),
        (0, _) => raw.replace('.', ""),
        (_, 0) if commas > 1 => raw.replace(',', ""),
        (_, 0) => {
            let (int_part, frac_part) = raw.split_once(',')?;
            let thousands = frac_part.len() == 3 && !int_part.trim_start_matches('0').is_empty();
            if thousands {
                format!("{}{}", int_part, frac_part)
            } else {
                format!("{}.{}", int_part, frac_part)
            }
        }
        _ => {
            let last_comma = raw.rfind(',')?;
            let last_dot = raw.rfind('.')?;
            if last_dot > last_comma {
                raw.replace(',', "")
            } else {
                raw.replace('.', "").replace(',', ".")
            }
        }
    };
    normalized.parse().ok()
}
