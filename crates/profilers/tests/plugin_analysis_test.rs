use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use metrics_store::{MetricType, MetricsStore};
use profilers::hwcounters::{CPUS_UTILIZED, ELAPSED_TIME, GHZ, INS_PER_CYCLE, TLB_MISS_CYCLES_PCT};
use profilers::memory::PEAK_MEM_MIB;
use profilers::{
    AnalysisContext, Disassembler, HardwareCounterProfiler, HwcConfig,
    InstructionSampleProfiler, MemoryProfiler, ProfilerError, ProfilerPlugin, SampleConfig,
    SymbolResolutionCache, ToolOutput, ToolRunner, TraceFiles,
};

/// Canned stdout per command-line needle, with a log of every call
#[derive(Default)]
struct ScriptedRunner {
    rules: Vec<(String, String)>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    fn on(mut self, needle: &str, stdout: &str) -> Self {
        self.rules.push((needle.to_string(), stdout.to_string()));
        self
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput, ProfilerError> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.borrow_mut().push(line.clone());
        let stdout = self
            .rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(ToolOutput {
            status: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Fixed address -> mnemonic table, counting lookups
struct TableDisassembler {
    table: Vec<(u64, &'static str)>,
    lookups: Rc<RefCell<u32>>,
}

impl Disassembler for TableDisassembler {
    fn mnemonic_at(&self, _binary: &Path, offset: u64) -> Result<Option<String>, ProfilerError> {
        *self.lookups.borrow_mut() += 1;
        Ok(self
            .table
            .iter()
            .find(|(address, _)| *address == offset)
            .map(|(_, mnemonic)| mnemonic.to_string()))
    }
}

fn symbol_cache(table: Vec<(u64, &'static str)>) -> (SymbolResolutionCache, Rc<RefCell<u32>>) {
    let lookups = Rc::new(RefCell::new(0));
    let disassembler = TableDisassembler {
        table,
        lookups: lookups.clone(),
    };
    (SymbolResolutionCache::new(Box::new(disassembler)), lookups)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_instruction_samples_become_ratios() {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("solver");
    fs::write(&binary, b"\x7fELF").unwrap();
    let binary = binary.display().to_string();

    let mut samples = String::new();
    for (ip, symbol, count) in [("10", "compute", 6), ("20", "compute", 2), ("30", "main", 11)] {
        for _ in 0..count {
            samples.push_str(&format!("  {} {} ({})\n", ip, symbol, binary));
        }
    }
    samples.push_str("  ffffffff81000000 [unknown] ([kernel.kallsyms])\n\n");

    let runner = ScriptedRunner::default()
        .on("--show-mmap-events", "")
        .on("ip,sym,dso", &samples);
    let (mut symbols, lookups) =
        symbol_cache(vec![(0x10, "vaddpd"), (0x20, "mulsd"), (0x30, "addq")]);
    let mut metrics = MetricsStore::new();

    let artifact = dir.path().join("perf.data");
    let mut profiler =
        InstructionSampleProfiler::new(SampleConfig::default(), TraceFiles::single(&artifact));
    profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap();

    // three distinct addresses, the kernel sample never reaches the disassembler
    assert_eq!(*lookups.borrow(), 3);

    assert_close(metrics.count(MetricType::Assembly, "vaddpd", 0), 30.0);
    assert_close(metrics.count(MetricType::Assembly, "mulsd", 0), 10.0);
    assert_close(metrics.count(MetricType::Assembly, "addq", 0), 55.0);
    assert_close(metrics.count(MetricType::Assembly, "unknown", 0), 5.0);
    assert_close(metrics.count(MetricType::Symbols, "main", 0), 55.0);
    assert_close(metrics.count(MetricType::Symbols, "compute", 0), 40.0);
    assert_eq!(
        metrics.names_sorted(MetricType::Assembly),
        vec!["addq", "vaddpd", "mulsd", "unknown"]
    );

    assert_close(metrics.count(MetricType::Vectorization, "avx_prop", 0), 75.0);
    assert_close(
        metrics.count(MetricType::Vectorization, "flop_scalar_prop", 0),
        25.0,
    );

    let calls = runner.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with(&format!("perf script -i {}", artifact.display())));
}

#[test]
fn test_rare_samples_are_pruned_across_ranks() {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("solver");
    fs::write(&binary, b"\x7fELF").unwrap();
    let binary = binary.display().to_string();

    // one "nop" sample out of 200 stays at 0.5% on every rank
    let mut samples = format!("  40 spin ({})\n", binary);
    for _ in 0..199 {
        samples.push_str(&format!("  30 main ({})\n", binary));
    }

    let runner = ScriptedRunner::default()
        .on("--show-mmap-events", "")
        .on("ip,sym,dso", &samples);
    let (mut symbols, lookups) = symbol_cache(vec![(0x30, "addq"), (0x40, "nop")]);
    let mut metrics = MetricsStore::new();

    let mut profiler = InstructionSampleProfiler::new(
        SampleConfig::default(),
        TraceFiles::per_rank(dir.path().join("perf.data"), [0, 1]),
    );
    profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap();

    // the cache spans ranks
    assert_eq!(*lookups.borrow(), 2);
    assert_eq!(metrics.names(MetricType::Assembly), vec!["addq"]);
    assert_eq!(metrics.names(MetricType::Symbols), vec!["main"]);
    assert_eq!(metrics.ranks(MetricType::Assembly, "addq"), vec![0, 1]);
    // no floating-point instruction, no vectorization entry
    assert!(metrics.names(MetricType::Vectorization).is_empty());
}

const PERF_STAT_RANK0: &str = "
 Performance counter stats for './solver':

          2,000.00 msec cpu-clock                 #    1.000 CPUs utilized
          2,000.00 msec task-clock                #    0.990 CPUs utilized
     8,000,000,000      instructions              #    2.00  insn per cycle
     4,000,000,000      cycles                    #    2.000 GHz
       200,000,000      dTLBmiss_cycles
       200,000,000      iTLBmiss_cycles

       2.020202020 seconds time elapsed
";

const PERF_STAT_RANK1: &str = "
 Performance counter stats for './solver':

          1 000,00 msec task-clock                #    0,500 CPUs utilized
     3 000 000 000      instructions              #    1,00  insn per cycle
     3 000 000 000      cycles                    #    3,000 GHz
   <not counted>      dTLBmiss_cycles
       100 000 000      iTLBmiss_cycles

       2,000000000 seconds time elapsed
";

#[test]
fn test_hardware_counters_and_derived_metrics() {
    testing_logger::setup();
    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("perf.stats");
    let files = TraceFiles::per_rank(&stem, [0, 1]);
    fs::write(files.trace_file(Some(0)), PERF_STAT_RANK0).unwrap();
    fs::write(files.trace_file(Some(1)), PERF_STAT_RANK1).unwrap();

    let runner = ScriptedRunner::default();
    let (mut symbols, _) = symbol_cache(vec![]);
    let mut metrics = MetricsStore::new();

    let mut profiler = HardwareCounterProfiler::new(HwcConfig::default(), files);
    profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap();

    let hwc = MetricType::HardwareCounters;
    assert_eq!(metrics.min(hwc, INS_PER_CYCLE), Some((1.0, 1)));
    assert_eq!(metrics.max(hwc, INS_PER_CYCLE), Some((2.0, 0)));
    assert_eq!(metrics.count(hwc, "cycles", 1), 3.0e9);
    assert_close(metrics.count(hwc, "task-clock", 1), 1000.0);
    assert_close(metrics.count(hwc, CPUS_UTILIZED, 0), 0.99);
    assert_close(metrics.count(hwc, CPUS_UTILIZED, 1), 0.5);
    assert_close(metrics.avg(hwc, GHZ).unwrap(), 2.5);
    assert_close(metrics.count(hwc, ELAPSED_TIME, 1), 2.0);
    assert_close(metrics.count(hwc, TLB_MISS_CYCLES_PCT, 0), 10.0);
    // rank 1 has no dTLB figure, so no TLB percentage
    assert_eq!(metrics.ranks(hwc, TLB_MISS_CYCLES_PCT), vec![0]);

    // intermediates and the unusable counter are gone
    let names = metrics.names(hwc);
    for removed in ["instructions", "dTLBmiss_cycles", "iTLBmiss_cycles"] {
        assert!(!names.iter().any(|n| n == removed), "{removed} still present");
    }

    testing_logger::validate(|captured_logs| {
        let errors: Vec<_> = captured_logs
            .iter()
            .filter(|log| log.level == log::Level::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].body.contains("counter dTLBmiss_cycles has non-numeric value"));
    });
}

const PERF_STAT_USER_ONLY: &str = "
 Performance counter stats for './solver':

             500.00 msec task-clock:u              #    0.500 CPUs utilized
              8,000      instructions:u            #    2.00  insn per cycle
              4,000      cycles:u                  #    2.000 GHz
                400      dTLBmiss_cycles:u
                400      iTLBmiss_cycles:u

       1.000000000 seconds time elapsed
";

#[test]
fn test_user_only_counters_are_derived_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let files = TraceFiles::single(dir.path().join("perf.stats"));
    fs::write(files.trace_file(None), PERF_STAT_USER_ONLY).unwrap();

    let runner = ScriptedRunner::default();
    let (mut symbols, _) = symbol_cache(vec![]);
    let mut metrics = MetricsStore::new();

    let mut profiler = HardwareCounterProfiler::new(HwcConfig::default(), files);
    profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap();

    let hwc = MetricType::HardwareCounters;
    assert_eq!(metrics.count(hwc, INS_PER_CYCLE, 0), 2.0);
    assert_close(metrics.count(hwc, GHZ, 0), 2.0);
    assert_close(metrics.count(hwc, CPUS_UTILIZED, 0), 0.5);
    assert_close(metrics.count(hwc, TLB_MISS_CYCLES_PCT, 0), 20.0);
    assert_eq!(
        metrics.names(hwc),
        vec![
            "task-clock",
            CPUS_UTILIZED,
            "cycles",
            GHZ,
            ELAPSED_TIME,
            INS_PER_CYCLE,
            TLB_MISS_CYCLES_PCT
        ]
    );
}

#[test]
fn test_unconvertible_counter_is_dropped_for_every_rank() {
    testing_logger::setup();
    let dir = tempfile::tempdir().unwrap();
    let files = TraceFiles::per_rank(dir.path().join("perf.stats"), [0, 1]);
    fs::write(
        files.trace_file(Some(0)),
        "     4,000      cycles
     1,500      cpu-clock
",
    )
    .unwrap();
    fs::write(
        files.trace_file(Some(1)),
        "     1,2.3,4      cycles
     1,700      cpu-clock
",
    )
    .unwrap();

    let runner = ScriptedRunner::default();
    let (mut symbols, _) = symbol_cache(vec![]);
    let mut metrics = MetricsStore::new();

    let mut profiler = HardwareCounterProfiler::new(HwcConfig::default(), files);
    profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap();

    let hwc = MetricType::HardwareCounters;
    assert_eq!(metrics.names(hwc), vec!["cpu-clock"]);
    assert!(metrics.ranks(hwc, "cycles").is_empty());
    assert_eq!(metrics.ranks(hwc, "cpu-clock"), vec![0, 1]);

    testing_logger::validate(|captured_logs| {
        let errors: Vec<_> = captured_logs
            .iter()
            .filter(|log| log.level == log::Level::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].body.contains("counter cycles has non-numeric value \"1,2.3,4\""));
    });
}

#[test]
fn test_missing_counter_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::default();
    let (mut symbols, _) = symbol_cache(vec![]);
    let mut metrics = MetricsStore::new();

    let mut profiler = HardwareCounterProfiler::new(
        HwcConfig::default(),
        TraceFiles::single(dir.path().join("absent.stats")),
    );
    let err = profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap_err();

    assert!(matches!(err, ProfilerError::Io { .. }));
}

#[test]
fn test_memory_peak_and_graph() {
    let dir = tempfile::tempdir().unwrap();
    let files = TraceFiles::per_rank(dir.path().join("massif.out"), [0, 1]);
    for (rank, heap) in [(0, 1048576u64), (1, 3 * 1048576)] {
        fs::write(
            files.trace_file(Some(rank)),
            format!("snapshot=0\nmem_heap_B={}\nmem_heap_extra_B=0\nmem_stacks_B=0\n", heap),
        )
        .unwrap();
    }

    let runner = ScriptedRunner::default().on("ms_print", "    MB\n3.000^  #\n");
    let (mut symbols, _) = symbol_cache(vec![]);
    let mut metrics = MetricsStore::new();

    let mut profiler = MemoryProfiler::new(files);
    profiler
        .analyze(&mut AnalysisContext {
            metrics: &mut metrics,
            symbols: &mut symbols,
            runner: &runner,
        })
        .unwrap();

    assert_eq!(metrics.max(MetricType::Memory, PEAK_MEM_MIB), Some((3.0, 1)));
    assert_eq!(metrics.avg(MetricType::Memory, PEAK_MEM_MIB), Some(2.0));
    assert_eq!(profiler.report().as_deref(), Some("    MB\n3.000^  #\n"));
    assert_eq!(runner.calls.borrow().len(), 1);
    assert!(runner.calls.borrow()[0].ends_with("massif.out_0"));
}
