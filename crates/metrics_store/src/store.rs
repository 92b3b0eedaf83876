use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;

/// Identifier of one parallel unit of work (an MPI task, a launcher rank, or
/// the position of an attached pid).
pub type Rank = u32;

/// Partition of the metric namespace. Metrics of different types are never
/// aggregated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricType {
    /// Absolute hardware counter values and values derived from them
    HardwareCounters,
    /// Sampled assembly mnemonics
    Assembly,
    /// Sampled function symbols
    Symbols,
    /// Floating-point vectorization proportions
    Vectorization,
    /// Memory footprint figures
    Memory,
}

impl MetricType {
    /// Short tag used in reports and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::HardwareCounters => "hwc",
            MetricType::Assembly => "asm",
            MetricType::Symbols => "sym",
            MetricType::Vectorization => "vectorization",
            MetricType::Memory => "memory",
        }
    }

    /// Whether stored values are percentages of a per-rank total
    pub fn is_ratio(&self) -> bool {
        matches!(
            self,
            MetricType::Assembly | MetricType::Symbols | MetricType::Vectorization
        )
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-rank summary of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    /// Smallest value and the rank holding it
    pub min: (f64, Rank),
    /// Largest value and the rank holding it
    pub max: (f64, Rank),
    /// Mean over the ranks that recorded the metric
    pub avg: f64,
}

/// Names of one metric type, kept in first-insertion order.
#[derive(Debug, Default, Clone)]
struct MetricTable {
    order: Vec<String>,
    series: HashMap<String, BTreeMap<Rank, f64>>,
}

impl MetricTable {
    fn series_mut(&mut self, name: &str) -> &mut BTreeMap<Rank, f64> {
        if !self.series.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.series.entry(name.to_string()).or_default()
    }

    fn remove(&mut self, name: &str) {
        if self.series.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }
}

/// Three-level mapping metric type -> metric name -> rank -> value.
///
/// Writes accumulate: adding to an existing `(type, name, rank)` entry sums
/// the amounts. Aggregates are computed from the current counts on every
/// query, so late `add` calls are always reflected.
///
/// # Examples
///
/// ```
/// use metrics_store::{MetricType, MetricsStore};
///
/// let mut store = MetricsStore::new();
/// store.add(0, MetricType::HardwareCounters, "cycles", 100.0);
/// store.add(1, MetricType::HardwareCounters, "cycles", 300.0);
///
/// assert_eq!(store.min(MetricType::HardwareCounters, "cycles"), Some((100.0, 0)));
/// assert_eq!(store.max(MetricType::HardwareCounters, "cycles"), Some((300.0, 1)));
/// assert_eq!(store.avg(MetricType::HardwareCounters, "cycles"), Some(200.0));
/// ```
#[derive(Debug, Default, Clone)]
pub struct MetricsStore {
    tables: BTreeMap<MetricType, MetricTable>,
}

impl MetricsStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the value of `(metric_type, name, rank)` by `amount`,
    /// creating the entry at zero if absent.
    pub fn add(&mut self, rank: Rank, metric_type: MetricType, name: &str, amount: f64) {
        *self
            .tables
            .entry(metric_type)
            .or_default()
            .series_mut(name)
            .entry(rank)
            .or_insert(0.0) += amount;
    }

    /// Increments `(metric_type, name, rank)` by one
    pub fn increment(&mut self, rank: Rank, metric_type: MetricType, name: &str) {
        self.add(rank, metric_type, name, 1.0);
    }

    /// Drops the whole per-rank series of a metric. No-op if absent.
    pub fn remove(&mut self, metric_type: MetricType, name: &str) {
        if let Some(table) = self.tables.get_mut(&metric_type) {
            table.remove(name);
        }
    }

    /// Stored value, or 0 when the triple does not exist
    pub fn count(&self, metric_type: MetricType, name: &str, rank: Rank) -> f64 {
        self.series(metric_type, name)
            .and_then(|series| series.get(&rank))
            .copied()
            .unwrap_or(0.0)
    }

    /// Metric types holding at least one name
    pub fn metric_types(&self) -> Vec<MetricType> {
        self.tables
            .iter()
            .filter(|(_, table)| !table.order.is_empty())
            .map(|(metric_type, _)| *metric_type)
            .collect()
    }

    /// Names under `metric_type` in first-insertion order
    pub fn names(&self, metric_type: MetricType) -> Vec<String> {
        self.tables
            .get(&metric_type)
            .map(|table| table.order.clone())
            .unwrap_or_default()
    }

    /// Names under `metric_type` by descending average; ties keep insertion order.
    pub fn names_sorted(&self, metric_type: MetricType) -> Vec<String> {
        let mut ranked: Vec<(String, f64)> = self
            .names(metric_type)
            .into_iter()
            .map(|name| {
                let avg = self.avg(metric_type, &name).unwrap_or(0.0);
                (name, avg)
            })
            .collect();

        // sort_by is stable
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().map(|(name, _)| name).collect()
    }

    /// Ranks that recorded `(metric_type, name)`, ascending
    pub fn ranks(&self, metric_type: MetricType, name: &str) -> Vec<Rank> {
        self.series(metric_type, name)
            .map(|series| series.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Rewrites every count of `metric_type` held by `rank` as a percentage of
    /// the rank's total, multiplied by `scale`.
    ///
    /// Destructive: calling it twice for the same rank, or adding counts
    /// afterwards, mixes ratios with raw counts. A zero total leaves the
    /// values untouched.
    pub fn to_ratios(&mut self, metric_type: MetricType, rank: Rank, scale: f64) {
        let Some(table) = self.tables.get_mut(&metric_type) else {
            return;
        };

        let total: f64 = table
            .series
            .values()
            .filter_map(|series| series.get(&rank))
            .sum();
        if total <= 0.0 {
            return;
        }

        for series in table.series.values_mut() {
            if let Some(value) = series.get_mut(&rank) {
                *value = *value / total * 100.0 * scale;
            }
        }
    }

    /// Deletes every name of `metric_type` whose value never exceeds
    /// `threshold` on any rank.
    pub fn prune_low_ratio(&mut self, metric_type: MetricType, threshold: f64) {
        let Some(table) = self.tables.get_mut(&metric_type) else {
            return;
        };

        let doomed: Vec<String> = table
            .order
            .iter()
            .filter(|name| {
                table
                    .series
                    .get(name.as_str())
                    .map_or(true, |series| series.values().all(|&v| v <= threshold))
            })
            .cloned()
            .collect();

        if !doomed.is_empty() {
            debug!(
                "pruning {} {} metrics at or below {}",
                doomed.len(),
                metric_type,
                threshold
            );
        }
        for name in doomed {
            table.remove(&name);
        }
    }

    /// Smallest value across ranks and its owner. The lowest rank wins ties.
    pub fn min(&self, metric_type: MetricType, name: &str) -> Option<(f64, Rank)> {
        self.extremum(metric_type, name, |candidate, best| candidate < best)
    }

    /// Largest value across ranks and its owner. The lowest rank wins ties.
    pub fn max(&self, metric_type: MetricType, name: &str) -> Option<(f64, Rank)> {
        self.extremum(metric_type, name, |candidate, best| candidate > best)
    }

    /// Unweighted mean over the ranks that recorded the metric
    pub fn avg(&self, metric_type: MetricType, name: &str) -> Option<f64> {
        let series = self.series(metric_type, name)?;
        if series.is_empty() {
            return None;
        }
        Some(series.values().sum::<f64>() / series.len() as f64)
    }

    /// Min, max and avg in one call
    pub fn summary(&self, metric_type: MetricType, name: &str) -> Option<MetricSummary> {
        Some(MetricSummary {
            min: self.min(metric_type, name)?,
            max: self.max(metric_type, name)?,
            avg: self.avg(metric_type, name)?,
        })
    }

    /// Adds every entry of `other` into this store.
    ///
    /// Used to combine stores that were filled independently, one per rank.
    pub fn merge(&mut self, other: MetricsStore) {
        for (metric_type, table) in other.tables {
            for name in table.order {
                if let Some(series) = table.series.get(&name) {
                    for (&rank, &value) in series {
                        self.add(rank, metric_type, &name, value);
                    }
                }
            }
        }
    }

    fn series(&self, metric_type: MetricType, name: &str) -> Option<&BTreeMap<Rank, f64>> {
        self.tables.get(&metric_type)?.series.get(name)
    }

    fn extremum(
        &self,
        metric_type: MetricType,
        name: &str,
        better: impl Fn(f64, f64) -> bool,
    ) -> Option<(f64, Rank)> {
        let mut iter = self.series(metric_type, name)?.iter();
        let (&first_rank, &first_value) = iter.next()?;

        let mut best = (first_value, first_rank);
        for (&rank, &value) in iter {
            if better(value, best.0) {
                best = (value, rank);
            }
        }
        Some(best)
    }
}
