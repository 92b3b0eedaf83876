//! Floating-point vectorization ratios derived from an x86 instruction mix.

use log::debug;

use crate::store::{MetricType, MetricsStore, Rank};

/// Operation substrings marking a floating-point arithmetic mnemonic
const FLOP_OPS: [&str; 5] = ["add", "mul", "sub", "div", "sqrt"];

/// Prefixes of fused multiply-add forms (AVX2/FMA3)
const FMA_PREFIXES: [&str; 4] = ["vfmadd", "vfnmadd", "vfmsub", "vfnmsub"];

const PACKED_DOUBLE_SUFFIX: &str = "pd";
const SCALAR_DOUBLE_SUFFIX: &str = "sd";
const VEX_PREFIX: &str = "v";

pub const FLOP_SCALAR_PROP: &str = "flop_scalar_prop";
pub const SSE_PD_PROP: &str = "sse_pd_prop";
pub const AVX_PROP: &str = "avx_prop";
pub const AVX2_PROP: &str = "avx2_prop";

/// Instruction counts of one rank, bucketed by vectorization class.
///
/// `flop` is the total of double-precision arithmetic instructions; the four
/// buckets partition it.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct VectorizationMix {
    pub flop: f64,
    pub scalar: f64,
    pub packed_double: f64,
    pub avx: f64,
    pub fma: f64,
}

impl VectorizationMix {
    /// Accounts `count` occurrences of `mnemonic`
    pub fn record(&mut self, mnemonic: &str, count: f64) {
        if !FLOP_OPS.iter().any(|op| mnemonic.contains(op)) {
            return;
        }

        let packed = mnemonic.ends_with(PACKED_DOUBLE_SUFFIX);
        let scalar = mnemonic.ends_with(SCALAR_DOUBLE_SUFFIX);
        if !packed && !scalar {
            return;
        }
        self.flop += count;

        if FMA_PREFIXES.iter().any(|p| mnemonic.starts_with(p)) {
            self.fma += count;
        } else if mnemonic.starts_with(VEX_PREFIX) {
            self.avx += count;
        } else if packed {
            self.packed_double += count;
        } else {
            self.scalar += count;
        }
    }

    /// Bucket proportions as percentages of `flop`, `None` without any flop
    pub fn ratios(&self) -> Option<[(&'static str, f64); 4]> {
        if self.flop <= 0.0 {
            return None;
        }
        let pct = |bucket: f64| bucket / self.flop * 100.0;
        Some([
            (FLOP_SCALAR_PROP, pct(self.scalar)),
            (SSE_PD_PROP, pct(self.packed_double)),
            (AVX_PROP, pct(self.avx)),
            (AVX2_PROP, pct(self.fma)),
        ])
    }
}

/// Classifies the assembly mix recorded for `rank` and stores the four
/// vectorization proportions under [`MetricType::Vectorization`].
///
/// Ranks without any floating-point instruction get no vectorization entry.
pub fn analyze_vectorization(store: &mut MetricsStore, rank: Rank) -> VectorizationMix {
    let mut mix = VectorizationMix::default();
    for mnemonic in store.names(MetricType::Assembly) {
        let count = store.count(MetricType::Assembly, &mnemonic, rank);
        if count > 0.0 {
            mix.record(&mnemonic, count);
        }
    }

    if let Some(ratios) = mix.ratios() {
        for (name, value) in ratios {
            store.add(rank, MetricType::Vectorization, name, value);
        }
    } else {
        debug!("rank {}: no floating-point instructions sampled", rank);
    }
    mix
}
