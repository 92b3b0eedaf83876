//! # metrics_store
//!
//! Aggregation of per-rank profiling observations.
//!
//! Every observation is keyed by a [`MetricType`], a metric name and the
//! [`Rank`] that produced it. Profilers accumulate raw counts into a
//! [`MetricsStore`], optionally normalise them into per-rank ratios, and the
//! reporting side queries min/max/avg summaries across ranks.
//!
//! The [`vectorization`] module derives floating-point vectorization ratios
//! from an instruction mix already held in the store.

pub mod store;
pub mod vectorization;

pub use store::*;
pub use vectorization::{analyze_vectorization, VectorizationMix};
