//! Mapping from probe outcomes to scalar rewards.
//!
//! The reward is a monotone map of total latency into `[0, 1]`, so it can be
//! fed straight into a Beta posterior as a fractional success while preserving
//! the ordering of the raw latencies.

use crate::probe::ProbeOutcome;

/// Latencies at or below this score a full reward.
pub const T_LO_MS: f64 = 20.0;
/// Latencies at or above this score zero.
pub const T_HI_MS: f64 = 2000.0;

/// Fold an outcome into a reward in `[0, 1]`. Failed probes score zero.
pub fn reward(outcome: &ProbeOutcome) -> f64 {
    if !outcome.ok {
        return 0.0;
    }
    let t = outcome.total_ms.clamp(T_LO_MS, T_HI_MS);
    ((T_HI_MS - t) / (T_HI_MS - T_LO_MS)).clamp(0.0, 1.0)
}

/// The latency used for ranking: total milliseconds, `+∞` on failure.
pub fn latency_score(outcome: &ProbeOutcome) -> f64 {
    if outcome.ok {
        outcome.total_ms
    } else {
        f64::INFINITY
    }
}
