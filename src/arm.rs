//! Beta-posterior state for one candidate prefix.
//!
//! Each arm keeps a Beta(α, β) posterior over its reward, updated with
//! fractional successes: `α += r`, `β += 1 − r`. The `Beta(1, 1)` prior is
//! uniform; split children inherit a scaled-down version of the parent's
//! posterior so the parent's belief survives the split without pinning the
//! children to it.

use crate::prefix::Prefix;
use crate::probe::ProbeOutcome;
use rand::Rng;
use rand_distr::{Beta, Distribution};

/// A candidate prefix with its reward posterior and latency tallies.
#[derive(Debug, Clone)]
pub struct Arm {
    prefix: Prefix,
    alpha: f64,
    beta: f64,
    /// Ingested observations (successes and failures both count).
    pulls: u64,
    /// Successful probes; the denominator for `latency_mean`.
    ok_probes: u64,
    sum_latency_ms: f64,
    /// Monotone creation sequence number; lower is older.
    birth: u64,
}

impl Arm {
    /// A fresh arm with the uniform `Beta(1, 1)` prior.
    pub fn seeded(prefix: Prefix, birth: u64) -> Self {
        Self::with_prior(prefix, birth, 1.0, 1.0)
    }

    /// An arm carrying an inherited prior. Both parameters are floored at 1
    /// so the posterior invariant `α ≥ 1 ∧ β ≥ 1` holds from birth.
    pub fn with_prior(prefix: Prefix, birth: u64, alpha: f64, beta: f64) -> Self {
        Self {
            prefix,
            alpha: if alpha.is_finite() { alpha.max(1.0) } else { 1.0 },
            beta: if beta.is_finite() { beta.max(1.0) } else { 1.0 },
            pulls: 0,
            ok_probes: 0,
            sum_latency_ms: 0.0,
            birth,
        }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn pulls(&self) -> u64 {
        self.pulls
    }

    pub fn birth(&self) -> u64 {
        self.birth
    }

    /// Fold one scored outcome into the posterior and latency tallies.
    pub fn observe(&mut self, reward: f64, outcome: &ProbeOutcome) {
        let r = reward.clamp(0.0, 1.0);
        self.alpha += r;
        self.beta += 1.0 - r;
        self.pulls += 1;
        if outcome.ok {
            self.ok_probes += 1;
            self.sum_latency_ms += outcome.total_ms;
        }
    }

    /// Posterior mean `α / (α + β)`.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Mean total latency over successful probes, `+∞` before any success.
    pub fn latency_mean(&self) -> f64 {
        if self.ok_probes == 0 {
            f64::INFINITY
        } else {
            self.sum_latency_ms / self.ok_probes as f64
        }
    }

    /// One draw from the posterior. Degenerate parameters fall back to 0.5.
    pub fn thompson_draw<R: Rng>(&self, rng: &mut R) -> f64 {
        if !(self.alpha.is_finite() && self.beta.is_finite()) {
            return 0.5;
        }
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => 0.5,
        }
    }

    /// The prior a split child inherits: `1 + κ(param − 1) / fanout`.
    pub fn child_prior(&self, kappa: f64, fanout: u32) -> (f64, f64) {
        let f = fanout.max(1) as f64;
        (
            1.0 + kappa * (self.alpha - 1.0) / f,
            1.0 + kappa * (self.beta - 1.0) / f,
        )
    }
}
