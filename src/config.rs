//! Search configuration and the fatal-error taxonomy.
//!
//! Configuration problems are the only errors the search core propagates; they
//! are reported by [`SearchConfig::validate`] before any probe is dispatched.
//! Probe failures are data (an outcome with `ok = false`), never errors.

use crate::prefix::{Prefix, PrefixError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Fatal configuration errors, reported before any probe runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cidr(#[from] PrefixError),
    #[error("at least one root CIDR is required")]
    NoRoots,
    #[error("`{field}` must be greater than zero")]
    ZeroField { field: &'static str },
    #[error("skip_first ({skip_first}) must be below rounds ({rounds})")]
    SkipFirstTooLarge { skip_first: u8, rounds: u8 },
    #[error("max_bits_v4 ({0}) exceeds 32")]
    MaxBitsV4(u8),
    #[error("max_bits_v6 ({0}) exceeds 128")]
    MaxBitsV6(u8),
    #[error("split_step_{family} ({step}) cannot fit under max_bits_{family} ({max_bits})")]
    SplitStepTooLarge {
        family: &'static str,
        step: u8,
        max_bits: u8,
    },
    #[error("split_step_{family} ({step}) is too aggressive (at most 8 bits per split)")]
    SplitStepTooAggressive { family: &'static str, step: u8 },
    #[error("diversity_weight ({0}) must be within [0, 1]")]
    DiversityWeightOutOfRange(f32),
    #[error("split_mean_floor ({0}) must be within [0, 1]")]
    SplitMeanFloorOutOfRange(f64),
    #[error("path `{0}` must start with `/`")]
    BadPath(String),
    #[error("host must not be empty")]
    EmptyHost,
    #[error("invalid probe host `{host}`: {reason}")]
    BadHost { host: String, reason: String },
    #[error("TLS client configuration: {0}")]
    Tls(String),
}

/// Tunables for one search run.
///
/// Every field has a default; construct with struct-update syntax:
///
/// ```rust
/// use prospector::SearchConfig;
///
/// let cfg = SearchConfig {
///     budget: 500,
///     heads: 2,
///     ..SearchConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Total probes across the whole run.
    pub budget: u32,
    /// Worker pool size; also the number of probes kept in flight.
    pub concurrency: u16,
    /// Independent searchers sharing the budget round-robin.
    pub heads: u8,
    /// Maximum arms per head.
    pub beam: u16,
    /// Strength of cross-head repulsion, in `[0, 1]`.
    pub diversity_weight: f32,
    /// Split check cadence: every this many ingestions per arm.
    pub split_interval: u16,
    /// Minimum observations before an arm may split.
    pub min_samples_split: u16,
    /// Bits added per v4 split (fanout `2^step`).
    pub split_step_v4: u8,
    /// Bits added per v6 split.
    pub split_step_v6: u8,
    /// Deepest v4 prefix the search may create.
    pub max_bits_v4: u8,
    /// Deepest v6 prefix the search may create.
    pub max_bits_v6: u8,
    /// Measurement rounds per probed IP.
    pub rounds: u8,
    /// Warm-up rounds discarded from averaging.
    pub skip_first: u8,
    /// Per-round wall-clock bound.
    pub timeout: Duration,
    /// TLS SNI and HTTP `Host` header.
    pub host: String,
    /// Request path; the default trace endpoint reports `colo=`.
    pub path: String,
    /// Size of the final ranking.
    pub top: u16,
    /// RNG seed; `0` derives one from the wall clock.
    pub seed: u64,
    /// Floor under the running-median split threshold, in `[0, 1]`.
    ///
    /// Keeps dead regions (posterior mean at or below chance) from being
    /// subdivided even when every arm in the beam is equally poor.
    pub split_mean_floor: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            budget: 2000,
            concurrency: 200,
            heads: 4,
            beam: 32,
            diversity_weight: 0.5,
            split_interval: 8,
            min_samples_split: 16,
            split_step_v4: 2,
            split_step_v6: 4,
            max_bits_v4: 24,
            max_bits_v6: 48,
            rounds: 4,
            skip_first: 1,
            timeout: Duration::from_secs(2),
            host: "www.cloudflare.com".to_string(),
            path: "/cdn-cgi/trace".to_string(),
            top: 20,
            seed: 0,
            split_mean_floor: 0.5,
        }
    }
}

impl SearchConfig {
    /// Check every cross-field constraint. Called by the engine constructor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, ok) in [
            ("budget", self.budget > 0),
            ("concurrency", self.concurrency > 0),
            ("heads", self.heads > 0),
            ("beam", self.beam > 0),
            ("split_interval", self.split_interval > 0),
            ("min_samples_split", self.min_samples_split > 0),
            ("split_step_v4", self.split_step_v4 > 0),
            ("split_step_v6", self.split_step_v6 > 0),
            ("rounds", self.rounds > 0),
            ("top", self.top > 0),
            ("timeout", !self.timeout.is_zero()),
        ] {
            if !ok {
                return Err(ConfigError::ZeroField { field });
            }
        }
        if self.skip_first >= self.rounds {
            return Err(ConfigError::SkipFirstTooLarge {
                skip_first: self.skip_first,
                rounds: self.rounds,
            });
        }
        if self.max_bits_v4 > 32 {
            return Err(ConfigError::MaxBitsV4(self.max_bits_v4));
        }
        if self.max_bits_v6 > 128 {
            return Err(ConfigError::MaxBitsV6(self.max_bits_v6));
        }
        if self.split_step_v4 > self.max_bits_v4 {
            return Err(ConfigError::SplitStepTooLarge {
                family: "v4",
                step: self.split_step_v4,
                max_bits: self.max_bits_v4,
            });
        }
        if self.split_step_v6 > self.max_bits_v6 {
            return Err(ConfigError::SplitStepTooLarge {
                family: "v6",
                step: self.split_step_v6,
                max_bits: self.max_bits_v6,
            });
        }
        for (family, step) in [("v4", self.split_step_v4), ("v6", self.split_step_v6)] {
            // 2^step children per split; more than 8 bits would flood a beam.
            if step > 8 {
                return Err(ConfigError::SplitStepTooAggressive { family, step });
            }
        }
        if !(0.0..=1.0).contains(&self.diversity_weight) || !self.diversity_weight.is_finite() {
            return Err(ConfigError::DiversityWeightOutOfRange(self.diversity_weight));
        }
        if !(0.0..=1.0).contains(&self.split_mean_floor) || !self.split_mean_floor.is_finite() {
            return Err(ConfigError::SplitMeanFloorOutOfRange(self.split_mean_floor));
        }
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::BadPath(self.path.clone()));
        }
        Ok(())
    }

    /// Parse and validate a set of root CIDR strings.
    pub fn parse_roots<S: AsRef<str>>(cidrs: &[S]) -> Result<Vec<Prefix>, ConfigError> {
        if cidrs.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        cidrs
            .iter()
            .map(|s| s.as_ref().parse::<Prefix>().map_err(ConfigError::from))
            .collect()
    }

    /// The split step for a given prefix's family.
    pub(crate) fn split_step_for(&self, prefix: &Prefix) -> u8 {
        if prefix.is_v4() {
            self.split_step_v4
        } else {
            self.split_step_v6
        }
    }

    /// The depth ceiling for a given prefix's family.
    pub(crate) fn max_bits_for(&self, prefix: &Prefix) -> u8 {
        if prefix.is_v4() {
            self.max_bits_v4
        } else {
            self.max_bits_v6
        }
    }
}
