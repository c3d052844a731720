//! `prospector`: adaptive search for low-latency, stable IP endpoints inside
//! large announced prefixes (primarily Cloudflare's IPv4/IPv6 space).
//!
//! Brute-forcing millions of addresses is infeasible, and uniform sampling
//! wastes most of its budget on poor regions. `prospector` instead treats the
//! address space as a tree of CIDR prefixes and runs a multi-head Monte Carlo
//! search over it:
//!
//! - each **head** keeps a bounded **beam** of candidate prefixes (**arms**),
//!   every arm carrying a Beta posterior over its reward;
//! - arms are selected by **Thompson sampling**, minus a repulsion term that
//!   pushes heads away from regions their siblings already occupy;
//! - a probed address is measured with a real TCP+TLS+HTTP exchange, scored
//!   into `[0, 1]` by latency, and folded back into the arm's posterior;
//! - once an arm has enough evidence and beats its beam's running median, it
//!   **splits** into its children and the search descends.
//!
//! Goals:
//! - **Deterministic when asked**: a fixed seed with `concurrency = 1`
//!   reproduces a run exactly; per-head RNG streams come from a SplitMix64
//!   derivation of the top-level seed.
//! - **Probe failures are data**: a refused connect or a bad status scores
//!   zero reward and is absorbed; only configuration errors abort a run.
//! - **Honest measurements**: probes dial the raw IP directly (no proxy
//!   resolution can ever run) with an overridden SNI and Host header.
//!
//! Non-goals: exhaustive enumeration, guaranteed global optima, authenticated
//! probing, or longitudinal liveness monitoring.
//!
//! # Quick start
//!
//! ```rust
//! use prospector::{Engine, SearchConfig, HttpProber, ProbeConfig};
//!
//! let cfg = SearchConfig {
//!     budget: 500,
//!     concurrency: 50,
//!     seed: 42,
//!     ..SearchConfig::default()
//! };
//! let roots = SearchConfig::parse_roots(&["104.16.0.0/13", "172.64.0.0/13"]).unwrap();
//! let prober = HttpProber::new(ProbeConfig::from(&cfg)).unwrap();
//! let engine = Engine::new(cfg, roots, prober).unwrap();
//! // `engine.cancel_token()` stops the run from a signal handler.
//! # let _ = engine;
//! ```
//!
//! The run returns a [`SearchReport`] whose [`Record`] rows feed the
//! [`Emitter`] formatters and, optionally, the `dns` feature's uploaders.

#![forbid(unsafe_code)]

mod aggregate;
pub use aggregate::*;

mod arm;
pub use arm::*;

mod config;
pub use config::*;

mod control;
pub use control::*;

#[cfg(feature = "dns")]
mod dns;
#[cfg(feature = "dns")]
pub use dns::*;

mod emit;
pub use emit::*;

mod engine;
pub use engine::*;

mod head;

mod prefix;
pub use prefix::*;

mod probe;
pub use probe::*;

mod score;
pub use score::*;

mod seed;

/// Crate version, for user agents and diagnostics.
pub const PROSPECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");
