//! The multi-head search loop: budget arbitration, probe dispatch, result
//! ingestion, adaptive splitting, and progress emission.
//!
//! One coordinator thread owns every head and the aggregator, so arm state
//! needs no locking; a fixed pool of workers executes probes behind two
//! bounded channels. The coordinator keeps at most `concurrency` probes in
//! flight, which is all the back-pressure needed. At `concurrency = 1` the
//! loop degenerates to strict dispatch/ingest lockstep, making seeded runs
//! fully deterministic.

use crate::aggregate::{Aggregator, Record};
use crate::config::{ConfigError, SearchConfig};
use crate::control::{Budget, CancelToken};
use crate::head::Head;
use crate::prefix::Prefix;
use crate::probe::{ProbeOutcome, Prober};
use crate::score;
use crate::seed;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;

/// A dispatched probe: which head asked, under which arm, at which address.
struct Job {
    head: usize,
    prefix: Prefix,
    ip: IpAddr,
}

/// A completed probe heading back to the coordinator.
struct Done {
    head: usize,
    prefix: Prefix,
    ip: IpAddr,
    outcome: ProbeOutcome,
    reward: f64,
}

/// Snapshot of one arm at the end of the run.
#[derive(Debug, Clone)]
pub struct ArmSummary {
    pub prefix: Prefix,
    pub mean: f64,
    pub latency_mean: f64,
    pub pulls: u64,
}

/// Snapshot of one head's beam at the end of the run.
#[derive(Debug, Clone)]
pub struct HeadSummary {
    pub index: usize,
    pub arms: Vec<ArmSummary>,
    /// How many prefixes this head split over the whole run.
    pub splits: usize,
}

/// Everything a caller needs after [`Engine::run`] returns.
#[derive(Debug)]
pub struct SearchReport {
    /// The Top-N ranking (up to `cfg.top` rows).
    pub records: Vec<Record>,
    /// Every probed IP, for diagnostics and post-filtering.
    pub aggregator: Aggregator,
    /// Final beams, per head.
    pub heads: Vec<HeadSummary>,
    pub dispatched: u64,
    pub completed: u64,
    pub cancelled: bool,
}

/// The prefix-tree searcher.
///
/// ```rust
/// use prospector::{CancelToken, Engine, ProbeOutcome, Prober, SearchConfig};
/// use std::net::IpAddr;
///
/// struct AlwaysFast;
/// impl Prober for AlwaysFast {
///     fn probe(&self, _ip: IpAddr, _cancel: &CancelToken) -> ProbeOutcome {
///         ProbeOutcome {
///             ok: true,
///             http_status: 200,
///             connect_ms: 5.0,
///             tls_ms: 15.0,
///             ttfb_ms: 60.0,
///             total_ms: 80.0,
///             colo: None,
///             rounds_ok: 1,
///         }
///     }
/// }
///
/// let cfg = SearchConfig { budget: 64, concurrency: 1, heads: 2, seed: 7, ..SearchConfig::default() };
/// let roots = SearchConfig::parse_roots(&["192.0.2.0/24"]).unwrap();
/// let report = Engine::new(cfg, roots, AlwaysFast).unwrap().run();
/// assert_eq!(report.dispatched, 64);
/// assert!(!report.records.is_empty());
/// ```
pub struct Engine<P> {
    cfg: SearchConfig,
    roots: Vec<Prefix>,
    prober: Arc<P>,
    cancel: CancelToken,
}

impl<P: Prober> Engine<P> {
    /// Validate the configuration and root set; no probe runs yet.
    pub fn new(cfg: SearchConfig, roots: Vec<Prefix>, prober: P) -> Result<Self, ConfigError> {
        cfg.validate()?;
        if roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        Ok(Self {
            cfg,
            roots,
            prober: Arc::new(prober),
            cancel: CancelToken::new(),
        })
    }

    /// A handle the caller can use to stop the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run to budget exhaustion or cancellation and return the report.
    pub fn run(self) -> SearchReport {
        let run_seed = seed::resolve_seed(self.cfg.seed);
        let mut births = 0u64;
        let mut heads: Vec<Head> = (0..self.cfg.heads as usize)
            .map(|i| Head::new(i, &self.roots, run_seed, &mut births))
            .collect();
        let budget = Budget::new(self.cfg.budget);
        let mut aggregator = Aggregator::new();
        let progress = Progress::new(budget.initial());

        let cap = self.cfg.concurrency as usize;
        let (dispatch_tx, dispatch_rx) = bounded::<Job>(cap);
        let (done_tx, done_rx) = bounded::<Done>(cap.saturating_mul(4).max(64));

        let mut dispatched = 0u64;
        let mut completed = 0u64;

        thread::scope(|scope| {
            for _ in 0..cap {
                let rx = dispatch_rx.clone();
                let tx = done_tx.clone();
                let prober = Arc::clone(&self.prober);
                let cancel = self.cancel.clone();
                scope.spawn(move || worker_loop(rx, tx, prober.as_ref(), cancel));
            }
            drop(dispatch_rx);
            drop(done_tx);

            let mut served = 0usize;
            let mut in_flight = 0usize;
            loop {
                while in_flight < cap && !self.cancel.is_cancelled() && budget.try_acquire() {
                    let job = next_job(&self.cfg, &mut heads, served);
                    served = served.wrapping_add(1);
                    if dispatch_tx.send(job).is_err() {
                        break;
                    }
                    in_flight += 1;
                    dispatched += 1;
                }
                if in_flight == 0 {
                    break;
                }
                match done_rx.recv() {
                    Ok(done) => {
                        ingest(&self.cfg, &mut heads, &mut aggregator, &mut births, done);
                        completed += 1;
                        in_flight -= 1;
                        progress.tick(dispatched, completed, &budget, &heads, &aggregator);
                    }
                    Err(_) => break,
                }
            }
            drop(dispatch_tx);
        });

        let cancelled = self.cancel.is_cancelled();
        tracing::info!(
            dispatched,
            completed,
            cancelled,
            distinct_ips = aggregator.len(),
            "search finished"
        );

        SearchReport {
            records: aggregator.top(self.cfg.top as usize),
            heads: heads
                .iter()
                .map(|h| HeadSummary {
                    index: h.index(),
                    arms: h
                        .beam()
                        .iter()
                        .map(|a| ArmSummary {
                            prefix: *a.prefix(),
                            mean: a.mean(),
                            latency_mean: a.latency_mean(),
                            pulls: a.pulls(),
                        })
                        .collect(),
                    splits: h.expanded().len(),
                })
                .collect(),
            aggregator,
            dispatched,
            completed,
            cancelled,
        }
    }
}

fn worker_loop<P: Prober + ?Sized>(
    rx: Receiver<Job>,
    tx: Sender<Done>,
    prober: &P,
    cancel: CancelToken,
) {
    for job in rx.iter() {
        // After cancellation, drain the queue with cheap failures so the
        // coordinator's in-flight accounting still balances.
        let outcome = if cancel.is_cancelled() {
            ProbeOutcome::failed()
        } else {
            prober.probe(job.ip, &cancel)
        };
        let reward = score::reward(&outcome);
        let done = Done {
            head: job.head,
            prefix: job.prefix,
            ip: job.ip,
            outcome,
            reward,
        };
        if tx.send(done).is_err() {
            break;
        }
    }
}

/// Serve the next head round-robin: select an arm under repulsion, then draw
/// an address inside it.
fn next_job(cfg: &SearchConfig, heads: &mut [Head], served: usize) -> Job {
    let h = served % heads.len();
    let siblings: Vec<Vec<Prefix>> = heads
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != h)
        .map(|(_, head)| head.beam_prefixes())
        .collect();
    let head = &mut heads[h];
    let idx = head.select_arm(&siblings, cfg.diversity_weight as f64);
    let prefix = *head.beam()[idx].prefix();
    let ip = head.sample_ip(idx);
    Job { head: h, prefix, ip }
}

/// Fold one completed probe into arm, aggregator, and (maybe) a split.
fn ingest(
    cfg: &SearchConfig,
    heads: &mut [Head],
    aggregator: &mut Aggregator,
    births: &mut u64,
    done: Done,
) {
    aggregator.record(done.ip, done.prefix, &done.outcome);

    let head = &mut heads[done.head];
    // The arm may have been split or evicted while this probe was in flight;
    // credit the deepest surviving arm covering the address instead.
    let idx = match head
        .find_arm(&done.prefix)
        .or_else(|| head.deepest_containing(done.ip))
    {
        Some(idx) => idx,
        None => return,
    };
    head.arm_mut(idx).observe(done.reward, &done.outcome);
    if head.split_due(idx, cfg) {
        head.split_arm(idx, cfg, births);
    }
}

/// Coarse progress emission: one event every `max(100, initial/50)`
/// completions.
struct Progress {
    stride: u64,
}

impl Progress {
    fn new(initial_budget: u32) -> Self {
        Self {
            stride: (initial_budget as u64 / 50).max(100),
        }
    }

    fn tick(
        &self,
        dispatched: u64,
        completed: u64,
        budget: &Budget,
        heads: &[Head],
        aggregator: &Aggregator,
    ) {
        if completed % self.stride != 0 {
            return;
        }
        let arms_per_head: Vec<usize> = heads.iter().map(|h| h.beam().len()).collect();
        let mut depths: BTreeMap<u8, usize> = BTreeMap::new();
        for head in heads {
            for arm in head.beam() {
                *depths.entry(arm.prefix().bits()).or_insert(0) += 1;
            }
        }
        tracing::info!(
            dispatched,
            completed,
            remaining = budget.remaining(),
            best_ms = aggregator.best_ms().unwrap_or(f64::NAN),
            arms = ?arms_per_head,
            depths = ?depths,
            "search progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic per-IP stub: latency derived from the address.
    struct StubProber {
        calls: AtomicU64,
    }

    impl StubProber {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
            }
        }
    }

    impl Prober for StubProber {
        fn probe(&self, _ip: IpAddr, _cancel: &CancelToken) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            ProbeOutcome {
                ok: true,
                http_status: 200,
                connect_ms: 10.0,
                tls_ms: 30.0,
                ttfb_ms: 80.0,
                total_ms: 100.0,
                colo: Some("SJC".to_string()),
                rounds_ok: 2,
            }
        }
    }

    fn small_cfg() -> SearchConfig {
        SearchConfig {
            budget: 40,
            concurrency: 1,
            heads: 2,
            seed: 11,
            top: 10,
            ..SearchConfig::default()
        }
    }

    fn roots() -> Vec<Prefix> {
        SearchConfig::parse_roots(&["192.0.2.0/24"]).unwrap()
    }

    #[test]
    fn run_consumes_exactly_the_budget() {
        let report = Engine::new(small_cfg(), roots(), StubProber::new())
            .unwrap()
            .run();
        assert_eq!(report.dispatched, 40);
        assert_eq!(report.completed, 40);
        assert!(!report.cancelled);
    }

    #[test]
    fn run_with_worker_pool_still_respects_budget() {
        let cfg = SearchConfig {
            concurrency: 8,
            ..small_cfg()
        };
        let report = Engine::new(cfg, roots(), StubProber::new()).unwrap().run();
        assert_eq!(report.dispatched, 40);
        assert_eq!(report.completed, 40);
        assert!(report.aggregator.len() <= 40);
    }

    #[test]
    fn every_probed_ip_is_inside_a_root() {
        let report = Engine::new(small_cfg(), roots(), StubProber::new())
            .unwrap()
            .run();
        let root = roots()[0];
        for (ip, _) in report.aggregator.iter() {
            assert!(root.contains_ip(*ip));
        }
        for head in &report.heads {
            for arm in &head.arms {
                assert!(root.contains(&arm.prefix));
            }
        }
    }

    #[test]
    fn cancelled_engine_stops_early_and_reports_partial_results() {
        let cfg = SearchConfig {
            budget: 100_000,
            ..small_cfg()
        };
        let engine = Engine::new(cfg, roots(), StubProber::new()).unwrap();
        // Cancel before the run starts: the flag is already set, so the
        // coordinator may dispatch nothing at all.
        engine.cancel_token().cancel();
        let report = engine.run();
        assert!(report.cancelled);
        assert_eq!(report.dispatched, 0);
    }

    #[test]
    fn rejects_invalid_configuration_before_probing() {
        let cfg = SearchConfig {
            rounds: 1,
            skip_first: 1,
            ..small_cfg()
        };
        let stub = StubProber::new();
        let err = Engine::new(cfg, roots(), stub);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_roots() {
        assert!(matches!(
            Engine::new(small_cfg(), Vec::new(), StubProber::new()),
            Err(ConfigError::NoRoots)
        ));
    }
}
