//! Per-IP rolling statistics and the global Top-N ranking.
//!
//! The aggregator is fed by the single ingest consumer, so a plain `BTreeMap`
//! suffices. Its ordered iteration keeps rankings independent of probe
//! completion order: ties are always broken by stable per-IP identity.

use crate::prefix::Prefix;
use crate::probe::ProbeOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Rolling statistics for one concrete IP.
#[derive(Debug, Clone)]
pub struct IpStats {
    /// Probe invocations against this IP.
    pub probes: u64,
    /// Invocations with at least one successful round.
    pub ok_probes: u64,
    /// Total successful rounds across invocations.
    pub rounds_ok: u64,
    /// Running means over successful invocations.
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub ttfb_ms: f64,
    pub total_ms: f64,
    /// Most recently observed HTTP status.
    pub http_status: u16,
    /// Most recently observed colo.
    pub colo: Option<String>,
    /// The arm prefix this IP was first probed under.
    pub origin: Prefix,
}

impl IpStats {
    fn new(origin: Prefix) -> Self {
        Self {
            probes: 0,
            ok_probes: 0,
            rounds_ok: 0,
            connect_ms: 0.0,
            tls_ms: 0.0,
            ttfb_ms: 0.0,
            total_ms: 0.0,
            http_status: 0,
            colo: None,
            origin,
        }
    }

    fn record(&mut self, outcome: &ProbeOutcome) {
        self.probes += 1;
        if outcome.http_status != 0 {
            self.http_status = outcome.http_status;
        }
        if !outcome.ok {
            return;
        }
        self.ok_probes += 1;
        self.rounds_ok += outcome.rounds_ok as u64;
        let n = self.ok_probes as f64;
        self.connect_ms += (outcome.connect_ms - self.connect_ms) / n;
        self.tls_ms += (outcome.tls_ms - self.tls_ms) / n;
        self.ttfb_ms += (outcome.ttfb_ms - self.ttfb_ms) / n;
        self.total_ms += (outcome.total_ms - self.total_ms) / n;
        if outcome.colo.is_some() {
            self.colo = outcome.colo.clone();
        }
    }
}

/// One row of the final ranking, ready for a formatter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub ip: IpAddr,
    /// The prefix the IP was discovered under.
    pub prefix: Prefix,
    pub ok: bool,
    pub http_status: u16,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub ttfb_ms: f64,
    pub total_ms: f64,
    /// Ranking key: mean total latency in milliseconds.
    pub score_ms: f64,
    pub colo: Option<String>,
    pub rounds_ok: u64,
}

/// Collects every probed IP for the duration of the run.
#[derive(Debug, Default)]
pub struct Aggregator {
    ips: BTreeMap<IpAddr, IpStats>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one probe outcome into the stats for `ip`.
    pub fn record(&mut self, ip: IpAddr, origin: Prefix, outcome: &ProbeOutcome) {
        self.ips
            .entry(ip)
            .or_insert_with(|| IpStats::new(origin))
            .record(outcome);
    }

    /// Number of distinct IPs seen.
    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    pub fn get(&self, ip: &IpAddr) -> Option<&IpStats> {
        self.ips.get(ip)
    }

    /// Every IP seen, in address order (including never-successful ones,
    /// which are useful diagnostics but excluded from the ranking).
    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &IpStats)> {
        self.ips.iter()
    }

    /// The best mean latency observed so far, if any IP has succeeded.
    pub fn best_ms(&self) -> Option<f64> {
        self.ips
            .values()
            .filter(|s| s.ok_probes > 0)
            .map(|s| s.total_ms)
            .min_by(f64::total_cmp)
    }

    /// The Top-N ranking: successful IPs sorted by mean latency ascending,
    /// then successful-round count descending, then address.
    pub fn top(&self, n: usize) -> Vec<Record> {
        let mut rows: Vec<(&IpAddr, &IpStats)> =
            self.ips.iter().filter(|(_, s)| s.ok_probes > 0).collect();
        rows.sort_by(|(ip_a, a), (ip_b, b)| {
            a.total_ms
                .total_cmp(&b.total_ms)
                .then_with(|| b.rounds_ok.cmp(&a.rounds_ok))
                .then_with(|| ip_a.cmp(ip_b))
        });
        rows.into_iter()
            .take(n)
            .map(|(ip, s)| Record {
                ip: *ip,
                prefix: s.origin,
                ok: true,
                http_status: s.http_status,
                connect_ms: s.connect_ms,
                tls_ms: s.tls_ms,
                ttfb_ms: s.ttfb_ms,
                total_ms: s.total_ms,
                score_ms: s.total_ms,
                colo: s.colo.clone(),
                rounds_ok: s.rounds_ok,
            })
            .collect()
    }
}
