//! End-to-end scenarios against deterministic probe stubs.
//!
//! These assert the high-level adaptive property (good regions receive more
//! probes than bad ones) rather than any particular threshold formula.

use prospector::{
    CancelToken, Engine, Prefix, ProbeOutcome, Prober, SearchConfig, SearchReport,
};
use std::net::IpAddr;

/// Latency as a pure function of the address; `None` means the probe fails.
struct MapProber<F>(F);

impl<F: Fn(IpAddr) -> Option<f64> + Send + Sync> Prober for MapProber<F> {
    fn probe(&self, ip: IpAddr, _cancel: &CancelToken) -> ProbeOutcome {
        match (self.0)(ip) {
            Some(total_ms) => ProbeOutcome {
                ok: true,
                http_status: 200,
                connect_ms: total_ms * 0.2,
                tls_ms: total_ms * 0.3,
                ttfb_ms: total_ms * 0.8,
                total_ms,
                colo: Some("SJC".to_string()),
                rounds_ok: 1,
            },
            None => ProbeOutcome::failed(),
        }
    }
}

fn run<F>(cfg: SearchConfig, roots: &[&str], latency: F) -> SearchReport
where
    F: Fn(IpAddr) -> Option<f64> + Send + Sync,
{
    let roots = SearchConfig::parse_roots(roots).unwrap();
    Engine::new(cfg, roots, MapProber(latency)).unwrap().run()
}

fn third_octet(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(v4) => v4.octets()[2],
        IpAddr::V6(_) => unreachable!("v4-only scenario"),
    }
}

#[test]
fn uniform_slash24_converges_and_never_splits_past_max_bits() {
    let cfg = SearchConfig {
        budget: 200,
        concurrency: 1,
        heads: 2,
        rounds: 1,
        skip_first: 0,
        seed: 9,
        top: 20,
        ..SearchConfig::default()
    };
    let report = run(cfg, &["192.0.2.0/24"], |_| Some(100.0));
    let root: Prefix = "192.0.2.0/24".parse().unwrap();

    // Reward for 100 ms is (2000-100)/1980 ≈ 0.96; arm means converge there.
    let expected = (2000.0 - 100.0) / 1980.0;
    for head in &report.heads {
        for arm in &head.arms {
            assert!(arm.prefix.bits() <= 24);
            if arm.pulls >= 20 {
                assert!(
                    (arm.mean - expected).abs() < 0.06,
                    "arm {} mean {} far from {expected}",
                    arm.prefix,
                    arm.mean
                );
            }
        }
    }

    assert_eq!(report.records.len(), 20);
    let mut seen = std::collections::BTreeSet::new();
    for r in &report.records {
        assert!(root.contains_ip(r.ip));
        assert!(seen.insert(r.ip), "duplicate ip in ranking: {}", r.ip);
        assert!((r.total_ms - 100.0).abs() < 1e-9);
    }
}

#[test]
fn bimodal_slash16_concentrates_on_the_low_half() {
    let cfg = SearchConfig {
        budget: 1000,
        concurrency: 1,
        heads: 4,
        rounds: 1,
        skip_first: 0,
        seed: 17,
        diversity_weight: 0.25,
        split_interval: 8,
        min_samples_split: 16,
        top: 20,
        ..SearchConfig::default()
    };
    // Low half of the /16 answers in 50 ms, high half in 1500 ms.
    let report = run(cfg, &["10.0.0.0/16"], |ip| {
        Some(if third_octet(ip) < 128 { 50.0 } else { 1500.0 })
    });

    let (mut low, mut high) = (0u64, 0u64);
    for (ip, stats) in report.aggregator.iter() {
        if third_octet(*ip) < 128 {
            low += stats.probes;
        } else {
            high += stats.probes;
        }
    }
    assert_eq!(low + high, 1000);
    assert!(
        low as f64 >= 0.7 * (low + high) as f64,
        "only {low}/{} probes hit the low half",
        low + high
    );

    let low_root: Prefix = "10.0.0.0/17".parse().unwrap();
    assert_eq!(report.records.len(), 20);
    for r in &report.records {
        assert!(low_root.contains_ip(r.ip), "{} ranked from the slow half", r.ip);
    }
}

#[test]
fn two_heads_repel_into_disjoint_good_regions() {
    let cfg = SearchConfig {
        budget: 1200,
        concurrency: 1,
        heads: 2,
        rounds: 1,
        skip_first: 0,
        seed: 23,
        diversity_weight: 0.8,
        split_interval: 8,
        min_samples_split: 16,
        top: 20,
        ..SearchConfig::default()
    };
    // Two disjoint fast /20s inside the /16; the rest is slow.
    let good_a: Prefix = "10.0.0.0/20".parse().unwrap();
    let good_b: Prefix = "10.0.128.0/20".parse().unwrap();
    let report = run(cfg, &["10.0.0.0/16"], move |ip| {
        Some(if good_a.contains_ip(ip) || good_b.contains_ip(ip) {
            40.0
        } else {
            1200.0
        })
    });

    // Repulsion spreads the effort: neither fast region is starved.
    let (mut in_a, mut in_b, mut total) = (0u64, 0u64, 0u64);
    for (ip, stats) in report.aggregator.iter() {
        total += stats.probes;
        if good_a.contains_ip(*ip) {
            in_a += stats.probes;
        } else if good_b.contains_ip(*ip) {
            in_b += stats.probes;
        }
    }
    assert_eq!(total, 1200);
    let share_a = in_a as f64 / total as f64;
    let share_b = in_b as f64 / total as f64;
    // The two regions together hold 12.5% of the space; an adaptive search
    // must overweight both, and repulsion keeps either head from abandoning
    // one region entirely.
    assert!(share_a + share_b > 0.25, "fast regions underweighted: {share_a:.3}+{share_b:.3}");
    assert!(share_a >= 0.02, "region A starved: {in_a}/{total}");
    assert!(share_b >= 0.02, "region B starved: {in_b}/{total}");

    // The ranking only contains the fast regions.
    assert!(!report.records.is_empty());
    for r in &report.records {
        assert!(
            good_a.contains_ip(r.ip) || good_b.contains_ip(r.ip),
            "{} ranked from a slow region",
            r.ip
        );
    }
}

#[test]
fn small_budget_with_pool_never_overshoots() {
    let cfg = SearchConfig {
        budget: 50,
        concurrency: 10,
        heads: 2,
        rounds: 1,
        skip_first: 0,
        seed: 31,
        ..SearchConfig::default()
    };
    let report = run(cfg, &["192.0.2.0/24"], |_| Some(90.0));
    assert!(report.dispatched <= 50);
    assert_eq!(report.completed, report.dispatched);
    assert!(report.aggregator.len() <= 50);
    assert!(report.records.len() <= 50);
}

#[test]
fn all_failures_yield_empty_ranking_and_no_splits() {
    let cfg = SearchConfig {
        budget: 300,
        concurrency: 1,
        heads: 2,
        rounds: 1,
        skip_first: 0,
        seed: 41,
        split_interval: 8,
        min_samples_split: 8,
        ..SearchConfig::default()
    };
    let root: Prefix = "10.0.0.0/16".parse().unwrap();
    let report = run(cfg, &["10.0.0.0/16"], |_| None);

    assert!(report.records.is_empty());
    assert!(report.aggregator.best_ms().is_none());
    for head in &report.heads {
        // The beam never subdivided: each head still holds exactly its root.
        assert_eq!(head.splits, 0);
        assert_eq!(head.arms.len(), 1);
        assert_eq!(head.arms[0].prefix, root);
        // Zero reward everywhere: alpha pinned at the prior, beta grew.
        assert!((head.arms[0].mean - 1.0 / (2.0 + head.arms[0].pulls as f64)).abs() < 1e-9);
    }
}

#[test]
fn ipv6_smoke_respects_split_step_and_depth_ceiling() {
    let cfg = SearchConfig {
        budget: 500,
        concurrency: 1,
        heads: 8,
        rounds: 1,
        skip_first: 0,
        seed: 47,
        split_step_v6: 4,
        max_bits_v6: 56,
        split_interval: 8,
        min_samples_split: 16,
        ..SearchConfig::default()
    };
    let report = run(cfg, &["2001:db8::/32"], |_| Some(80.0));

    let allowed: Vec<u8> = (32..=56).step_by(4).map(|b| b as u8).collect();
    for head in &report.heads {
        assert!(head.splits >= 1, "head {} never descended", head.index);
        for arm in &head.arms {
            assert!(
                allowed.contains(&arm.prefix.bits()),
                "arm depth {} not on the split lattice",
                arm.prefix.bits()
            );
            assert!(arm.prefix.bits() <= 56);
        }
    }
    assert!(!report.records.is_empty());
}
