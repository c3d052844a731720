//! Run the searcher against a simulated address space and print the ranking.
//!
//! No network involved: the prober is a stub whose latency depends on the
//! address, with one "good" region hidden inside the root prefix.
//!
//! ```sh
//! cargo run --example getting_started
//! ```

use prospector::{
    emit_all, CancelToken, Engine, Prefix, ProbeOutcome, Prober, SearchConfig, TextEmitter,
};
use std::net::IpAddr;

struct SimulatedSpace {
    fast_region: Prefix,
}

impl Prober for SimulatedSpace {
    fn probe(&self, ip: IpAddr, _cancel: &CancelToken) -> ProbeOutcome {
        // 60 ms inside the fast region, 900 ms elsewhere, 10% hard failures.
        let IpAddr::V4(v4) = ip else {
            return ProbeOutcome::failed();
        };
        if v4.octets()[3] % 10 == 0 {
            return ProbeOutcome::failed();
        }
        let total_ms = if self.fast_region.contains_ip(ip) {
            60.0
        } else {
            900.0
        };
        ProbeOutcome {
            ok: true,
            http_status: 200,
            connect_ms: total_ms * 0.2,
            tls_ms: total_ms * 0.3,
            ttfb_ms: total_ms * 0.8,
            total_ms,
            colo: Some("SIM".to_string()),
            rounds_ok: 2,
        }
    }
}

fn main() {
    let cfg = SearchConfig {
        budget: 2000,
        concurrency: 8,
        heads: 4,
        seed: 7,
        rounds: 1,
        skip_first: 0,
        top: 10,
        ..SearchConfig::default()
    };
    let roots = SearchConfig::parse_roots(&["10.0.0.0/16"]).expect("static CIDR");
    let prober = SimulatedSpace {
        fast_region: "10.0.64.0/20".parse().expect("static CIDR"),
    };

    let report = Engine::new(cfg, roots, prober)
        .expect("valid config")
        .run();

    eprintln!(
        "probed {} addresses ({} dispatched), {} ranked",
        report.aggregator.len(),
        report.dispatched,
        report.records.len()
    );
    let mut emitter = TextEmitter::new(std::io::stdout().lock());
    emit_all(&mut emitter, &report.records).expect("stdout");

    // The fast region should own the ranking.
    let fast: Prefix = "10.0.64.0/20".parse().expect("static CIDR");
    let hits = report
        .records
        .iter()
        .filter(|r| fast.contains_ip(r.ip))
        .count();
    eprintln!("{hits}/{} ranked addresses fall inside {fast}", report.records.len());
}
