//! One independent searcher: a bounded beam of arms, its own RNG stream, and
//! the split/evict bookkeeping.
//!
//! Heads never share posterior state. They interact only through repulsion:
//! an arm that resembles what a sibling head is already working loses
//! selection score, which pushes the heads toward disjoint regions.

use crate::arm::Arm;
use crate::config::SearchConfig;
use crate::prefix::Prefix;
use crate::seed;
use rand::rngs::StdRng;
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Fraction of the parent's evidence a split child inherits.
const KAPPA: f64 = 0.5;

#[derive(Debug)]
pub(crate) struct Head {
    index: usize,
    beam: Vec<Arm>,
    /// Every prefix this head has split, ancestry for its current beam.
    expanded: BTreeSet<Prefix>,
    rng: StdRng,
}

impl Head {
    /// Seed a head with one fresh arm per root prefix.
    pub fn new(index: usize, roots: &[Prefix], run_seed: u64, births: &mut u64) -> Self {
        let beam = roots
            .iter()
            .map(|&p| {
                let arm = Arm::seeded(p, *births);
                *births += 1;
                arm
            })
            .collect();
        Self {
            index,
            beam,
            expanded: BTreeSet::new(),
            rng: seed::head_rng(run_seed, index),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn beam(&self) -> &[Arm] {
        &self.beam
    }

    pub fn arm_mut(&mut self, idx: usize) -> &mut Arm {
        &mut self.beam[idx]
    }

    pub fn beam_prefixes(&self) -> Vec<Prefix> {
        self.beam.iter().map(|a| *a.prefix()).collect()
    }

    pub fn expanded(&self) -> &BTreeSet<Prefix> {
        &self.expanded
    }

    /// Maximum similarity between `prefix` and any arm in any sibling beam.
    fn repulsion(prefix: &Prefix, siblings: &[Vec<Prefix>]) -> f64 {
        siblings
            .iter()
            .flatten()
            .map(|p| prefix.similarity(p))
            .fold(0.0, f64::max)
    }

    /// Pick the arm with the highest selection score
    /// `S(a) = thompson_draw(a) − diversity_weight · R(a)`.
    ///
    /// Ties go to the arm with fewer pulls, then the lower birth number.
    pub fn select_arm(&mut self, siblings: &[Vec<Prefix>], diversity_weight: f64) -> usize {
        debug_assert!(!self.beam.is_empty());
        let mut best = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for idx in 0..self.beam.len() {
            let arm = &self.beam[idx];
            let draw = arm.thompson_draw(&mut self.rng);
            let score = draw - diversity_weight * Self::repulsion(arm.prefix(), siblings);
            let better = match score.total_cmp(&best_score) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => {
                    let cur = &self.beam[best];
                    (arm.pulls(), arm.birth()) < (cur.pulls(), cur.birth())
                }
            };
            if better {
                best = idx;
                best_score = score;
            }
        }
        best
    }

    /// Draw a uniform address inside arm `idx`'s prefix.
    pub fn sample_ip(&mut self, idx: usize) -> IpAddr {
        let prefix = *self.beam[idx].prefix();
        prefix.random_ip(&mut self.rng)
    }

    pub fn find_arm(&self, prefix: &Prefix) -> Option<usize> {
        self.beam.iter().position(|a| a.prefix() == prefix)
    }

    /// The deepest beam arm whose prefix contains `ip`, for rewards whose
    /// original arm has already been split or evicted.
    pub fn deepest_containing(&self, ip: IpAddr) -> Option<usize> {
        self.beam
            .iter()
            .enumerate()
            .filter(|(_, a)| a.prefix().contains_ip(ip))
            .max_by_key(|(_, a)| a.prefix().bits())
            .map(|(idx, _)| idx)
    }

    /// Median of the beam's posterior means.
    fn median_mean(&self) -> f64 {
        if self.beam.is_empty() {
            return 0.0;
        }
        let mut means: Vec<f64> = self.beam.iter().map(Arm::mean).collect();
        means.sort_by(f64::total_cmp);
        let mid = means.len() / 2;
        if means.len() % 2 == 1 {
            means[mid]
        } else {
            (means[mid - 1] + means[mid]) / 2.0
        }
    }

    /// The split threshold: the running median of the beam's means, floored
    /// so regions at or below chance never subdivide.
    pub fn split_threshold(&self, cfg: &SearchConfig) -> f64 {
        self.median_mean().max(cfg.split_mean_floor)
    }

    /// Whether arm `idx` has earned a split at this ingestion.
    pub fn split_due(&self, idx: usize, cfg: &SearchConfig) -> bool {
        let arm = &self.beam[idx];
        if arm.pulls() == 0 || arm.pulls() % cfg.split_interval as u64 != 0 {
            return false;
        }
        if arm.pulls() < cfg.min_samples_split as u64 {
            return false;
        }
        let step = cfg.split_step_for(arm.prefix());
        if !arm.prefix().can_split(step, cfg.max_bits_for(arm.prefix())) {
            return false;
        }
        arm.mean() >= self.split_threshold(cfg)
    }

    /// Replace arm `idx` with its children (scaled-down priors, fresh birth
    /// numbers), then evict down to the beam cap.
    pub fn split_arm(&mut self, idx: usize, cfg: &SearchConfig, births: &mut u64) {
        let parent = self.beam.remove(idx);
        let step = cfg.split_step_for(parent.prefix());
        let children = parent.prefix().split(step);
        let (alpha, beta) = parent.child_prior(KAPPA, children.len() as u32);
        self.expanded.insert(*parent.prefix());
        for child in children {
            self.beam.push(Arm::with_prior(child, *births, alpha, beta));
            *births += 1;
        }
        self.evict_overflow(cfg.beam as usize);
    }

    /// Drop the weakest arms (smallest posterior mean, oldest birth first)
    /// until the beam fits its cap.
    fn evict_overflow(&mut self, cap: usize) {
        while self.beam.len() > cap {
            let victim = self
                .beam
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.mean()
                        .total_cmp(&b.mean())
                        .then_with(|| a.birth().cmp(&b.birth()))
                })
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => {
                    self.beam.remove(idx);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;

    fn p(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    fn cfg() -> SearchConfig {
        SearchConfig {
            beam: 8,
            split_interval: 4,
            min_samples_split: 4,
            split_step_v4: 2,
            max_bits_v4: 24,
            ..SearchConfig::default()
        }
    }

    fn ok_outcome(total_ms: f64) -> ProbeOutcome {
        ProbeOutcome {
            ok: true,
            http_status: 200,
            connect_ms: 10.0,
            tls_ms: 20.0,
            ttfb_ms: total_ms,
            total_ms,
            colo: None,
            rounds_ok: 1,
        }
    }

    fn head_with(roots: &[&str]) -> (Head, u64) {
        let roots: Vec<Prefix> = roots.iter().map(|s| p(s)).collect();
        let mut births = 0u64;
        let head = Head::new(0, &roots, 42, &mut births);
        (head, births)
    }

    #[test]
    fn seeding_assigns_monotone_births() {
        let (head, births) = head_with(&["10.0.0.0/16", "172.16.0.0/16"]);
        assert_eq!(head.beam().len(), 2);
        assert_eq!(births, 2);
        assert!(head.beam()[0].birth() < head.beam()[1].birth());
    }

    #[test]
    fn repulsion_penalizes_sibling_overlap() {
        // Two arms; a sibling head camps on the first one's region.
        let (mut head, _) = head_with(&["10.0.0.0/16", "172.16.0.0/16"]);
        let siblings = vec![vec![p("10.0.0.0/16")]];
        let mut picks = [0usize; 2];
        for _ in 0..200 {
            picks[head.select_arm(&siblings, 1.0)] += 1;
        }
        assert!(
            picks[1] > picks[0] * 3,
            "overlapped arm should rarely win: {picks:?}"
        );
    }

    #[test]
    fn zero_weight_disables_repulsion() {
        let (mut head, _) = head_with(&["10.0.0.0/16"]);
        let siblings = vec![vec![p("10.0.0.0/16")]];
        // With one arm the pick is forced either way; the score must not
        // matter even at full overlap.
        assert_eq!(head.select_arm(&siblings, 0.0), 0);
        assert_eq!(head.select_arm(&siblings, 1.0), 0);
    }

    #[test]
    fn split_replaces_parent_with_scaled_children() {
        let (mut head, mut births) = head_with(&["10.0.0.0/16"]);
        for _ in 0..8 {
            head.arm_mut(0).observe(1.0, &ok_outcome(50.0));
        }
        let parent_alpha = head.beam()[0].alpha();
        head.split_arm(0, &cfg(), &mut births);

        assert_eq!(head.beam().len(), 4);
        assert!(head.expanded().contains(&p("10.0.0.0/16")));
        for child in head.beam() {
            assert_eq!(child.prefix().bits(), 18);
            assert!(p("10.0.0.0/16").contains(child.prefix()));
            let want = 1.0 + 0.5 * (parent_alpha - 1.0) / 4.0;
            assert!((child.alpha() - want).abs() < 1e-9);
            assert!(child.beta() >= 1.0);
        }
    }

    #[test]
    fn split_due_needs_cadence_samples_and_threshold() {
        let (mut head, _) = head_with(&["10.0.0.0/16"]);
        let cfg = cfg();
        assert!(!head.split_due(0, &cfg)); // zero pulls

        for i in 1..=8u64 {
            head.arm_mut(0).observe(1.0, &ok_outcome(50.0));
            let due = head.split_due(0, &cfg);
            // interval 4, min samples 4: due exactly at pulls 4 and 8.
            assert_eq!(due, i % 4 == 0, "pulls={i}");
        }
    }

    #[test]
    fn all_failures_never_split() {
        let (mut head, _) = head_with(&["10.0.0.0/16"]);
        let cfg = cfg();
        for _ in 0..64 {
            head.arm_mut(0).observe(0.0, &ProbeOutcome::failed());
        }
        // Posterior mean collapsed toward zero, below the floor.
        assert!(head.beam()[0].mean() < 0.1);
        assert!(!head.split_due(0, &cfg));
    }

    #[test]
    fn leaf_arms_never_split() {
        let (mut head, _) = head_with(&["10.0.0.0/23"]);
        let cfg = cfg(); // step 2 would overshoot max_bits 24
        for _ in 0..8 {
            head.arm_mut(0).observe(1.0, &ok_outcome(30.0));
        }
        assert!(!head.split_due(0, &cfg));
    }

    #[test]
    fn eviction_drops_lowest_mean_oldest_birth() {
        let (mut head, mut births) = head_with(&["10.0.0.0/16", "172.16.0.0/16"]);
        // Make the first root clearly strong, then split it with a tiny beam
        // cap: the two weak equal-mean arms lose, oldest first.
        for _ in 0..8 {
            head.arm_mut(0).observe(1.0, &ok_outcome(40.0));
        }
        let cfg = SearchConfig {
            beam: 3,
            ..cfg()
        };
        head.split_arm(0, &cfg, &mut births);
        assert_eq!(head.beam().len(), 3);
        // The untouched sibling root (mean 0.5, oldest birth among the weak)
        // must be gone; all survivors descend from the split parent.
        assert!(head.find_arm(&p("172.16.0.0/16")).is_none());
        for arm in head.beam() {
            assert!(p("10.0.0.0/16").contains(arm.prefix()));
        }
    }

    #[test]
    fn deepest_containing_prefers_longer_prefixes() {
        let (mut head, mut births) = head_with(&["10.0.0.0/8"]);
        let cfg = SearchConfig {
            beam: 16,
            ..cfg()
        };
        for _ in 0..8 {
            head.arm_mut(0).observe(1.0, &ok_outcome(40.0));
        }
        head.split_arm(0, &cfg, &mut births);
        let ip: IpAddr = "10.64.0.1".parse().unwrap();
        let idx = head.deepest_containing(ip).unwrap();
        assert!(head.beam()[idx].prefix().contains_ip(ip));
        assert_eq!(head.beam()[idx].prefix().bits(), 10);
        let outside: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(head.deepest_containing(outside).is_none());
    }

    #[test]
    fn median_threshold_floors_at_configured_minimum() {
        let (mut head, _) = head_with(&["10.0.0.0/16", "172.16.0.0/16"]);
        let cfg = cfg();
        for _ in 0..32 {
            head.arm_mut(0).observe(0.1, &ok_outcome(1900.0));
            head.arm_mut(1).observe(0.1, &ok_outcome(1900.0));
        }
        // Median is low; the floor keeps the threshold at 0.5.
        assert!((head.split_threshold(&cfg) - cfg.split_mean_floor).abs() < 1e-9);
    }
}
