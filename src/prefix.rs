//! CIDR prefix algebra: containment, equal-width splitting, uniform address
//! sampling, and shared-bit similarity.
//!
//! The search engine is polymorphic over IP families through the capability set
//! {`random_ip`, `split`, `contains`, family width}; a [`Prefix`] carries its
//! family on the `IpAddr` base rather than through generics, so beams can mix
//! v4 and v6 arms freely.

use rand::Rng;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when constructing or parsing a [`Prefix`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    /// The string was not `base/bits`.
    #[error("invalid CIDR `{0}`: expected `base/bits`")]
    Malformed(String),
    /// The prefix length does not fit the address family.
    #[error("prefix length /{bits} out of range (max /{max} for this family)")]
    BitsOutOfRange { bits: u8, max: u8 },
    /// The base address has non-zero bits below the prefix length.
    #[error("`{0}` has host bits set; the base must be the network address")]
    HostBitsSet(String),
}

/// An IP network `base/bits`.
///
/// Invariants (enforced by [`Prefix::new`]): all bits of `base` below `bits`
/// are zero, and `bits` fits the family (≤ 32 for v4, ≤ 128 for v6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix {
    base: IpAddr,
    bits: u8,
}

impl Prefix {
    /// Create a prefix, validating length and host bits.
    pub fn new(base: IpAddr, bits: u8) -> Result<Self, PrefixError> {
        let max = match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if bits > max {
            return Err(PrefixError::BitsOutOfRange { bits, max });
        }
        let p = Self { base, bits };
        match base {
            IpAddr::V4(v4) => {
                if u32::from(v4) & p.host_mask_v4() != 0 {
                    return Err(PrefixError::HostBitsSet(p.to_string()));
                }
            }
            IpAddr::V6(v6) => {
                if u128::from(v6) & p.host_mask_v6() != 0 {
                    return Err(PrefixError::HostBitsSet(p.to_string()));
                }
            }
        }
        Ok(p)
    }

    /// The network address.
    pub fn base(&self) -> IpAddr {
        self.base
    }

    /// The prefix length.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Address width of the family: 32 for v4, 128 for v6.
    pub fn family_bits(&self) -> u8 {
        match self.base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// Whether this prefix is IPv4.
    pub fn is_v4(&self) -> bool {
        matches!(self.base, IpAddr::V4(_))
    }

    // Mask of the host portion. `bits == 0` must yield all-ones, so the shift
    // is expressed as a checked double-shift rather than `>> bits` alone.
    fn host_mask_v4(&self) -> u32 {
        if self.bits == 0 {
            u32::MAX
        } else if self.bits >= 32 {
            0
        } else {
            u32::MAX >> self.bits
        }
    }

    fn host_mask_v6(&self) -> u128 {
        if self.bits == 0 {
            u128::MAX
        } else if self.bits >= 128 {
            0
        } else {
            u128::MAX >> self.bits
        }
    }

    /// Uniformly sample an address whose first `bits` bits equal `base`.
    ///
    /// For v6 the host portion is a full 128-bit uniform draw masked down, so
    /// deep prefixes keep uniform coverage of the remaining bits.
    pub fn random_ip<R: Rng>(&self, rng: &mut R) -> IpAddr {
        match self.base {
            IpAddr::V4(v4) => {
                let host = rng.random::<u32>() & self.host_mask_v4();
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) | host))
            }
            IpAddr::V6(v6) => {
                let host = rng.random::<u128>() & self.host_mask_v6();
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) | host))
            }
        }
    }

    /// Whether `bits + step` still fits under `max_bits` for this family.
    ///
    /// This is the split gate the engine uses: a prefix that cannot take a
    /// full step without crossing `max_bits` is treated as a leaf.
    pub fn can_split(&self, step: u8, max_bits: u8) -> bool {
        step > 0 && self.bits.saturating_add(step) <= max_bits.min(self.family_bits())
    }

    /// Produce the `2^step` children of width `bits + step`, in address order.
    ///
    /// Callers check [`Prefix::can_split`] first; the width invariant is
    /// debug-asserted here.
    pub fn split(&self, step: u8) -> Vec<Prefix> {
        debug_assert!(step > 0 && self.bits + step <= self.family_bits());
        let child_bits = self.bits + step;
        let fanout = 1u32 << step;
        let mut children = Vec::with_capacity(fanout as usize);
        match self.base {
            IpAddr::V4(v4) => {
                let base = u32::from(v4);
                let shift = 32 - child_bits as u32;
                for i in 0..fanout {
                    let child = base | ((i as u32) << shift);
                    children.push(Prefix {
                        base: IpAddr::V4(Ipv4Addr::from(child)),
                        bits: child_bits,
                    });
                }
            }
            IpAddr::V6(v6) => {
                let base = u128::from(v6);
                let shift = 128 - child_bits as u32;
                for i in 0..fanout {
                    let child = base | ((i as u128) << shift);
                    children.push(Prefix {
                        base: IpAddr::V6(Ipv6Addr::from(child)),
                        bits: child_bits,
                    });
                }
            }
        }
        children
    }

    /// Whether `other` is a sub-prefix of `self` (same family, deeper or equal
    /// length, identical leading bits).
    pub fn contains(&self, other: &Prefix) -> bool {
        if other.bits < self.bits {
            return false;
        }
        match (self.base, other.base) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let keep = !self.host_mask_v4();
                u32::from(a) & keep == u32::from(b) & keep
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let keep = !self.host_mask_v6();
                u128::from(a) & keep == u128::from(b) & keep
            }
            _ => false,
        }
    }

    /// Whether a concrete address falls inside this prefix.
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        match (self.base, ip) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let keep = !self.host_mask_v4();
                u32::from(a) & keep == u32::from(b) & keep
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let keep = !self.host_mask_v6();
                u128::from(a) & keep == u128::from(b) & keep
            }
            _ => false,
        }
    }

    /// Length of the longest common prefix of the two bases, capped at the
    /// family width.
    pub fn shared_prefix_bits(&self, other: &Prefix) -> u8 {
        match (self.base, other.base) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                (u32::from(a) ^ u32::from(b)).leading_zeros().min(32) as u8
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                (u128::from(a) ^ u128::from(b)).leading_zeros().min(128) as u8
            }
            _ => 0,
        }
    }

    /// Shared-bit similarity in `[0, 1]`.
    ///
    /// Zero when the prefixes are disjoint (neither contains the other);
    /// otherwise `shared_bits / max(bits_a, bits_b)` with `shared_bits`
    /// capped so that identical regions score exactly 1.
    pub fn similarity(&self, other: &Prefix) -> f64 {
        if !(self.contains(other) || other.contains(self)) {
            return 0.0;
        }
        let denom = self.bits.max(other.bits);
        if denom == 0 {
            return 1.0; // both are the whole address space
        }
        let shared = self.shared_prefix_bits(other).min(denom);
        shared as f64 / denom as f64
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.bits)
    }
}

impl FromStr for Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, bits) = s
            .split_once('/')
            .ok_or_else(|| PrefixError::Malformed(s.to_string()))?;
        let base: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| PrefixError::Malformed(s.to_string()))?;
        let bits: u8 = bits
            .trim()
            .parse()
            .map_err(|_| PrefixError::Malformed(s.to_string()))?;
        Prefix::new(base, bits)
    }
}

impl serde::Serialize for Prefix {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Prefix {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn p(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn parse_roundtrip() {
        assert_eq!(p("192.0.2.0/24").to_string(), "192.0.2.0/24");
        assert_eq!(p("2001:db8::/32").to_string(), "2001:db8::/32");
    }

    #[test]
    fn parse_rejects_host_bits() {
        assert_eq!(
            "192.0.2.1/24".parse::<Prefix>(),
            Err(PrefixError::HostBitsSet("192.0.2.1/24".to_string()))
        );
    }

    #[test]
    fn parse_rejects_bad_length() {
        assert!(matches!(
            "192.0.2.0/33".parse::<Prefix>(),
            Err(PrefixError::BitsOutOfRange { bits: 33, max: 32 })
        ));
        assert!(matches!(
            "2001:db8::/129".parse::<Prefix>(),
            Err(PrefixError::BitsOutOfRange { bits: 129, max: 128 })
        ));
        assert!(matches!(
            "not-a-cidr".parse::<Prefix>(),
            Err(PrefixError::Malformed(_))
        ));
    }

    #[test]
    fn split_produces_ordered_children() {
        let children = p("10.0.0.0/16").split(2);
        assert_eq!(children.len(), 4);
        assert_eq!(children[0], p("10.0.0.0/18"));
        assert_eq!(children[1], p("10.0.64.0/18"));
        assert_eq!(children[2], p("10.0.128.0/18"));
        assert_eq!(children[3], p("10.0.192.0/18"));
        for c in &children {
            assert!(p("10.0.0.0/16").contains(c));
        }
    }

    #[test]
    fn split_v6() {
        let children = p("2001:db8::/32").split(4);
        assert_eq!(children.len(), 16);
        assert_eq!(children[0], p("2001:db8::/36"));
        assert_eq!(children[15], p("2001:db8:f000::/36"));
    }

    #[test]
    fn can_split_respects_max_bits() {
        assert!(p("10.0.0.0/16").can_split(2, 24));
        assert!(!p("10.0.0.0/23").can_split(2, 24)); // 25 > 24
        assert!(!p("10.0.0.0/24").can_split(2, 24));
        assert!(!p("10.0.0.0/16").can_split(0, 24));
    }

    #[test]
    fn containment() {
        assert!(p("10.0.0.0/8").contains(&p("10.1.0.0/16")));
        assert!(!p("10.1.0.0/16").contains(&p("10.0.0.0/8")));
        assert!(!p("10.0.0.0/8").contains(&p("11.0.0.0/16")));
        assert!(p("0.0.0.0/0").contains(&p("203.0.113.0/24")));
        assert!(!p("10.0.0.0/8").contains(&p("2001:db8::/32")));
    }

    #[test]
    fn random_ip_stays_inside() {
        let mut rng = StdRng::seed_from_u64(7);
        for s in ["192.0.2.0/24", "10.0.0.0/8", "2001:db8::/32", "0.0.0.0/0"] {
            let pfx = p(s);
            for _ in 0..1000 {
                assert!(pfx.contains_ip(pfx.random_ip(&mut rng)));
            }
        }
    }

    #[test]
    fn random_ip_on_full_length_prefix_is_the_base() {
        let mut rng = StdRng::seed_from_u64(7);
        let pfx = p("192.0.2.7/32");
        assert_eq!(pfx.random_ip(&mut rng), pfx.base());
    }

    #[test]
    fn similarity_cases() {
        // Disjoint → 0.
        assert_eq!(p("10.0.0.0/20").similarity(&p("10.0.128.0/20")), 0.0);
        // Identical → 1.
        assert_eq!(p("10.0.0.0/16").similarity(&p("10.0.0.0/16")), 1.0);
        // Nested with shared base bits.
        let sim = p("10.0.0.0/8").similarity(&p("10.1.0.0/16"));
        assert!(sim > 0.9 && sim < 1.0, "sim={sim}");
        // Symmetric.
        assert_eq!(
            p("10.0.0.0/8").similarity(&p("10.1.0.0/16")),
            p("10.1.0.0/16").similarity(&p("10.0.0.0/8"))
        );
    }
}
