//! # Stage: Assignment Engine
//!
//! ## Responsibility
//! Maps an identity to an alternative index. Unforced identities are
//! bucketed by a pinned hash of `(experiment name, identity)`; forced
//! identities get whatever [`Assignments::force`] recorded for them.
//!
//! ## Guarantees
//! - Deterministic routing: a given `(name, identity)` always maps to the
//!   same bucket, across processes and restarts
//! - Sticky: once an identity is assigned, its assignment never moves
//! - Not thread-safe on its own: the owning experiment serialises access
//!
//! ## NOT Responsible For
//! - Counting participants (the chosen [`crate::alternative::Alternative`] does)

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::identity::Identity;

/// Bucket `identity` into `[0, buckets)` for the experiment `name`.
///
/// SHA-1 over the UTF-8 bytes of `"{name}:{identity}"`, first eight digest
/// bytes read big-endian, reduced modulo `buckets`. Returns 0 when
/// `buckets` is 0.
pub fn bucket(name: &str, identity: &Identity, buckets: usize) -> usize {
    if buckets == 0 {
        return 0;
    }
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(identity.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % buckets as u64) as usize
}

/// Result of resolving one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Alternative whose value the caller should receive.
    pub chosen: usize,
    /// Alternative the identity is counted under.
    pub assigned: usize,
    /// `true` the first time this identity was assigned.
    pub first_assignment: bool,
}

/// Sticky assignments and forced choices for one experiment.
#[derive(Debug, Default)]
pub struct Assignments {
    assigned: HashMap<Identity, usize>,
    forced: HashMap<Identity, usize>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `identity`, assigning it on first sight.
    ///
    /// A forced choice decides the first assignment; afterwards it only
    /// changes which value is returned, never where the identity is counted.
    pub fn resolve(&mut self, name: &str, identity: &Identity, buckets: usize) -> Resolution {
        let forced = self.forced.get(identity).copied();
        if let Some(&assigned) = self.assigned.get(identity) {
            return Resolution {
                chosen: forced.unwrap_or(assigned),
                assigned,
                first_assignment: false,
            };
        }
        let assigned = forced.unwrap_or_else(|| bucket(name, identity, buckets));
        self.assigned.insert(identity.clone(), assigned);
        Resolution { chosen: assigned, assigned, first_assignment: true }
    }

    /// Where `identity` is counted, if it has been assigned.
    pub fn assigned(&self, identity: &Identity) -> Option<usize> {
        self.assigned.get(identity).copied()
    }

    pub fn force(&mut self, identity: Identity, index: usize) {
        self.forced.insert(identity, index);
    }

    pub fn forced(&self, identity: &Identity) -> Option<usize> {
        self.forced.get(identity).copied()
    }

    /// Number of distinct identities assigned so far.
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    pub fn clear(&mut self) {
        self.assigned.clear();
        self.forced.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ===== bucket =====

    #[test]
    fn test_bucket_deterministic() {
        let id = Identity::new("6e98ec");
        let first = bucket("foobar", &id, 2);
        for _ in 0..1000 {
            assert_eq!(bucket("foobar", &id, 2), first);
        }
    }

    #[test]
    fn test_bucket_pinned_value() {
        // SHA-1("exp:user") starts 78c24e28c0596e27.
        // SHA-1("foobar:6e98ec") starts 657f25e237f5d3c2.
        assert_eq!(bucket("exp", &Identity::new("user"), 7), 5);
        assert_eq!(bucket("exp", &Identity::new("user"), 2), 1);
        assert_eq!(bucket("foobar", &Identity::new("6e98ec"), 2), 0);
    }

    #[test]
    fn test_bucket_zero_buckets() {
        assert_eq!(bucket("x", &Identity::new("y"), 0), 0);
    }

    #[test]
    fn test_bucket_depends_on_experiment_name() {
        let differs = (0..200u64)
            .map(Identity::from)
            .any(|id| bucket("alpha", &id, 2) != bucket("beta", &id, 2));
        assert!(differs, "experiment name must feed the hash");
    }

    #[test]
    fn test_bucket_split_approximately_even() {
        let ones = (0..1000u64).filter(|&i| bucket("split", &Identity::from(i), 2) == 1).count();
        // Should be ~500 ± 100
        assert!((400..=600).contains(&ones), "expected ~500 in bucket 1, got {ones}");
    }

    proptest! {
        #[test]
        fn prop_bucket_in_range(name in "[a-z_]{1,12}", id in ".{0,24}", buckets in 1usize..16) {
            prop_assert!(bucket(&name, &Identity::new(id), buckets) < buckets);
        }
    }

    // ===== Assignments =====

    #[test]
    fn test_resolve_first_then_sticky() {
        let mut a = Assignments::new();
        let id = Identity::new("u1");
        let first = a.resolve("exp", &id, 3);
        assert!(first.first_assignment);
        assert_eq!(first.chosen, first.assigned);
        let second = a.resolve("exp", &id, 3);
        assert!(!second.first_assignment);
        assert_eq!(second.assigned, first.assigned);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_force_before_assignment_decides_assignment() {
        let mut a = Assignments::new();
        let id = Identity::new("u1");
        let other = (bucket("exp", &id, 2) + 1) % 2;
        a.force(id.clone(), other);
        let r = a.resolve("exp", &id, 2);
        assert_eq!(r, Resolution { chosen: other, assigned: other, first_assignment: true });
    }

    #[test]
    fn test_force_after_assignment_keeps_counting_place() {
        let mut a = Assignments::new();
        let id = Identity::new("u1");
        let original = a.resolve("exp", &id, 2).assigned;
        let other = (original + 1) % 2;
        a.force(id.clone(), other);
        let r = a.resolve("exp", &id, 2);
        assert_eq!(r.chosen, other);
        assert_eq!(r.assigned, original);
        assert_eq!(a.assigned(&id), Some(original));
    }

    proptest! {
        #[test]
        fn prop_resolve_idempotent(
            name in "[a-z_]{1,12}",
            ids in prop::collection::vec(".{0,24}", 1..20),
            buckets in 1usize..8,
        ) {
            let ids: Vec<Identity> = ids.into_iter().map(Identity::new).collect();
            let mut a = Assignments::new();
            let first: Vec<Resolution> =
                ids.iter().map(|id| a.resolve(&name, id, buckets)).collect();
            for (id, earlier) in ids.iter().zip(&first) {
                let again = a.resolve(&name, id, buckets);
                prop_assert_eq!(again.assigned, earlier.assigned);
                prop_assert_eq!(again.chosen, earlier.chosen);
                prop_assert!(!again.first_assignment);
                prop_assert_eq!(again.assigned, bucket(&name, id, buckets));
            }
        }
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut a = Assignments::new();
        let id = Identity::new("u1");
        a.force(id.clone(), 1);
        a.resolve("exp", &id, 2);
        a.clear();
        assert!(a.is_empty());
        assert_eq!(a.forced(&id), None);
        assert_eq!(a.assigned(&id), None);
    }
}
