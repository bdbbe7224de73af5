//! # Stage: Alternative
//!
//! ## Responsibility
//! One variant of an experiment: its payload value plus the sets of
//! identities that participated in it and converted on it.
//!
//! ## Guarantees
//! - Exactly-once: an identity counts at most once as a participant and at
//!   most once as converted, no matter how often it is reported
//! - Conversions only count for identities that already participated here
//! - Thread-safe: each check-then-insert happens under one mutex acquisition
//!
//! ## NOT Responsible For
//! - Deciding which alternative an identity belongs to (see [`crate::assignment`])
//! - Comparing alternatives statistically (see [`crate::stats`])

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::stats::{self, AlternativeStats};

// ---------------------------------------------------------------------------
// AltValue: the payload a caller receives from `choose`
// ---------------------------------------------------------------------------

/// Payload of an alternative. Unique within its experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AltValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl std::fmt::Display for AltValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AltValue::Bool(b) => write!(f, "{b}"),
            AltValue::Int(n) => write!(f, "{n}"),
            AltValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for AltValue {
    fn from(b: bool) -> Self {
        AltValue::Bool(b)
    }
}

impl From<i64> for AltValue {
    fn from(n: i64) -> Self {
        AltValue::Int(n)
    }
}

impl From<i32> for AltValue {
    fn from(n: i32) -> Self {
        AltValue::Int(n.into())
    }
}

impl From<&str> for AltValue {
    fn from(s: &str) -> Self {
        AltValue::Text(s.to_string())
    }
}

impl From<String> for AltValue {
    fn from(s: String) -> Self {
        AltValue::Text(s)
    }
}

// ---------------------------------------------------------------------------
// Alternative
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    participants: HashSet<Identity>,
    converted: HashSet<Identity>,
    /// Every accepted conversion event, including repeats by the same identity.
    conversions: u64,
}

/// Outcome of reporting a conversion against one alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// First conversion for this participant.
    Converted,
    /// Participant had already converted; only the event count moved.
    Repeat,
    /// Identity never participated here; nothing recorded.
    NotParticipant,
    /// Experiment already complete; nothing recorded.
    Closed,
}

/// A single variant within an experiment.
#[derive(Debug)]
pub struct Alternative {
    index: usize,
    value: AltValue,
    counters: Mutex<Counters>,
}

impl Alternative {
    pub(crate) fn new(index: usize, value: AltValue) -> Self {
        Self { index, value, counters: Mutex::new(Counters::default()) }
    }

    /// Position within the experiment; index 0 is the baseline.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> &AltValue {
        &self.value
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        // Each mutation is a single insert, so a poisoned guard still holds consistent sets.
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `identity` as a participant. Returns `true` only the first time.
    pub fn participating(&self, identity: impl Into<Identity>) -> bool {
        self.counters().participants.insert(identity.into())
    }

    /// Record a conversion for `identity` if it participated here.
    pub fn conversion(&self, identity: impl Into<Identity>) -> Conversion {
        let identity = identity.into();
        let mut c = self.counters();
        if !c.participants.contains(&identity) {
            return Conversion::NotParticipant;
        }
        c.conversions += 1;
        if c.converted.insert(identity) {
            Conversion::Converted
        } else {
            Conversion::Repeat
        }
    }

    pub fn has_participant(&self, identity: &Identity) -> bool {
        self.counters().participants.contains(identity)
    }

    /// Distinct participating identities.
    pub fn participants(&self) -> u64 {
        self.counters().participants.len() as u64
    }

    /// Distinct converted identities.
    pub fn converted(&self) -> u64 {
        self.counters().converted.len() as u64
    }

    /// Accepted conversion events, repeats included.
    pub fn conversions(&self) -> u64 {
        self.counters().conversions
    }

    /// `converted / participants`, or 0 with no participants.
    pub fn conversion_rate(&self) -> f64 {
        let c = self.counters();
        stats::rate(c.converted.len() as u64, c.participants.len() as u64)
    }

    /// Two-proportion z statistic of this alternative against `baseline`.
    pub fn z_score(&self, baseline: &Alternative) -> f64 {
        if std::ptr::eq(self, baseline) {
            return 0.0;
        }
        let (n1, x1) = self.counts();
        let (n0, x0) = baseline.counts();
        stats::z_score(n0, x0, n1, x1)
    }

    /// Confidence level (0, 90, 95 or 99) of this alternative against `baseline`.
    pub fn confidence(&self, baseline: &Alternative) -> u8 {
        stats::confidence(self.z_score(baseline))
    }

    /// Consistent `(participants, converted)` pair taken under one lock.
    pub(crate) fn counts(&self) -> (u64, u64) {
        let c = self.counters();
        (c.participants.len() as u64, c.converted.len() as u64)
    }

    pub(crate) fn snapshot(&self, baseline: &Alternative) -> AlternativeStats {
        let (participants, converted, conversions) = {
            let c = self.counters();
            (c.participants.len() as u64, c.converted.len() as u64, c.conversions)
        };
        let z_score = if std::ptr::eq(self, baseline) {
            0.0
        } else {
            let (n0, x0) = baseline.counts();
            stats::z_score(n0, x0, participants, converted)
        };
        AlternativeStats {
            index: self.index,
            value: self.value.clone(),
            participants,
            converted,
            conversions,
            conversion_rate: stats::rate(converted, participants),
            z_score,
            confidence: stats::confidence(z_score),
        }
    }

    pub(crate) fn clear(&self) {
        *self.counters() = Counters::default();
    }
}

impl PartialEq for Alternative {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.value == other.value
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
