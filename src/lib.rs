//! # split-decision
//!
//! A/B experiment engine. Each named experiment deterministically assigns
//! every participant identity to one alternative, counts participation and
//! conversion exactly once per identity, scores alternatives with a
//! two-proportion z test against the baseline, and can complete itself via
//! a user predicate and pick a winner.
//!
//! The host application supplies identities (an `identify` callback or
//! explicit [`Identity`] values) and optional `complete_if` / `outcome_is`
//! predicates; errors raised by the predicates are absorbed.
//!
//! ```
//! use split_decision::{AltValue, Experiment, ExperimentRegistry, Identity};
//!
//! let registry = ExperimentRegistry::new();
//! let exp = registry
//!     .define(Experiment::builder("signup_button").alternatives(["green", "orange"]))
//!     .unwrap();
//!
//! let visitor = Identity::new("visitor-17");
//! let shown = exp.choose_for(&visitor);
//! assert_eq!(exp.choose_for(&visitor), shown);
//!
//! exp.conversion_for(&visitor);
//! assert_eq!(exp.stats().total_converted(), 1);
//!
//! exp.complete();
//! assert!(!exp.is_active());
//! assert!(matches!(exp.outcome().map(|a| a.value()), Some(AltValue::Text(_))));
//! ```
//!
//! ## Modules
//! - [`alternative`]: one variant and its exactly-once counters
//! - [`assignment`]: pinned hash bucketing and forced choices
//! - [`stats`]: z scores, confidence table, stats snapshots
//! - [`experiment`]: builder and `Running -> Complete` state machine
//! - [`registry`]: name → experiment map owned by the host
//! - [`config`]: TOML experiment definitions

pub mod alternative;
pub mod assignment;
pub mod config;
pub mod error;
pub mod experiment;
pub mod identity;
pub mod registry;
pub mod stats;

pub use alternative::{AltValue, Alternative, Conversion};
pub use config::{EngineConfig, ExperimentConfig};
pub use error::{BoxError, ExperimentError, Result};
pub use experiment::{
    CompleteIfFn, Experiment, ExperimentBuilder, ExperimentStatus, IdentifyFn, OutcomeIsFn,
};
pub use identity::Identity;
pub use registry::ExperimentRegistry;
pub use stats::{AlternativeStats, ExperimentStats};
