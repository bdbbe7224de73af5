//! # Stage: Experiment State Machine
//!
//! ## Responsibility
//! Owns the alternatives of one named experiment and drives its lifecycle:
//! choose (assign + count), convert, evaluate the completion predicate,
//! complete, and pick the outcome.
//!
//! ## Guarantees
//! - One-way: `Running -> Complete`; completing twice is a no-op and the
//!   outcome is set exactly once
//! - Sticky: an identity is counted under one alternative for the whole
//!   lifetime of the experiment (until [`Experiment::reset`])
//! - Defensive: a failing `complete_if` counts as "not complete" and a
//!   failing or nonsensical `outcome_is` falls back to the best z score;
//!   neither error reaches the caller
//! - Thread-safe: assignment, forced choice, conversion and the completion
//!   transition are serialised by one mutex per experiment; user predicates
//!   run outside it on a stats snapshot
//!
//! ## NOT Responsible For
//! - Finding the experiment by name (see [`crate::registry`])
//! - Where identities come from (the host's identify callback)

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alternative::{AltValue, Alternative, Conversion};
use crate::assignment::Assignments;
use crate::error::{BoxError, ExperimentError, Result};
use crate::identity::Identity;
use crate::stats::ExperimentStats;

/// Produces the identity of the participant behind the current request.
pub type IdentifyFn = Arc<dyn Fn() -> std::result::Result<Identity, BoxError> + Send + Sync>;

/// Decides from a stats snapshot whether the experiment is done.
pub type CompleteIfFn =
    Arc<dyn Fn(&ExperimentStats) -> std::result::Result<bool, BoxError> + Send + Sync>;

/// Names the winning alternative's value from a stats snapshot.
pub type OutcomeIsFn =
    Arc<dyn Fn(&ExperimentStats) -> std::result::Result<Option<AltValue>, BoxError> + Send + Sync>;

// ---------------------------------------------------------------------------
// ExperimentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Assigning and counting.
    Running,
    /// Outcome fixed; every choice returns it.
    Complete,
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentStatus::Running  => write!(f, "running"),
            ExperimentStatus::Complete => write!(f, "complete"),
        }
    }
}

/// What moved the experiment to [`ExperimentStatus::Complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Predicate,
    Explicit,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Predicate => write!(f, "complete_if"),
            Trigger::Explicit  => write!(f, "explicit"),
        }
    }
}

// ---------------------------------------------------------------------------
// ExperimentBuilder: definition of one experiment
// ---------------------------------------------------------------------------

/// Definition of a single experiment.
///
/// Without [`ExperimentBuilder::alternatives`] the experiment runs the
/// default pair `false` / `true`.
#[must_use]
pub struct ExperimentBuilder {
    name: String,
    description: Option<String>,
    alternatives: Option<Vec<AltValue>>,
    identify: Option<IdentifyFn>,
    complete_if: Option<CompleteIfFn>,
    outcome_is: Option<OutcomeIsFn>,
}

impl ExperimentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            alternatives: None,
            identify: None,
            complete_if: None,
            outcome_is: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn alternatives<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AltValue>,
    {
        self.alternatives = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn identify<F, I>(self, f: F) -> Self
    where
        F: Fn() -> std::result::Result<I, BoxError> + Send + Sync + 'static,
        I: Into<Identity>,
    {
        let identify: IdentifyFn = Arc::new(move || f().map(|id| -> Identity { id.into() }));
        self.identify_fn(identify)
    }

    /// Share an already-boxed identity source (e.g. one per host application).
    pub fn identify_fn(mut self, f: IdentifyFn) -> Self {
        self.identify = Some(f);
        self
    }

    pub fn complete_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExperimentStats) -> std::result::Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.complete_if = Some(Arc::new(f));
        self
    }

    pub fn outcome_is<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExperimentStats) -> std::result::Result<Option<AltValue>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.outcome_is = Some(Arc::new(f));
        self
    }

    /// Validate the definition and create the experiment.
    pub fn build(self) -> Result<Experiment> {
        if self.name.trim().is_empty() {
            return Err(ExperimentError::configuration(&self.name, "name must not be empty"));
        }
        let values = self
            .alternatives
            .unwrap_or_else(|| vec![AltValue::Bool(false), AltValue::Bool(true)]);
        if values.len() < 2 {
            return Err(ExperimentError::configuration(
                &self.name,
                format!("needs at least two alternatives, got {}", values.len()),
            ));
        }
        for (i, value) in values.iter().enumerate() {
            if values[..i].contains(value) {
                return Err(ExperimentError::configuration(
                    &self.name,
                    format!("alternative {value} is listed more than once"),
                ));
            }
        }

        let alternatives = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| Alternative::new(index, value))
            .collect();

        Ok(Experiment {
            name: self.name,
            description: self.description,
            alternatives,
            identify: self.identify,
            complete_if: self.complete_if,
            outcome_is: self.outcome_is,
            state: Mutex::new(State::default()),
        })
    }
}

// ---------------------------------------------------------------------------
// Experiment: live state for one A/B test
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct State {
    status: ExperimentStatus,
    outcome: Option<usize>,
    assignments: Assignments,
    /// Bumped by every reset; a completion decided on older data is dropped.
    generation: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            status: ExperimentStatus::Running,
            outcome: None,
            assignments: Assignments::new(),
            generation: 0,
        }
    }
}

/// Live state of a single experiment.
pub struct Experiment {
    name: String,
    description: Option<String>,
    alternatives: Vec<Alternative>,
    identify: Option<IdentifyFn>,
    complete_if: Option<CompleteIfFn>,
    outcome_is: Option<OutcomeIsFn>,
    state: Mutex<State>,
}

impl Experiment {
    pub fn builder(name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Alternatives in definition order; index 0 is the baseline.
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    pub fn alternative(&self, value: &AltValue) -> Option<&Alternative> {
        self.alternatives.iter().find(|a| a.value() == value)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> ExperimentStatus {
        self.state().status
    }

    /// `true` while the experiment is still running.
    pub fn is_active(&self) -> bool {
        self.status() == ExperimentStatus::Running
    }

    /// Winning alternative, once complete.
    pub fn outcome(&self) -> Option<&Alternative> {
        self.state().outcome.map(|i| &self.alternatives[i])
    }

    /// Identity of the current participant, from the configured callback.
    pub fn identify(&self) -> Result<Identity> {
        let identify = self.identify.as_ref().ok_or_else(|| ExperimentError::Identify {
            experiment: self.name.clone(),
            source: "no identity source configured".into(),
        })?;
        identify().map_err(|source| ExperimentError::Identify {
            experiment: self.name.clone(),
            source,
        })
    }

    // -----------------------------------------------------------------------
    // Choosing
    // -----------------------------------------------------------------------

    /// Choose the alternative for the current participant.
    pub fn choose(&self) -> Result<AltValue> {
        let identity = self.identify()?;
        Ok(self.choose_for(&identity))
    }

    /// Choose the alternative for `identity`.
    ///
    /// Once complete this returns the outcome without counting anything.
    /// Otherwise the first call for an identity records it as a participant,
    /// and the completion predicate is evaluated afterwards.
    pub fn choose_for(&self, identity: &Identity) -> AltValue {
        let chosen = {
            let mut state = self.state();
            if let Some(outcome) = state.outcome {
                return self.alternatives[outcome].value().clone();
            }
            let resolution =
                state.assignments.resolve(&self.name, identity, self.alternatives.len());
            if resolution.first_assignment {
                self.alternatives[resolution.assigned].participating(identity.clone());
                debug!(
                    target: "split_decision::experiment",
                    experiment = %self.name,
                    identity = %identity,
                    alternative = %self.alternatives[resolution.assigned].value(),
                    "participant assigned"
                );
            }
            resolution.chosen
        };

        self.check_completion();
        self.alternatives[chosen].value().clone()
    }

    /// Force the current participant onto the alternative with `value`.
    pub fn chooses(&self, value: impl Into<AltValue>) -> Result<()> {
        let identity = self.identify()?;
        self.chooses_for(&identity, value)
    }

    /// Force `identity` onto the alternative with `value`.
    ///
    /// Fails without touching any state when `value` is not an alternative.
    pub fn chooses_for(&self, identity: &Identity, value: impl Into<AltValue>) -> Result<()> {
        let value = value.into();
        let index = self
            .alternatives
            .iter()
            .position(|a| a.value() == &value)
            .ok_or_else(|| ExperimentError::UnknownAlternative {
                experiment: self.name.clone(),
                value: value.to_string(),
            })?;
        self.state().assignments.force(identity.clone(), index);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Converting
    // -----------------------------------------------------------------------

    /// Record a conversion for the current participant.
    pub fn conversion(&self) -> Result<Conversion> {
        let identity = self.identify()?;
        Ok(self.conversion_for(&identity))
    }

    /// Record a conversion for `identity` against the alternative it was
    /// assigned to. Never assigns; unknown identities and completed
    /// experiments record nothing.
    pub fn conversion_for(&self, identity: &Identity) -> Conversion {
        let result = {
            let state = self.state();
            if state.status == ExperimentStatus::Complete {
                return Conversion::Closed;
            }
            match state.assignments.assigned(identity) {
                Some(index) => self.alternatives[index].conversion(identity.clone()),
                None => Conversion::NotParticipant,
            }
        };

        if result == Conversion::Converted {
            debug!(
                target: "split_decision::experiment",
                experiment = %self.name,
                identity = %identity,
                "conversion recorded"
            );
            self.check_completion();
        }
        result
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Complete the experiment now and fix its outcome. No-op if already complete.
    pub fn complete(&self) {
        if let Some(generation) = self.running_generation() {
            self.finish(Trigger::Explicit, generation);
        }
    }

    /// Current reset generation, or `None` once complete.
    fn running_generation(&self) -> Option<u64> {
        let state = self.state();
        (state.status == ExperimentStatus::Running).then_some(state.generation)
    }

    fn check_completion(&self) {
        let Some(complete_if) = self.complete_if.as_ref() else { return };
        let Some(generation) = self.running_generation() else { return };
        match complete_if(&self.stats()) {
            Ok(true) => self.finish(Trigger::Predicate, generation),
            Ok(false) => {}
            Err(err) => warn!(
                target: "split_decision::experiment",
                experiment = %self.name,
                error = %err,
                "complete_if failed; treating as not complete"
            ),
        }
    }

    /// Complete with an outcome computed outside the lock. Gives up if the
    /// experiment completed or was reset since `generation` was read.
    fn finish(&self, trigger: Trigger, generation: u64) {
        let outcome = self.resolve_outcome(&self.stats());

        let mut state = self.state();
        if state.status == ExperimentStatus::Complete {
            return;
        }
        if state.generation != generation {
            debug!(
                target: "split_decision::experiment",
                experiment = %self.name,
                trigger = %trigger,
                "reset during completion; outcome discarded"
            );
            return;
        }
        state.status = ExperimentStatus::Complete;
        state.outcome = Some(outcome);
        info!(
            target: "split_decision::experiment",
            experiment = %self.name,
            outcome = %self.alternatives[outcome].value(),
            trigger = %trigger,
            "experiment complete"
        );
    }

    /// `outcome_is` if it names one of our alternatives, else the best z score.
    fn resolve_outcome(&self, stats: &ExperimentStats) -> usize {
        if let Some(outcome_is) = self.outcome_is.as_ref() {
            match outcome_is(stats) {
                Ok(Some(value)) => {
                    if let Some(alt) = self.alternative(&value) {
                        return alt.index();
                    }
                    warn!(
                        target: "split_decision::experiment",
                        experiment = %self.name,
                        value = %value,
                        "outcome_is named an unknown alternative; using best z score"
                    );
                }
                Ok(None) => {}
                Err(err) => warn!(
                    target: "split_decision::experiment",
                    experiment = %self.name,
                    error = %err,
                    "outcome_is failed; using best z score"
                ),
            }
        }
        stats.best_index()
    }

    // -----------------------------------------------------------------------
    // Inspection and reset
    // -----------------------------------------------------------------------

    /// Snapshot of every alternative's counters and statistics.
    pub fn stats(&self) -> ExperimentStats {
        let (status, outcome) = {
            let state = self.state();
            (state.status, state.outcome)
        };
        let baseline = &self.alternatives[0];
        ExperimentStats {
            name: self.name.clone(),
            status,
            outcome: outcome.map(|i| self.alternatives[i].value().clone()),
            alternatives: self.alternatives.iter().map(|a| a.snapshot(baseline)).collect(),
        }
    }

    /// Distinct identities assigned so far.
    pub fn participant_count(&self) -> usize {
        self.state().assignments.len()
    }

    /// Clear all counters, assignments and forced choices and resume running.
    pub fn reset(&self) {
        let mut state = self.state();
        let generation = state.generation.wrapping_add(1);
        *state = State { generation, ..State::default() };
        for alt in &self.alternatives {
            alt.clear();
        }
        debug!(target: "split_decision::experiment", experiment = %self.name, "experiment reset");
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("alternatives", &self.alternatives)
            .field("status", &self.status())
            .field("has_identify", &self.identify.is_some())
            .field("has_complete_if", &self.complete_if.is_some())
            .field("has_outcome_is", &self.outcome_is.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
