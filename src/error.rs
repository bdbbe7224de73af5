//! Crate-level error type.
//!
//! Only definition, lookup, forced-choice and identity failures surface as
//! [`ExperimentError`]. Failures inside user predicates (`complete_if`,
//! `outcome_is`) are absorbed by the experiment and never reach the caller.

use std::path::PathBuf;

/// Boxed error returned by host-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Every failure the engine reports to its caller.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    /// The experiment definition is unusable (too few or duplicate alternatives, empty name).
    #[error("experiment '{experiment}' is misconfigured: {reason}")]
    Configuration {
        experiment: String,
        reason: String,
    },

    /// A forced choice named a value that is not one of the experiment's alternatives.
    #[error("experiment '{experiment}' has no alternative {value}")]
    UnknownAlternative {
        experiment: String,
        value: String,
    },

    /// Lookup of an experiment that was never defined.
    #[error("no experiment named '{name}' is defined")]
    NotFound { name: String },

    /// The identity callback failed or none was configured.
    #[error("could not identify participant for experiment '{experiment}': {source}")]
    Identify {
        experiment: String,
        #[source]
        source: BoxError,
    },

    /// A TOML experiment configuration could not be parsed.
    #[error("invalid experiment configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration file could not be read.
    #[error("failed to read experiment configuration from {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExperimentError {
    pub(crate) fn configuration(experiment: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            experiment: experiment.to_string(),
            reason: reason.into(),
        }
    }
}
