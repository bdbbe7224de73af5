//! Declarative experiment definitions loaded from TOML.
//!
//! ```toml
//! [[experiment]]
//! name = "price_options"
//! description = "Checkout price points"
//! alternatives = [19, 25, 29]
//! complete_after = 500
//! ```
//!
//! `alternatives` may be omitted for the default `false` / `true` pair.
//! `complete_after` completes the experiment once that many distinct
//! participants have been assigned.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::alternative::AltValue;
use crate::error::{ExperimentError, Result};
use crate::experiment::{Experiment, ExperimentBuilder};

/// One `[[experiment]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<AltValue>>,
    /// Complete once this many distinct participants are assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_after: Option<u64>,
}

impl ExperimentConfig {
    /// Builder carrying this definition; callbacks other than the
    /// participant threshold are left to the host.
    pub fn builder(&self) -> ExperimentBuilder {
        let mut builder = Experiment::builder(self.name.clone());
        if let Some(description) = &self.description {
            builder = builder.description(description.clone());
        }
        if let Some(values) = &self.alternatives {
            builder = builder.alternatives(values.iter().cloned());
        }
        if let Some(threshold) = self.complete_after {
            builder = builder.complete_if(move |stats| Ok(stats.total_participants() >= threshold));
        }
        builder
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default, rename = "experiment")]
    pub experiments: Vec<ExperimentConfig>,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ExperimentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject duplicate names and zero thresholds. Alternative lists are
    /// checked when each experiment is built.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for exp in &self.experiments {
            if !seen.insert(exp.name.as_str()) {
                return Err(ExperimentError::configuration(
                    &exp.name,
                    "defined more than once in configuration",
                ));
            }
            if exp.complete_after == Some(0) {
                return Err(ExperimentError::configuration(
                    &exp.name,
                    "complete_after must be >= 1",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[experiment]]
        name = "price_options"
        description = "Checkout price points"
        alternatives = [19, 25, 29]
        complete_after = 3

        [[experiment]]
        name = "simple_ab"
    "#;

    #[test]
    fn test_parse_sample() {
        let cfg = EngineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.experiments.len(), 2);
        let price = &cfg.experiments[0];
        assert_eq!(
            price.alternatives,
            Some(vec![AltValue::Int(19), AltValue::Int(25), AltValue::Int(29)])
        );
        assert_eq!(price.complete_after, Some(3));
        assert!(cfg.experiments[1].alternatives.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_mixed_value_types() {
        let cfg = EngineConfig::from_toml_str(
            "[[experiment]]\nname = \"m\"\nalternatives = [true, \"blue\"]\n",
        )
        .unwrap();
        assert_eq!(
            cfg.experiments[0].alternatives,
            Some(vec![AltValue::Bool(true), AltValue::from("blue")])
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = EngineConfig::from_toml_str("[[experiment]]\nname = \"x\"\nweights = [1]\n")
            .unwrap_err();
        assert!(matches!(err, ExperimentError::ConfigParse(_)));
    }

    #[test]
    fn test_duplicate_names_invalid() {
        let cfg = EngineConfig::from_toml_str(
            "[[experiment]]\nname = \"x\"\n[[experiment]]\nname = \"x\"\n",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_threshold_invalid() {
        let cfg = EngineConfig::from_toml_str("[[experiment]]\nname = \"x\"\ncomplete_after = 0\n")
            .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_builder_applies_threshold() {
        let cfg = EngineConfig::from_toml_str(SAMPLE).unwrap();
        let exp = cfg.experiments[0].builder().build().unwrap();
        assert_eq!(exp.description(), Some("Checkout price points"));
        for id in ["a", "b"] {
            exp.choose_for(&id.into());
        }
        assert!(exp.is_active());
        exp.choose_for(&"c".into());
        assert!(!exp.is_active());
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ExperimentError::ConfigRead { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiments.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.experiments[1].name, "simple_ab");
    }
}
