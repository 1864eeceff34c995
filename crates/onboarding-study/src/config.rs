//! Study configuration, loaded once and immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::event_log::LogLevel;
use crate::variation::{VariationError, WeightedVariation, validate_weighted_table};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub study: StudyConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Auxiliary modules imported at startup and unloaded at teardown.
    #[serde(default)]
    pub modules: Vec<String>,
    /// The configuration modules themselves, unloaded last.
    #[serde(default)]
    pub config_modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyConfig {
    pub study_name: String,
    /// Forced arm; bypasses hashing when present.
    #[serde(default)]
    pub variation: Option<FixedVariation>,
    #[serde(default)]
    pub weighted_variations: Vec<WeightedVariation>,
    #[serde(default)]
    pub endings: BTreeMap<String, EndingAction>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub study_utils_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedVariation {
    pub name: String,
}

/// What the study utilities do for one ending reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndingAction {
    /// Page opened when the study ends for this reason.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub send: bool,
    #[serde(default)]
    pub remove_testing_flag: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            send: true,
            remove_testing_flag: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default)]
    pub bootstrap: LoggerConfig,
    #[serde(default)]
    pub study_utils: LoggerConfig,
}

/// Logger threshold as a host level word (`"Debug"`, `"Warn"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug.as_str().to_string(),
        }
    }
}

impl LoggerConfig {
    pub fn level(&self) -> LogLevel {
        LogLevel::from_word_or_default(&self.level)
    }
}

/// Add-on identity handed to the study utilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonInfo {
    pub id: String,
    pub version: String,
}

impl AddonInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// Payload of the telemetry collaborator's `setup` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySetup {
    pub study_name: String,
    pub endings: BTreeMap<String, EndingAction>,
    pub addon: AddonInfo,
    pub telemetry: TelemetryConfig,
}

impl StudySetup {
    pub fn new(study: &StudyConfig, addon: &AddonInfo) -> Self {
        Self {
            study_name: study.study_name.clone(),
            endings: study.endings.clone(),
            addon: addon.clone(),
            telemetry: study.telemetry.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("studyName must not be empty")]
    EmptyStudyName,
    #[error("variation names must not be empty")]
    EmptyVariationName,
    #[error("variation `{name}` is declared more than once")]
    DuplicateVariation { name: String },
    #[error("invalid weighted variation table: {0}")]
    InvalidVariationTable(#[from] VariationError),
}

impl ConfigError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "STUDY-CONFIG-0001",
            Self::Parse(_) => "STUDY-CONFIG-0002",
            Self::EmptyStudyName => "STUDY-CONFIG-0003",
            Self::EmptyVariationName => "STUDY-CONFIG-0004",
            Self::DuplicateVariation { .. } => "STUDY-CONFIG-0005",
            Self::InvalidVariationTable(_) => "STUDY-CONFIG-0006",
        }
    }
}

impl ExperimentConfig {
    /// Parse and validate.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let study = &self.study;
        if study.study_name.trim().is_empty() {
            return Err(ConfigError::EmptyStudyName);
        }
        if study
            .variation
            .as_ref()
            .is_some_and(|fixed| fixed.name.trim().is_empty())
        {
            return Err(ConfigError::EmptyVariationName);
        }

        let mut seen = BTreeSet::new();
        for entry in &study.weighted_variations {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::EmptyVariationName);
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateVariation {
                    name: entry.name.clone(),
                });
            }
        }

        // A forced arm makes the table optional, but a table that is
        // present must still be well formed.
        if study.variation.is_none() || !study.weighted_variations.is_empty() {
            validate_weighted_table(&study.weighted_variations)?;
        }
        Ok(())
    }

    pub fn study_name(&self) -> &str {
        &self.study.study_name
    }
}
