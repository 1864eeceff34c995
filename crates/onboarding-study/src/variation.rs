//! Deterministic variation assignment.
//!
//! A forced arm from configuration wins outright. Otherwise the arm is a
//! pure function of `study_name + telemetry_id`: the SHA-256 of that seed
//! is reduced to a fraction in `[0, 1)` and walked against the cumulative,
//! normalized weight table in declared order.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::StudyConfig;
use crate::host::{HostError, StudyTelemetry};

/// Hex digits of the digest used for the fraction (48 bits).
pub const HASH_FRACTION_HEX_DIGITS: u32 = 12;
/// Largest resolution whose every value is exact in an `f64`.
pub const MAX_HASH_FRACTION_HEX_DIGITS: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariationSource {
    StartupConfig,
    Weighted,
}

impl VariationSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartupConfig => "startup-config",
            Self::Weighted => "weighted",
        }
    }
}

impl fmt::Display for VariationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// The arm this installation belongs to. Never mutated once chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariationAssignment {
    pub name: String,
    pub source: VariationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedVariation {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl WeightedVariation {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum VariationError {
    #[error("weighted variation table is empty")]
    EmptyTable,
    #[error("weighted variation table has zero total weight")]
    ZeroTotalWeight,
    #[error("variation `{name}` has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },
    #[error("hash fraction resolution {hex_digits} must be within 1..={max}")]
    InvalidResolution { hex_digits: u32, max: u32 },
    #[error(transparent)]
    Host(#[from] HostError),
}

impl VariationError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyTable => "STUDY-VAR-0001",
            Self::ZeroTotalWeight => "STUDY-VAR-0002",
            Self::InvalidWeight { .. } => "STUDY-VAR-0003",
            Self::InvalidResolution { .. } => "STUDY-VAR-0004",
            Self::Host(_) => "STUDY-VAR-0005",
        }
    }
}

/// Fraction in `[0, 1)` from the first `hex_digits` hex digits of
/// `sha256(seed)`. Same seed, same fraction.
pub fn hash_fraction(seed: &str, hex_digits: u32) -> Result<f64, VariationError> {
    if hex_digits == 0 || hex_digits > MAX_HASH_FRACTION_HEX_DIGITS {
        return Err(VariationError::InvalidResolution {
            hex_digits,
            max: MAX_HASH_FRACTION_HEX_DIGITS,
        });
    }
    let digest = Sha256::digest(seed.as_bytes());
    let mut prefix: u64 = 0;
    let mut taken = 0;
    'bytes: for &byte in digest.iter() {
        for nibble in [byte >> 4, byte & 0x0f] {
            if taken == hex_digits {
                break 'bytes;
            }
            prefix = (prefix << 4) | u64::from(nibble);
            taken += 1;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let fraction = prefix as f64 / (1_u64 << (4 * hex_digits)) as f64;
    Ok(fraction)
}

/// Sum of weights after validating every entry.
pub fn validate_weighted_table(table: &[WeightedVariation]) -> Result<f64, VariationError> {
    if table.is_empty() {
        return Err(VariationError::EmptyTable);
    }
    let mut total = 0.0;
    for entry in table {
        if !entry.weight.is_finite() || entry.weight < 0.0 {
            return Err(VariationError::InvalidWeight {
                name: entry.name.clone(),
                weight: entry.weight,
            });
        }
        total += entry.weight;
    }
    if total <= 0.0 {
        return Err(VariationError::ZeroTotalWeight);
    }
    Ok(total)
}

/// First entry whose cumulative normalized weight is `>= fraction`.
pub fn choose_weighted(
    table: &[WeightedVariation],
    fraction: f64,
) -> Result<&WeightedVariation, VariationError> {
    let total = validate_weighted_table(table)?;
    let mut cumulative = 0.0;
    for entry in table {
        cumulative += entry.weight;
        if fraction <= cumulative / total {
            return Ok(entry);
        }
    }
    // Only reachable through rounding when `fraction` is at the top edge.
    table
        .iter()
        .rev()
        .find(|entry| entry.weight > 0.0)
        .ok_or(VariationError::ZeroTotalWeight)
}

/// Picks the arm for this installation.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariationChooser;

impl VariationChooser {
    pub fn choose<T: StudyTelemetry + ?Sized>(
        study: &StudyConfig,
        telemetry: &mut T,
    ) -> Result<VariationAssignment, VariationError> {
        if let Some(fixed) = &study.variation {
            return Ok(VariationAssignment {
                name: fixed.name.clone(),
                source: VariationSource::StartupConfig,
            });
        }
        validate_weighted_table(&study.weighted_variations)?;
        let client_id = telemetry.telemetry_id()?;
        let fraction = Self::fraction_for(&study.study_name, &client_id)?;
        let chosen = choose_weighted(&study.weighted_variations, fraction)?;
        Ok(VariationAssignment {
            name: chosen.name.clone(),
            source: VariationSource::Weighted,
        })
    }

    /// The hash fraction used for `(study_name, client_id)`.
    pub fn fraction_for(study_name: &str, client_id: &str) -> Result<f64, VariationError> {
        hash_fraction(&format!("{study_name}{client_id}"), HASH_FRACTION_HEX_DIGITS)
    }
}
