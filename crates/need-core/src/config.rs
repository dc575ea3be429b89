//! Run configuration. Every field has a default so a partial JSON file
//! (or none at all) is a valid configuration.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NeedError, Result};

/// Whether a covariate rises or falls with need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Higher raw value means more need.
    Direct,
    /// Higher raw value means less need (e.g. night-time brightness).
    Inverse,
}

/// One covariate column feeding the need index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateSpec {
    pub name: String,
    pub weight: f64,
    #[serde(default = "default_polarity")]
    pub polarity: Polarity,
}

fn default_polarity() -> Polarity {
    Polarity::Direct
}

impl CovariateSpec {
    pub fn direct(name: &str, weight: f64) -> Self {
        Self { name: name.to_string(), weight, polarity: Polarity::Direct }
    }

    pub fn inverse(name: &str, weight: f64) -> Self {
        Self { name: name.to_string(), weight, polarity: Polarity::Inverse }
    }
}

/// How proportional shares become integer counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Apportionment {
    /// Floor every share, then hand the leftover units to the largest
    /// fractional remainders. Bucket totals are preserved exactly.
    LargestRemainder,
    /// Round every share independently (half to even). Bucket totals may
    /// drift by up to one unit per entity.
    Nearest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedistributionConfig {
    /// Nearest-cluster matches farther than this are discarded.
    /// The default exceeds half the Earth's circumference.
    pub max_match_km: f64,
    /// Facilities processed per distance chunk.
    pub batch_size: usize,
    pub covariates: Vec<CovariateSpec>,
    /// Lower clamp applied to every facility weight before allocation.
    pub weight_floor: f64,
    pub apportionment: Apportionment,
    /// Rows kept in the before/after audit sample.
    pub audit_rows: usize,
    /// Reserved for callers that synthesise inputs; unused by the core.
    pub seed: u64,
}

impl Default for RedistributionConfig {
    fn default() -> Self {
        Self {
            max_match_km: 25_000.0,
            batch_size: 2000,
            covariates: vec![
                CovariateSpec::direct("All_Population_Count_2020", 0.35),
                CovariateSpec::direct("Malaria_Incidence_2020", 0.20),
                CovariateSpec::direct("Malaria_Prevalence_2020", 0.15),
                CovariateSpec::direct("Travel_Times", 0.20),
                CovariateSpec::inverse("Nightlights_Composite", 0.10),
            ],
            weight_floor: 1e-6,
            apportionment: Apportionment::LargestRemainder,
            audit_rows: 200,
            seed: 42,
        }
    }
}

impl RedistributionConfig {
    /// Read a JSON configuration file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_match_km.is_nan() || self.max_match_km < 0.0 {
            return Err(NeedError::InvalidConfig(format!(
                "max_match_km must be a non-negative number, got {}",
                self.max_match_km
            )));
        }
        if self.batch_size == 0 {
            return Err(NeedError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if !(self.weight_floor.is_finite() && self.weight_floor > 0.0) {
            return Err(NeedError::InvalidConfig(format!(
                "weight_floor must be positive, got {}",
                self.weight_floor
            )));
        }
        if self.covariates.is_empty() {
            return Err(NeedError::InvalidConfig("at least one covariate is required".into()));
        }
        let mut seen = HashSet::new();
        for cov in &self.covariates {
            if !(cov.weight.is_finite() && cov.weight >= 0.0) {
                return Err(NeedError::InvalidConfig(format!(
                    "covariate `{}` has invalid weight {}",
                    cov.name, cov.weight
                )));
            }
            if !seen.insert(cov.name.as_str()) {
                return Err(NeedError::InvalidConfig(format!(
                    "covariate `{}` listed twice",
                    cov.name
                )));
            }
        }
        if self.covariates.iter().all(|c| c.weight == 0.0) {
            return Err(NeedError::InvalidConfig("covariate weights are all zero".into()));
        }
        Ok(())
    }
}
