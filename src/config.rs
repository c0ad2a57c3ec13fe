use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};
use crate::types::AssetClass;

/// Tunables for one pipeline run. Every field has a default matching the
/// published dataset, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Year plant ages are measured against.
    pub reference_year: f64,
    /// Operating life assumed when no retirement year is known.
    pub assumed_lifetime: f64,
    /// MW of new gas capacity per Mt CO2 committed over its lifetime.
    pub gas_mw_per_mt_lifetime: f64,
    pub retirement_jitter_min: u32,
    pub retirement_jitter_max: u32,
    pub coal_statuses: Vec<String>,
    pub gas_statuses: Vec<String>,
    pub steel_statuses: Vec<String>,
    pub scenario_entity: String,
    pub scenario_source: String,
    /// Aggregate areas in the committed source that map to no country.
    pub excluded_committed_areas: Vec<String>,
    /// Count steel in the considered total.
    pub include_steel: bool,
    /// Fail on `retirement <= start` after imputation instead of warning.
    pub strict_lifetimes: bool,
    /// Divide collapsed expectations by the credence mass that contributed.
    pub normalize_expectation: bool,
    /// Per-year discount for the scenario proximity distance.
    pub discount_rho: f64,
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        PipelineConfig {
            reference_year: 2022.0,
            assumed_lifetime: 40.0,
            gas_mw_per_mt_lifetime: 12.0,
            retirement_jitter_min: 1,
            retirement_jitter_max: 15,
            coal_statuses: owned(&[
                "operating",
                "construction",
                "pre-permit",
                "announced",
                "permitted",
            ]),
            gas_statuses: owned(&["operating", "construction", "announced", "pre-construction"]),
            steel_statuses: owned(&["proposed", "operating", "construction"]),
            scenario_entity: "KYOTOGHGAR4".to_string(),
            scenario_source: "PMSSPBIE".to_string(),
            excluded_committed_areas: owned(&[
                "Other Africa",
                "Other non-OECD Americas",
                "Other non-OECD Asia",
            ]),
            include_steel: false,
            strict_lifetimes: true,
            normalize_expectation: false,
            discount_rho: 0.99,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.assumed_lifetime > 0.0) {
            return Err(PanelError::Config("assumed_lifetime must be > 0".into()));
        }
        if !(self.gas_mw_per_mt_lifetime > 0.0) {
            return Err(PanelError::Config("gas_mw_per_mt_lifetime must be > 0".into()));
        }
        if self.retirement_jitter_min == 0 || self.retirement_jitter_min > self.retirement_jitter_max {
            return Err(PanelError::Config(
                "retirement jitter must satisfy 1 <= min <= max".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.discount_rho) {
            return Err(PanelError::Config("discount_rho must be in [0, 1]".into()));
        }
        Ok(())
    }

    pub fn statuses(&self, class: AssetClass) -> &[String] {
        match class {
            AssetClass::Coal => &self.coal_statuses,
            AssetClass::Gas => &self.gas_statuses,
            AssetClass::Steel => &self.steel_statuses,
        }
    }

    pub fn retirement_jitter(&self) -> RangeInclusive<u32> {
        self.retirement_jitter_min..=self.retirement_jitter_max
    }

    /// RNG for the retirement jitter; seeded when `seed` is set.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}
