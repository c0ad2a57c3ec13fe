use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PanelError, Result};
use crate::types::{AssetClass, RawAsset};

/// Steel production routes the reference tables carry factors for.
pub const STEEL_PROCESSES: [&str; 11] = [
    "crude",
    "BOF",
    "EAF",
    "OHF",
    "Iron",
    "BF",
    "DRI",
    "Ferronickel",
    "Sinter plant",
    "Coking plant",
    "Pelletizing",
];

/// kt of product → Mt, after multiplying by a t/t intensity.
const KT_TO_MT: f64 = 1000.0 / 1_000_000.0;

/// One factor per (country, process), with per-process column means for
/// countries the table does not list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessFactorTable {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
    means: BTreeMap<String, f64>,
}

impl ProcessFactorTable {
    /// Builds from `(country, process, factor)` triples. Non-finite factors
    /// are treated as absent.
    pub fn from_entries<I, C, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, P, f64)>,
        C: Into<String>,
        P: Into<String>,
    {
        let mut rows: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for (country, process, value) in entries {
            if value.is_finite() {
                rows.entry(country.into())
                    .or_default()
                    .insert(process.into(), value);
            }
        }
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for factors in rows.values() {
            for (process, value) in factors {
                let e = sums.entry(process.clone()).or_insert((0.0, 0));
                e.0 += value;
                e.1 += 1;
            }
        }
        let means = sums
            .into_iter()
            .map(|(p, (sum, n))| (p, sum / n as f64))
            .collect();
        ProcessFactorTable { rows, means }
    }

    /// Factor for `country`, falling back to the process mean. A zero factor
    /// reads as 1 so it cannot zero out the product. `None` when no country
    /// in the table has this process.
    pub fn factor(&self, country: &str, process: &str) -> Option<f64> {
        let value = self
            .rows
            .get(country)
            .and_then(|r| r.get(process))
            .or_else(|| self.means.get(process))
            .copied()?;
        Some(if value == 0.0 { 1.0 } else { value })
    }
}

/// Emissions intensity (t CO2 / t product) and capacity utilisation
/// (fraction) per steel process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SteelFactors {
    pub intensity: ProcessFactorTable,
    pub utilisation: ProcessFactorTable,
}

/// Reads a nameplate production figure in kt/yr. Blank and unknown entries
/// count as 1 kt.
pub fn coerce_production(token: Option<&str>) -> Result<f64> {
    let Some(raw) = token else {
        return Ok(1.0);
    };
    match raw.trim() {
        "" | "unknown" | ">0" | "nan" => Ok(1.0),
        "10,000" => Ok(10_000.0),
        t => t.parse::<f64>().map_err(|_| PanelError::MalformedNumber {
            context: "steel production".to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Gas proxy: lifetime-committed Mt equals capacity MW / 12, spread evenly
/// over the assumed lifetime.
pub fn capacity_proxy_co2(capacity_mw: f64, cfg: &PipelineConfig) -> f64 {
    capacity_mw / cfg.gas_mw_per_mt_lifetime / cfg.assumed_lifetime
}

/// Sum over processes of intensity × utilisation × production.
pub fn process_weighted_co2(row: &RawAsset, factors: &SteelFactors) -> Result<f64> {
    let mut total = 0.0;
    for process in STEEL_PROCESSES {
        let (Some(intensity), Some(utilisation)) = (
            factors.intensity.factor(&row.country, process),
            factors.utilisation.factor(&row.country, process),
        ) else {
            continue;
        };
        let kt = coerce_production(row.production.get(process).map(String::as_str))?;
        total += intensity * utilisation * kt * KT_TO_MT;
    }
    Ok(total)
}

/// Annual CO2 in Mt/yr for one asset of `class`.
pub fn annual_co2(
    class: AssetClass,
    row: &RawAsset,
    cfg: &PipelineConfig,
    factors: &SteelFactors,
) -> Result<f64> {
    let missing = |field| PanelError::MissingField {
        class,
        country: row.country.clone(),
        field,
    };
    let co2 = match class {
        AssetClass::Coal => row
            .annual_co2
            .filter(|v| v.is_finite())
            .ok_or_else(|| missing("annual CO2"))?,
        AssetClass::Gas => {
            let mw = row
                .capacity_mw
                .filter(|v| v.is_finite())
                .ok_or_else(|| missing("capacity"))?;
            capacity_proxy_co2(mw, cfg)
        }
        AssetClass::Steel => process_weighted_co2(row, factors)?,
    };
    Ok(co2)
}

/// Annual CO2 for every row, index-aligned.
pub fn estimate_all(
    class: AssetClass,
    rows: &[RawAsset],
    cfg: &PipelineConfig,
    factors: &SteelFactors,
) -> Result<Vec<f64>> {
    let out = rows
        .iter()
        .map(|r| annual_co2(class, r, cfg, factors))
        .collect::<Result<Vec<_>>>()?;
    debug!(%class, rows = out.len(), total_mt = out.iter().sum::<f64>(), "annual CO2 estimated");
    Ok(out)
}
