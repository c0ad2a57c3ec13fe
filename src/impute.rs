use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PanelError, Result};
use crate::types::{AssetClass, RawAsset, OPERATING};

/// Start-year tokens the inventories use for "unknown".
const UNKNOWN_START_TOKENS: &[&str] = &[
    "unclear",
    "Unclear",
    "",
    "NA",
    "TBD",
    "tbd",
    "lear",
    "13th plan",
    "unknown",
    "0",
    "not found",
    "Not found",
    "0:00",
    "nan",
    ">0",
];

/// Retirement tokens too vague to use.
const UNKNOWN_RETIRE_TOKENS: &[&str] = &["", "nan", "2030s", "2021-2025"];

/// A start-year token that is a decade range written as a single year.
const MISENCODED_RANGE: (&str, f64) = ("2021-30", 2026.0);

/// Resolved lifetime of one asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lifetime {
    pub start_year: f64,
    pub retirement_year: f64,
}

/// What imputation did to one inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImputationReport {
    pub rows: usize,
    pub starts_from_age: usize,
    pub starts_from_status_mean: usize,
    pub retirements_defaulted: usize,
    pub retirements_jittered: usize,
    /// Rows kept with `retirement <= start` (non-strict mode only).
    pub inverted_lifetimes: usize,
    pub status_means: BTreeMap<String, f64>,
}

/// Keeps rows whose status is in `allowed`; returns the kept rows and the
/// number dropped.
pub fn filter_statuses(
    class: AssetClass,
    rows: &[RawAsset],
    allowed: &[String],
) -> (Vec<RawAsset>, usize) {
    let kept: Vec<RawAsset> = rows
        .iter()
        .filter(|r| allowed.iter().any(|s| *s == r.status))
        .cloned()
        .collect();
    let dropped = rows.len() - kept.len();
    if dropped > 0 {
        debug!(%class, dropped, kept = kept.len(), "rows outside relevant statuses dropped");
    }
    (kept, dropped)
}

/// Parses a start-year token. Unknown markers give `None`; a token that is
/// not a plain number is read from its last four characters, so a range
/// `"2000-2005"` yields the later year.
pub fn parse_start_year(class: AssetClass, token: Option<&str>) -> Result<Option<f64>> {
    let Some(raw) = token else {
        return Ok(None);
    };
    let t = raw.trim();
    if UNKNOWN_START_TOKENS.contains(&t) {
        return Ok(None);
    }
    if t == MISENCODED_RANGE.0 {
        return Ok(Some(MISENCODED_RANGE.1));
    }
    if let Ok(v) = t.parse::<f64>() {
        return Ok(if v.is_nan() || v == 0.0 { None } else { Some(v) });
    }
    let chars: Vec<char> = t.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    tail.parse::<f64>()
        .map(Some)
        .map_err(|_| PanelError::MalformedYear {
            class,
            field: "start year",
            value: raw.to_string(),
        })
}

/// Parses a planned-retirement token.
pub fn parse_retire_year(class: AssetClass, token: Option<&str>) -> Result<Option<f64>> {
    let Some(raw) = token else {
        return Ok(None);
    };
    let t = raw.trim();
    if UNKNOWN_RETIRE_TOKENS.contains(&t) {
        return Ok(None);
    }
    match t.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(_) => Err(PanelError::MalformedYear {
            class,
            field: "planned retirement",
            value: raw.to_string(),
        }),
    }
}

/// Parses a plant-age token (`unknown` is missing).
pub fn parse_plant_age(class: AssetClass, token: Option<&str>) -> Result<Option<f64>> {
    let Some(raw) = token else {
        return Ok(None);
    };
    match raw.trim() {
        "" | "unknown" | "nan" => Ok(None),
        t => t
            .parse::<f64>()
            .map(|v| if v.is_nan() { None } else { Some(v) })
            .map_err(|_| PanelError::MalformedYear {
                class,
                field: "plant age",
                value: raw.to_string(),
            }),
    }
}

/// Gas inventories sometimes put `"first unit, planned closure"` in the
/// start column. Splits those into start and retirement, keeping the later
/// retirement. A bare `0` start becomes missing. Returns the number of rows
/// repaired.
pub fn split_gas_start_ranges(rows: &mut [RawAsset]) -> Result<usize> {
    let mut repaired = 0;
    for row in rows.iter_mut() {
        let Some(token) = row.start_year.clone() else {
            continue;
        };
        if token.trim() == "0" {
            row.start_year = None;
            continue;
        }
        let Some((first, rest)) = token.split_once(',') else {
            continue;
        };
        let closing = rest.split(',').next().unwrap_or_default().trim();
        let closing = parse_retire_year(AssetClass::Gas, Some(closing))?;
        let planned = parse_retire_year(AssetClass::Gas, row.planned_retire.as_deref())?;
        let retire = match (planned, closing) {
            (Some(p), Some(c)) => Some(p.max(c)),
            (p, c) => p.or(c),
        };
        row.start_year = Some(first.trim().to_string());
        row.planned_retire = retire.map(|v| v.to_string());
        repaired += 1;
    }
    Ok(repaired)
}

/// Mean known start year per status, rounded half-to-even.
pub fn status_mean_starts(statuses: &[&str], starts: &[Option<f64>]) -> BTreeMap<String, f64> {
    let mut acc: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for (status, start) in statuses.iter().zip(starts) {
        if let Some(year) = start {
            let e = acc.entry(*status).or_insert((0.0, 0));
            e.0 += year;
            e.1 += 1;
        }
    }
    acc.into_iter()
        .map(|(status, (sum, n))| (status.to_string(), (sum / n as f64).round_ties_even()))
        .collect()
}

/// Fills start and retirement years for every row of one inventory.
///
/// The returned lifetimes are index-aligned with `rows`.
pub fn impute_lifetimes<R: Rng + ?Sized>(
    class: AssetClass,
    rows: &[RawAsset],
    cfg: &PipelineConfig,
    rng: &mut R,
) -> Result<(Vec<Lifetime>, ImputationReport)> {
    let starts = rows
        .iter()
        .map(|r| parse_start_year(class, r.start_year.as_deref()))
        .collect::<Result<Vec<_>>>()?;
    let retires = rows
        .iter()
        .map(|r| parse_retire_year(class, r.planned_retire.as_deref()))
        .collect::<Result<Vec<_>>>()?;
    let ages = match class {
        AssetClass::Steel => rows
            .iter()
            .map(|r| parse_plant_age(class, r.plant_age.as_deref()))
            .collect::<Result<Vec<_>>>()?,
        _ => vec![None; rows.len()],
    };

    let statuses: Vec<&str> = rows.iter().map(|r| r.status.as_str()).collect();
    let means = status_mean_starts(&statuses, &starts);

    let mut report = ImputationReport {
        rows: rows.len(),
        status_means: means.clone(),
        ..Default::default()
    };
    let mut out = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let start_year = match (ages[i], starts[i]) {
            (Some(age), _) => {
                report.starts_from_age += 1;
                cfg.reference_year - age
            }
            (None, Some(start)) => start,
            (None, None) => {
                let mean = means.get(&row.status).copied().ok_or_else(|| {
                    PanelError::ImputationGap {
                        class,
                        status: row.status.clone(),
                    }
                })?;
                report.starts_from_status_mean += 1;
                mean
            }
        };

        let already_retired = row.retired.filter(|y| y.is_finite());
        let retirement_year = match (already_retired, retires[i]) {
            (Some(y), _) => y,
            (None, Some(y)) => y,
            (None, None) => {
                let overdue = start_year + cfg.assumed_lifetime < cfg.reference_year;
                if class == AssetClass::Steel && row.status == OPERATING && overdue {
                    report.retirements_jittered += 1;
                    cfg.reference_year + f64::from(rng.gen_range(cfg.retirement_jitter()))
                } else {
                    report.retirements_defaulted += 1;
                    start_year + cfg.assumed_lifetime
                }
            }
        };

        if !(start_year.is_finite() && retirement_year.is_finite() && retirement_year > start_year) {
            if cfg.strict_lifetimes {
                return Err(PanelError::InvertedLifetime {
                    class,
                    country: row.country.clone(),
                    start: start_year,
                    retirement: retirement_year,
                });
            }
            warn!(%class, country = %row.country, start_year, retirement_year, "asset retires before it starts");
            report.inverted_lifetimes += 1;
        }

        out.push(Lifetime {
            start_year,
            retirement_year,
        });
    }

    info!(
        %class,
        rows = report.rows,
        from_age = report.starts_from_age,
        from_status_mean = report.starts_from_status_mean,
        jittered = report.retirements_jittered,
        "lifetimes imputed"
    );
    Ok((out, report))
}
