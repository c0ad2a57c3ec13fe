use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::frame::{CountryFrame, FrameBuilder, RowKey, ScenarioFrame, SCENARIO_STEM};
use crate::names::CountryResolver;
use crate::types::{years, Rcp, ScenarioRecord, Ssp, YearSeries, FIRST_YEAR, LAST_YEAR, YEAR_COUNT};

/// Gg CO2eq → Mt CO2eq.
pub const GG_TO_MT: f64 = 0.001;
/// Gt CO2 → Mt CO2.
pub const GT_TO_MT: f64 = 1000.0;

/// One downscaled scenario row, values in Gg CO2eq keyed by year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScenarioRow {
    pub country: String,
    pub source: String,
    pub entity: String,
    /// `<SSP:4><RCP:2><model:5+>`, e.g. `SSP126IMAGE`.
    pub scenario: String,
    pub values: BTreeMap<u16, f64>,
}

/// One committed-emissions observation in Gt CO2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommittedRow {
    pub country: String,
    pub year: i32,
    pub sector: String,
    pub emissions_gt: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub rows_in: usize,
    /// Rows of another entity or source.
    pub filtered_out: usize,
    /// Rows whose scenario code does not split into SSP, RCP and model.
    pub malformed_codes: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommittedReport {
    pub rows_in: usize,
    pub excluded_areas: usize,
    pub outside_axis: usize,
    pub sectors: Vec<String>,
    pub countries: usize,
}

/// Splits a scenario code into (SSP, RCP token, model). The model part must
/// be at least 5 characters.
pub fn split_scenario_code(code: &str) -> Option<(String, String, String)> {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() < 4 + 2 + 5 {
        return None;
    }
    let ssp: String = chars[..4].iter().collect();
    let rcp: String = chars[4..6].iter().collect();
    let model: String = chars[6..].iter().collect();
    Some((ssp, rcp, model))
}

/// Filters to the configured entity and source, averages every
/// (country, SSP, RCP) across models year by year and converts to Mt.
/// A year no model reports stays 0.
pub fn clean_scenarios<R: CountryResolver + ?Sized>(
    rows: &[RawScenarioRow],
    cfg: &PipelineConfig,
    names: &R,
) -> Result<(Vec<ScenarioRecord>, ScenarioReport)> {
    let mut report = ScenarioReport {
        rows_in: rows.len(),
        ..Default::default()
    };
    let mut countries = Vec::new();
    let mut ssps = Vec::new();
    let mut rcps = Vec::new();
    let mut cells: Vec<Vec<Option<f64>>> = vec![Vec::new(); YEAR_COUNT];
    for row in rows {
        if row.entity != cfg.scenario_entity || row.source != cfg.scenario_source {
            report.filtered_out += 1;
            continue;
        }
        let Some((ssp, rcp, _model)) = split_scenario_code(&row.scenario) else {
            report.malformed_codes += 1;
            continue;
        };
        countries.push(names.resolve(&row.country)?.to_string());
        ssps.push(Ssp::parse(&ssp).to_string());
        rcps.push(Rcp::from_code(&rcp).to_string());
        for (column, year) in cells.iter_mut().zip(years()) {
            let value = row.values.get(&year).copied().filter(|v| v.is_finite());
            column.push(value.map(|v| v * GG_TO_MT));
        }
    }
    if report.malformed_codes > 0 {
        warn!(rows = report.malformed_codes, "scenario codes without SSP/RCP/model dropped");
    }

    let mut columns = vec![
        Series::new("country", countries),
        Series::new("SSP", ssps),
        Series::new("RCP", rcps),
    ];
    for (column, year) in cells.into_iter().zip(years()) {
        columns.push(Series::new(&year.to_string(), column));
    }
    let means = DataFrame::new(columns)?
        .lazy()
        .group_by([col("country"), col("SSP"), col("RCP")])
        .agg([all().exclude(["country", "SSP", "RCP"]).mean()])
        .collect()?;

    let country = means.column("country")?.utf8()?;
    let ssp = means.column("SSP")?.utf8()?;
    let rcp = means.column("RCP")?.utf8()?;
    let year_columns = years()
        .map(|y| means.column(&y.to_string()).and_then(|s| s.f64()))
        .collect::<PolarsResult<Vec<_>>>()?;
    let mut records = Vec::with_capacity(means.height());
    for i in 0..means.height() {
        records.push(ScenarioRecord {
            country: country.get(i).unwrap_or_default().to_string(),
            ssp: Ssp::parse(ssp.get(i).unwrap_or_default()),
            rcp: Rcp::parse(rcp.get(i).unwrap_or_default())?,
            emissions: YearSeries::from_fn(|year| {
                year_columns[usize::from(year - FIRST_YEAR)].get(i).unwrap_or(0.0)
            }),
        });
    }
    records.sort_by(|a, b| (&a.country, &a.ssp, a.rcp).cmp(&(&b.country, &b.ssp, b.rcp)));
    report.records = records.len();
    info!(
        rows = report.rows_in,
        filtered = report.filtered_out,
        records = report.records,
        "scenario emissions cleaned"
    );
    Ok((records, report))
}

/// Scenario records as a frame keyed by (country, SSP, RCP) with the
/// trajectory under the bare-year stem.
pub fn scenario_frame(records: &[ScenarioRecord]) -> Result<ScenarioFrame> {
    let mut frame = FrameBuilder::with_stems([SCENARIO_STEM]);
    for rec in records {
        let key = RowKey::country(rec.country.clone(), rec.ssp.clone(), rec.rcp);
        *frame.series_mut(&key, SCENARIO_STEM) += &rec.emissions;
    }
    frame.build()
}

/// Pivots the committed source to one column per sector (sorted), Mt CO2.
/// Years before the axis are dropped, configured aggregate areas are
/// skipped before name resolution and duplicate cells are averaged.
pub fn clean_committed<R: CountryResolver + ?Sized>(
    rows: &[RawCommittedRow],
    cfg: &PipelineConfig,
    names: &R,
) -> Result<(CountryFrame, CommittedReport)> {
    let mut report = CommittedReport {
        rows_in: rows.len(),
        ..Default::default()
    };
    let mut countries = Vec::new();
    let mut sector_column = Vec::new();
    let mut year_column = Vec::new();
    let mut values = Vec::new();
    let mut sectors = BTreeSet::new();
    for row in rows {
        if cfg.excluded_committed_areas.iter().any(|a| a == &row.country) {
            report.excluded_areas += 1;
            continue;
        }
        if !(i32::from(FIRST_YEAR)..=i32::from(LAST_YEAR)).contains(&row.year) {
            report.outside_axis += 1;
            continue;
        }
        let country = names.resolve(&row.country)?.to_string();
        sectors.insert(row.sector.clone());
        if !row.emissions_gt.is_finite() {
            continue;
        }
        countries.push(country);
        sector_column.push(row.sector.clone());
        year_column.push(row.year);
        values.push(row.emissions_gt * GT_TO_MT);
    }
    if report.excluded_areas > 0 {
        debug!(rows = report.excluded_areas, "aggregate areas skipped in committed source");
    }

    let means = DataFrame::new(vec![
        Series::new("country", countries),
        Series::new("sector", sector_column),
        Series::new("year", year_column),
        Series::new("mt", values),
    ])?
    .lazy()
    .group_by([col("country"), col("sector"), col("year")])
    .agg([col("mt").mean()])
    .collect()?;

    let country = means.column("country")?.utf8()?;
    let sector = means.column("sector")?.utf8()?;
    let year = means.column("year")?.i32()?;
    let mt = means.column("mt")?.f64()?;
    let mut frame: FrameBuilder<String> = FrameBuilder::with_stems(sectors.iter().cloned());
    for i in 0..means.height() {
        let (Some(c), Some(s), Some(y), Some(v)) = (country.get(i), sector.get(i), year.get(i), mt.get(i)) else {
            continue;
        };
        if let Ok(y) = u16::try_from(y) {
            frame.series_mut(c, s).set(y, v);
        }
    }
    let frame = frame.build()?;
    report.sectors = sectors.into_iter().collect();
    report.countries = frame.len();
    info!(
        countries = report.countries,
        sectors = report.sectors.len(),
        "committed emissions pivoted"
    );
    Ok((frame, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PanelError;
    use crate::names::CountryNames;

    fn names() -> CountryNames {
        CountryNames::from_pairs([("United States", "USA"), ("Chile", "Chile")])
    }

    fn scen(country: &str, code: &str, values: &[(u16, f64)]) -> RawScenarioRow {
        RawScenarioRow {
            country: country.into(),
            source: "PMSSPBIE".into(),
            entity: "KYOTOGHGAR4".into(),
            scenario: code.into(),
            values: values.iter().copied().collect(),
        }
    }

    #[test]
    fn code_split() {
        assert_eq!(
            split_scenario_code("SSP119IMAGE"),
            Some(("SSP1".into(), "19".into(), "IMAGE".into()))
        );
        assert_eq!(
            split_scenario_code("SSP3BLAIMCGE"),
            Some(("SSP3".into(), "BL".into(), "AIMCGE".into()))
        );
        assert_eq!(split_scenario_code("SSP119IMA"), None);
    }

    #[test]
    fn thousand_gg_is_one_mt() {
        let cfg = PipelineConfig::default();
        let rows = vec![scen("Chile", "SSP119IMAGE", &[(2030, 1000.0)])];
        let (records, _) = clean_scenarios(&rows, &cfg, &names()).unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].emissions.get(2030).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(records[0].rcp, Rcp::Pathway(19));
        assert_eq!(records[0].rcp.to_string(), "1.9");
    }

    #[test]
    fn models_are_averaged_and_filters_applied() {
        let cfg = PipelineConfig::default();
        let mut other_entity = scen("USA", "SSP245IMAGE", &[(2030, 99_000.0)]);
        other_entity.entity = "CO2".into();
        let rows = vec![
            scen("USA", "SSP245IMAGE", &[(2030, 2000.0), (1990, 5.0)]),
            scen("United States", "SSP245MESSAGE", &[(2030, 4000.0)]),
            scen("USA", "SSP3BLAIMCGE", &[(2030, 500.0)]),
            scen("USA", "SSP2", &[(2030, 1.0)]),
            other_entity,
        ];
        let (records, report) = clean_scenarios(&rows, &cfg, &names()).unwrap();
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.malformed_codes, 1);
        assert_eq!(records.len(), 2);
        let ssp2 = records.iter().find(|r| r.rcp == Rcp::Pathway(45)).unwrap();
        assert_eq!(ssp2.country, "United States");
        assert!((ssp2.emissions.get(2030).unwrap() - 3.0).abs() < 1e-12);
        let bl = records.iter().find(|r| r.rcp == Rcp::Baseline).unwrap();
        assert_eq!(bl.ssp, Ssp::parse("SSP3"));
        assert_eq!(bl.emissions.get(2031), Some(0.0));
    }

    #[test]
    fn unmapped_scenario_country_fails() {
        let cfg = PipelineConfig::default();
        let rows = vec![scen("Atlantis", "SSP119IMAGE", &[(2030, 1.0)])];
        assert!(matches!(
            clean_scenarios(&rows, &cfg, &names()),
            Err(PanelError::UnmappedCountry(_))
        ));
    }

    #[test]
    fn committed_pivot() {
        let cfg = PipelineConfig::default();
        let row = |country: &str, year, sector: &str, gt| RawCommittedRow {
            country: country.into(),
            year,
            sector: sector.into(),
            emissions_gt: gt,
        };
        let rows = vec![
            row("USA", 2020, "Industry", 9.0),
            row("USA", 2021, "Industry", 0.002),
            row("USA", 2021, "Electricity", 0.004),
            row("USA", 2021, "Electricity", 0.006),
            row("Other Africa", 2021, "Industry", 1.0),
        ];
        let (frame, report) = clean_committed(&rows, &cfg, &names()).unwrap();
        assert_eq!(frame.stems(), ["Electricity", "Industry"]);
        assert_eq!(report.excluded_areas, 1);
        assert_eq!(report.outside_axis, 1);
        assert!((frame.value("United States", "Industry", 2021) - 2.0).abs() < 1e-9);
        assert!((frame.value("United States", "Electricity", 2021) - 5.0).abs() < 1e-9);
        assert_eq!(frame.value("United States", "Industry", 2022), 0.0);
    }

    #[test]
    fn scenario_frame_uses_bare_years() {
        let rec = ScenarioRecord {
            country: "Chile".into(),
            ssp: Ssp::parse("SSP1"),
            rcp: Rcp::Pathway(26),
            emissions: YearSeries::constant(2.0),
        };
        let frame = scenario_frame(&[rec]).unwrap();
        assert_eq!(frame.column_names()[0], "2021");
        let key = RowKey::country("Chile", Ssp::parse("SSP1"), Rcp::Pathway(26));
        assert_eq!(frame.value(&key, SCENARIO_STEM, 2100), 2.0);
    }
}
