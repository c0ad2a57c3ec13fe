use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregate::{CONSID_TOTAL, EXPECTABLE};
use crate::error::Result;
use crate::frame::{column_name, Frame, FrameKey, RowKey, ScenarioFrame};
use crate::types::{years, CredenceRow, Rcp, Ssp};

/// Value a zero considered total is lifted to in plotting output.
pub const PLOT_FLOOR: f64 = 0.000001;

const CENTRAL: &str = "central";
const MASS: &str = "credence_mass";
const SCENARIO_COLUMNS: [&str; 2] = ["SSP", "RCP"];

/// Central credence per (SSP, RCP) as a polars table. Repeated pairs add up.
#[derive(Debug, Clone)]
pub struct CredenceTable(DataFrame);

impl CredenceTable {
    pub fn new(rows: &[CredenceRow]) -> Result<Self> {
        let ssp: Vec<String> = rows.iter().map(|r| r.ssp.to_string()).collect();
        let rcp: Vec<String> = rows.iter().map(|r| r.rcp.to_string()).collect();
        let central: Vec<f64> = rows.iter().map(|r| r.central).collect();
        let df = DataFrame::new(vec![
            Series::new("SSP", ssp),
            Series::new("RCP", rcp),
            Series::new(CENTRAL, central),
        ])?
        .lazy()
        .group_by([col("SSP"), col("RCP")])
        .agg([col(CENTRAL).sum()])
        .collect()?;
        Ok(CredenceTable(df))
    }

    pub fn data(&self) -> &DataFrame {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.height()
    }

    pub fn is_empty(&self) -> bool {
        self.0.height() == 0
    }

    pub fn central(&self, ssp: &Ssp, rcp: Rcp) -> Option<f64> {
        let (ssp, rcp) = (ssp.to_string(), rcp.to_string());
        let ssps = self.0.column("SSP").ok()?.utf8().ok()?;
        let rcps = self.0.column("RCP").ok()?.utf8().ok()?;
        let central = self.0.column(CENTRAL).ok()?.f64().ok()?;
        (0..self.0.height())
            .find(|&i| ssps.get(i) == Some(ssp.as_str()) && rcps.get(i) == Some(rcp.as_str()))
            .and_then(|i| central.get(i))
    }

    fn join_onto(&self, frame: LazyFrame) -> LazyFrame {
        let on: Vec<Expr> = SCENARIO_COLUMNS.iter().map(|c| col(c)).collect();
        frame.join(self.0.clone().lazy(), on.clone(), on, JoinArgs::new(JoinType::Inner))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpectationReport {
    pub rows_in: usize,
    /// Rows whose (SSP, RCP) has no credence.
    pub dropped: usize,
}

/// How rows are summed before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Country,
    Region,
    World,
}

/// Key of a collapsed expectation row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AreaKey {
    pub country: Option<String>,
    pub region: Option<String>,
}

impl AreaKey {
    fn of(key: &RowKey) -> Self {
        AreaKey {
            country: key.country.clone(),
            region: key.region.clone(),
        }
    }
}

impl FrameKey for AreaKey {
    fn key_columns() -> &'static [&'static str] {
        &["country", "region"]
    }

    fn key_values(&self) -> Vec<String> {
        vec![
            self.country.clone().unwrap_or_default(),
            self.region.clone().unwrap_or_default(),
        ]
    }

    fn from_key_values(values: &[&str]) -> Result<Self> {
        let part = |i: usize| {
            values
                .get(i)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };
        Ok(AreaKey {
            country: part(0),
            region: part(1),
        })
    }
}

pub type AreaFrame = Frame<AreaKey>;

/// One grouping's expectation: the credence-weighted scenario rows and
/// their collapse across SSP and RCP.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    pub by_scenario: ScenarioFrame,
    pub collapsed: AreaFrame,
    pub report: ExpectationReport,
}

/// Drops the rows carrying no scenario (SSP `0` or RCP `0`).
pub fn without_unassigned(frame: &ScenarioFrame) -> Result<ScenarioFrame> {
    frame.filter(RowKey::has_scenario)
}

/// Sums rows up to `grouping`. Region and world rollups leave out rows
/// without a region.
pub fn rollup(frame: &ScenarioFrame, grouping: Grouping) -> Result<ScenarioFrame> {
    match grouping {
        Grouping::Country => Ok(frame.clone()),
        Grouping::Region => frame.group_by(|k| {
            k.region.as_ref().map(|region| RowKey {
                country: None,
                region: Some(region.clone()),
                ssp: k.ssp.clone(),
                rcp: k.rcp,
            })
        }),
        Grouping::World => frame.group_by(|k| {
            k.region.as_ref().map(|_| RowKey {
                country: None,
                region: None,
                ssp: k.ssp.clone(),
                rcp: k.rcp,
            })
        }),
    }
}

/// Every column that is neither a row key nor a credence column.
fn value_columns() -> Expr {
    let mut skip: Vec<&str> = RowKey::key_columns().to_vec();
    skip.extend([CENTRAL, MASS]);
    all().exclude(skip)
}

/// Multiplies every series of a row by the central credence of its
/// (SSP, RCP). Rows without credence are dropped and counted.
///
/// The result is a weighted sum per row, not yet an expectation; see
/// [`collapse_scenarios`].
pub fn weight_by_credence(
    frame: &ScenarioFrame,
    credence: &CredenceTable,
) -> Result<(ScenarioFrame, ExpectationReport)> {
    let df = credence
        .join_onto(frame.data().clone().lazy())
        .with_columns([value_columns() * col(CENTRAL)])
        .collect()?;
    let weighted = ScenarioFrame::from_df(frame.stems().to_vec(), df)?;
    let report = ExpectationReport {
        rows_in: frame.len(),
        dropped: frame.len() - weighted.len(),
    };
    if report.dropped > 0 {
        warn!(rows = report.dropped, "rows without credence dropped from the expectation");
    }
    debug!(rows = weighted.len(), "rows weighted by central credence");
    Ok((weighted, report))
}

/// Sums weighted rows across SSP and RCP per (country, region). With
/// `normalize`, each group is divided by the credence mass that reached it.
pub fn collapse_scenarios(weighted: &ScenarioFrame, credence: &CredenceTable, normalize: bool) -> Result<AreaFrame> {
    let stems = weighted.stems().to_vec();
    if !normalize {
        return AreaFrame::summed(stems, weighted.data().drop_many(&SCENARIO_COLUMNS));
    }
    let df = credence
        .join_onto(weighted.data().clone().lazy())
        .group_by([col("country"), col("region")])
        .agg([value_columns().sum(), col(CENTRAL).sum().alias(MASS)])
        .with_columns([when(col(MASS).gt(lit(0.0)))
            .then(col(MASS))
            .otherwise(lit(1.0))
            .alias(MASS)])
        .with_columns([value_columns() / col(MASS)])
        .collect()?;
    AreaFrame::from_df(stems, df)
}

/// Rollup, drop unassigned rows, weight, collapse.
pub fn expectation(
    master: &ScenarioFrame,
    credence: &CredenceTable,
    grouping: Grouping,
    normalize: bool,
) -> Result<Expectation> {
    let rows = rollup(&without_unassigned(master)?, grouping)?;
    let (by_scenario, report) = weight_by_credence(&rows, credence)?;
    let collapsed = collapse_scenarios(&by_scenario, credence, normalize)?;
    debug!(
        ?grouping,
        scenario_rows = by_scenario.len(),
        areas = collapsed.len(),
        "expectation collapsed"
    );
    Ok(Expectation {
        by_scenario,
        collapsed,
        report,
    })
}

/// Scenario whose expectable trajectory stays closest to zero for one
/// country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosestScenario {
    pub ssp: String,
    pub rcp: String,
    pub distance: f64,
}

/// Per country, the (SSP, RCP) minimising Σ rho^i · |expectable[2021+i]|.
/// The first row in key order wins a tie.
pub fn closest_scenarios(master: &ScenarioFrame, rho: f64) -> Result<BTreeMap<String, ClosestScenario>> {
    let mut best: BTreeMap<String, ClosestScenario> = BTreeMap::new();
    if master.stem_index(EXPECTABLE).is_none() {
        return Ok(best);
    }
    let rows = master.keys()?.into_iter().zip(master.column_series(EXPECTABLE)?);
    for (key, expectable) in rows.filter(|(k, _)| k.has_scenario()) {
        let Some(country) = &key.country else {
            continue;
        };
        let mut weight = 1.0;
        let mut distance = 0.0;
        for &v in expectable.values() {
            distance += weight * v.abs();
            weight *= rho;
        }
        let better = best.get(country).map_or(true, |b| distance < b.distance);
        if better {
            best.insert(
                country.clone(),
                ClosestScenario {
                    ssp: key.ssp.to_string(),
                    rcp: key.rcp.to_string(),
                    distance,
                },
            );
        }
    }
    Ok(best)
}

/// Copy for plotting: expectable clamped at 0 and zero considered totals
/// lifted to [`PLOT_FLOOR`] so committed always stacks below considered.
pub fn plot_ready<K: FrameKey>(frame: &Frame<K>) -> Result<Frame<K>> {
    let mut exprs = Vec::new();
    if frame.stem_index(EXPECTABLE).is_some() {
        for year in years() {
            let c = col(&column_name(EXPECTABLE, year));
            exprs.push(
                when(c.clone().lt(lit(0.0)))
                    .then(lit(0.0))
                    .otherwise(c)
                    .alias(&column_name(EXPECTABLE, year)),
            );
        }
    }
    if frame.stem_index(CONSID_TOTAL).is_some() {
        for year in years() {
            let c = col(&column_name(CONSID_TOTAL, year));
            exprs.push(
                when(c.clone().eq(lit(0.0)))
                    .then(lit(PLOT_FLOOR))
                    .otherwise(c)
                    .alias(&column_name(CONSID_TOTAL, year)),
            );
        }
    }
    if exprs.is_empty() {
        return Ok(frame.clone());
    }
    let df = frame.data().clone().lazy().with_columns(exprs).collect()?;
    Frame::from_df(frame.stems().to_vec(), df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuilder, SCENARIO_STEM};
    use crate::types::YearSeries;

    fn credence_row(ssp: &str, rcp: u16, central: f64) -> CredenceRow {
        CredenceRow {
            ssp: Ssp::parse(ssp),
            rcp: Rcp::Pathway(rcp),
            central,
            optimistic: 0.0,
            pessimistic: 0.0,
        }
    }

    fn key(country: &str, region: Option<&str>, ssp: &str, rcp: u16) -> RowKey {
        RowKey {
            region: region.map(str::to_string),
            ..RowKey::country(country, Ssp::parse(ssp), Rcp::Pathway(rcp))
        }
    }

    fn master() -> ScenarioFrame {
        let mut f = FrameBuilder::new();
        *f.series_mut(&key("A", Some("R1"), "SSP1", 26), SCENARIO_STEM) = YearSeries::constant(10.0);
        *f.series_mut(&key("A", Some("R1"), "SSP2", 45), SCENARIO_STEM) = YearSeries::constant(20.0);
        *f.series_mut(&key("A", Some("R1"), "SSP5", 85), SCENARIO_STEM) = YearSeries::constant(99.0);
        *f.series_mut(&key("B", Some("R1"), "SSP1", 26), SCENARIO_STEM) = YearSeries::constant(1.0);
        *f.series_mut(&key("C", None, "SSP1", 26), SCENARIO_STEM) = YearSeries::constant(7.0);
        *f.series_mut(&RowKey::unassigned("D"), SCENARIO_STEM) = YearSeries::constant(3.0);
        f.build().unwrap()
    }

    fn credence() -> CredenceTable {
        CredenceTable::new(&[credence_row("SSP1", 26, 0.25), credence_row("SSP2", 45, 0.5)]).unwrap()
    }

    fn area_a() -> AreaKey {
        AreaKey {
            country: Some("A".into()),
            region: Some("R1".into()),
        }
    }

    #[test]
    fn repeated_credence_pairs_add_up() {
        let table = CredenceTable::new(&[
            credence_row("SSP1", 26, 0.25),
            credence_row("SSP1", 26, 0.5),
            credence_row("SSP2", 45, 0.1),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.central(&Ssp::parse("SSP1"), Rcp::Pathway(26)), Some(0.75));
        assert_eq!(table.central(&Ssp::parse("SSP3"), Rcp::Pathway(70)), None);
    }

    #[test]
    fn weighted_sum_identity() {
        let rows = without_unassigned(&master()).unwrap();
        let (weighted, report) = weight_by_credence(&rows, &credence()).unwrap();
        // SSP5-8.5 has no credence
        assert_eq!(report.rows_in, 5);
        assert_eq!(report.dropped, 1);
        assert_eq!(weighted.value(&key("A", Some("R1"), "SSP2", 45), SCENARIO_STEM, 2050), 10.0);
        let collapsed = collapse_scenarios(&weighted, &credence(), false).unwrap();
        let got = collapsed.value(&area_a(), SCENARIO_STEM, 2050);
        assert!((got - (0.25 * 10.0 + 0.5 * 20.0)).abs() < 1e-12);
    }

    #[test]
    fn expectation_keeps_the_weighted_scenario_rows() {
        let out = expectation(&master(), &credence(), Grouping::Country, false).unwrap();
        // A twice, B and C once; SSP5-8.5 and the unassigned row are gone
        assert_eq!(out.by_scenario.len(), 4);
        assert_eq!(out.collapsed.len(), 3);
        let a26 = key("A", Some("R1"), "SSP1", 26);
        assert!((out.by_scenario.value(&a26, SCENARIO_STEM, 2030) - 2.5).abs() < 1e-12);
        assert!(!out.by_scenario.contains(&key("A", Some("R1"), "SSP5", 85)));
        assert_eq!(out.report.dropped, 1);
    }

    #[test]
    fn normalized_expectation_divides_by_mass() {
        let out = expectation(&master(), &credence(), Grouping::Country, true).unwrap();
        let got = out.collapsed.value(&area_a(), SCENARIO_STEM, 2050);
        assert!((got - (2.5 + 10.0) / 0.75).abs() < 1e-12);
        // a single SSP1-2.6 row divided by its own credence
        let b = AreaKey {
            country: Some("B".into()),
            region: Some("R1".into()),
        };
        assert!((out.collapsed.value(&b, SCENARIO_STEM, 2050) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn region_and_world_rollups_skip_regionless_rows() {
        let rows = without_unassigned(&master()).unwrap();
        assert_eq!(rows.len(), 5);
        let region = rollup(&rows, Grouping::Region).unwrap();
        let r1 = RowKey {
            country: None,
            region: Some("R1".into()),
            ssp: Ssp::parse("SSP1"),
            rcp: Rcp::Pathway(26),
        };
        assert_eq!(region.value(&r1, SCENARIO_STEM, 2030), 11.0);
        let world = rollup(&rows, Grouping::World).unwrap();
        let w = RowKey { region: None, ..r1 };
        assert_eq!(world.value(&w, SCENARIO_STEM, 2030), 11.0);
        assert_eq!(world.len(), 3);
    }

    #[test]
    fn closest_scenario_uses_discounted_distance() {
        let mut f = FrameBuilder::new();
        *f.series_mut(&key("A", None, "SSP1", 26), EXPECTABLE) = YearSeries::constant(-1.0);
        *f.series_mut(&key("A", None, "SSP2", 45), EXPECTABLE) = YearSeries::constant(2.0);
        *f.series_mut(&key("B", None, "SSP1", 26), EXPECTABLE) = YearSeries::constant(1.0);
        *f.series_mut(&key("B", None, "SSP2", 45), EXPECTABLE) = YearSeries::constant(-1.0);
        let f: ScenarioFrame = f.build().unwrap();
        let best = closest_scenarios(&f, 0.99).unwrap();
        assert_eq!(best["A"].ssp, "SSP1");
        assert_eq!(best["A"].rcp, "2.6");
        let expected: f64 = (0..80).map(|i| 0.99f64.powi(i)).sum();
        assert!((best["A"].distance - expected).abs() < 1e-9);
        // tie: first in key order
        assert_eq!(best["B"].ssp, "SSP1");
    }

    #[test]
    fn plot_view_clamps_only_a_copy() {
        let mut f = FrameBuilder::new();
        let k = key("A", None, "SSP1", 26);
        f.series_mut(&k, EXPECTABLE).set(2030, -4.0);
        f.series_mut(&k, EXPECTABLE).set(2031, 4.0);
        f.series_mut(&k, CONSID_TOTAL).set(2030, 2.0);
        let f: ScenarioFrame = f.build().unwrap();
        let view = plot_ready(&f).unwrap();
        assert_eq!(view.value(&k, EXPECTABLE, 2030), 0.0);
        assert_eq!(view.value(&k, EXPECTABLE, 2031), 4.0);
        assert_eq!(view.value(&k, CONSID_TOTAL, 2030), 2.0);
        assert_eq!(view.value(&k, CONSID_TOTAL, 2040), PLOT_FLOOR);
        assert_eq!(f.value(&k, EXPECTABLE, 2030), -4.0);
    }
}
