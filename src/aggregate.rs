use std::collections::BTreeSet;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::frame::{column_name, CountryFrame, FrameKey, RowKey, ScenarioFrame, SCENARIO_STEM};
use crate::panel::{build_panel, split_by_commitment};
use crate::types::{years, AssetClass, AssetRecord, RegionMap, Rcp, Ssp, YearSeries, FIRST_YEAR};

pub const ELEC_CONSID: &str = "elec.consid.total";
pub const ELEC_COMMIT: &str = "elec.commit.total";
pub const INDUSTRY_CONSID: &str = "industry.consid.total";
pub const INDUSTRY_COMMIT: &str = "industry.commit.total";
pub const CONSID_TOTAL: &str = "consid.total";
pub const COMMIT_TOTAL: &str = "commit.total";
pub const CONSID_COMMIT_TOTAL: &str = "consid+commit.total";
pub const EXPECTABLE: &str = "expectable";
pub const CONSID_COMMIT_SCEN: &str = "consid+commit+scen";

/// Committed-source sector whose 2021 value scales considered industry.
pub const INDUSTRY_SECTOR: &str = "Industry";
/// Substring marking electricity columns of the committed source.
pub const ELECTRICITY_SECTOR: &str = "Electricity";

/// Imputed assets of every class.
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    pub coal: Vec<AssetRecord>,
    pub gas: Vec<AssetRecord>,
    pub steel: Vec<AssetRecord>,
}

/// Status panel of one class plus its committed and considered totals.
#[derive(Debug, Clone, Default)]
pub struct ClassPanels {
    /// Every status, `<class>.<status>` columns.
    pub all: CountryFrame,
    /// `<class>.consid.total`.
    pub consid: CountryFrame,
    /// `<class>.commit.total`.
    pub commit: CountryFrame,
}

impl ClassPanels {
    pub fn build(class: AssetClass, records: &[AssetRecord]) -> Result<Self> {
        let prefix = class.prefix();
        let (committed, considered) = split_by_commitment(records);
        let consid_panel = build_panel(prefix, &considered)?;
        let commit_panel = build_panel(prefix, &committed)?;
        Ok(ClassPanels {
            all: build_panel(prefix, records)?,
            consid: CountryFrame::year_total(&[&consid_panel], &format!("{prefix}.consid.total"))?,
            commit: CountryFrame::year_total(&[&commit_panel], &format!("{prefix}.commit.total"))?,
        })
    }
}

/// Every frame the aggregation derives, master last.
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
    pub coal: ClassPanels,
    pub gas: ClassPanels,
    pub steel: ClassPanels,
    pub elec_consid: CountryFrame,
    pub elec_commit: CountryFrame,
    pub industry_commit: CountryFrame,
    pub industry_consid: CountryFrame,
    pub commit_total: CountryFrame,
    pub consid_total: CountryFrame,
    pub consid_commit_total: CountryFrame,
    /// `expectable` and `consid+commit+scen` per scenario row.
    pub expectable: ScenarioFrame,
    pub master: ScenarioFrame,
    /// Countries of the master the region map does not cover.
    pub unmapped_regions: Vec<String>,
}

/// Considered industry: 2021 industry scaled by considered electricity
/// relative to 2021 committed electricity. Non-finite ratios are 0.
pub fn industry_considered(
    elec_consid: &CountryFrame,
    elec_commit: &CountryFrame,
    committed: &CountryFrame,
) -> Result<CountryFrame> {
    let industry = committed.select(|s| s == INDUSTRY_SECTOR)?;
    let joined = CountryFrame::merge(&[elec_consid, elec_commit, &industry])?;
    let base_elec = col(&column_name(ELEC_COMMIT, FIRST_YEAR));
    let base_industry = if industry.stems().is_empty() {
        lit(0.0)
    } else {
        col(&column_name(INDUSTRY_SECTOR, FIRST_YEAR))
    };
    let mut exprs = vec![col("country")];
    for year in years() {
        let scaled = col(&column_name(ELEC_CONSID, year)) / base_elec.clone() * base_industry.clone();
        exprs.push(
            when(scaled.clone().is_finite())
                .then(scaled)
                .otherwise(lit(0.0))
                .alias(&column_name(INDUSTRY_CONSID, year)),
        );
    }
    let df = joined.data().clone().lazy().select(exprs).collect()?;
    CountryFrame::from_df(vec![INDUSTRY_CONSID.to_string()], df)
}

/// Per scenario row: scenario minus and plus the committed+considered
/// total of its country. Negative gaps are kept.
pub fn expectable_emissions(scenarios: &ScenarioFrame, consid_commit: &CountryFrame) -> Result<ScenarioFrame> {
    let stems = vec![EXPECTABLE.to_string(), CONSID_COMMIT_SCEN.to_string()];
    if scenarios.stem_index(SCENARIO_STEM).is_none() {
        return ScenarioFrame::with_stems(stems);
    }
    let totals = consid_commit.select(|s| s == CONSID_COMMIT_TOTAL)?;
    let has_totals = !totals.stems().is_empty();
    let mut exprs: Vec<Expr> = RowKey::key_columns().iter().map(|c| col(c)).collect();
    for (stem, sign) in [(EXPECTABLE, -1.0), (CONSID_COMMIT_SCEN, 1.0)] {
        for year in years() {
            let total = if has_totals {
                col(&column_name(CONSID_COMMIT_TOTAL, year)).fill_null(lit(0.0))
            } else {
                lit(0.0)
            };
            let scenario = col(&column_name(SCENARIO_STEM, year));
            exprs.push((scenario + lit(sign) * total).alias(&column_name(stem, year)));
        }
    }
    let df = scenarios
        .data()
        .clone()
        .lazy()
        .join(
            totals.data().clone().lazy(),
            [col("country")],
            [col("country")],
            JoinArgs::new(JoinType::Left),
        )
        .select(exprs)
        .collect()?;
    ScenarioFrame::from_df(stems, df)
}

/// Outer-joins country frames on country into a scenario-keyed frame: every
/// row takes its country's series, and countries without any row get one
/// with SSP `0` / RCP `0`. Missing cells are 0.
pub fn join_countries(master: &ScenarioFrame, frames: &[&CountryFrame]) -> Result<ScenarioFrame> {
    let mut stems = master.stems().to_vec();
    let mut joined = master.data().clone().lazy();
    for frame in frames {
        let fresh: Vec<String> = frame
            .stems()
            .iter()
            .filter(|s| !stems.contains(s))
            .cloned()
            .collect();
        let right = CountryFrame::from_df(fresh.clone(), frame.data().clone())?;
        stems.extend(fresh);
        joined = joined.join(
            right.data().clone().lazy(),
            [col("country")],
            [col("country")],
            JoinArgs::new(JoinType::Outer),
        );
    }
    let df = joined
        .with_columns([
            col("region").fill_null(lit("")),
            col("SSP").fill_null(lit(Ssp::Unassigned.to_string())),
            col("RCP").fill_null(lit(Rcp::Unassigned.to_string())),
        ])
        .with_columns([all().exclude(RowKey::key_columns()).fill_null(lit(0.0))])
        .collect()?;
    ScenarioFrame::from_df(stems, df)
}

/// Region lookup table with `country` and `region` text columns.
pub fn region_frame(regions: &RegionMap) -> Result<DataFrame> {
    let (countries, names): (Vec<&str>, Vec<&str>) = regions.iter().unzip();
    Ok(DataFrame::new(vec![
        Series::new("country", countries),
        Series::new("region", names),
    ])?)
}

/// Attaches regions by left join on country; returns the countries left
/// without one.
pub fn attach_regions(master: &ScenarioFrame, regions: &RegionMap) -> Result<(ScenarioFrame, Vec<String>)> {
    let df = master
        .data()
        .drop("region")?
        .lazy()
        .join(
            region_frame(regions)?.lazy(),
            [col("country")],
            [col("country")],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([col("region").fill_null(lit(""))])
        .collect()?;
    let out = ScenarioFrame::from_df(master.stems().to_vec(), df)?;
    let unmapped: BTreeSet<String> = out
        .keys()?
        .into_iter()
        .filter(|k| k.region.is_none())
        .filter_map(|k| k.country)
        .collect();
    Ok((out, unmapped.into_iter().collect()))
}

/// Derives every total in order and assembles the region-tagged master.
pub fn aggregate_to_master(
    assets: &AssetSet,
    committed: &CountryFrame,
    scenarios: &ScenarioFrame,
    regions: &RegionMap,
    cfg: &PipelineConfig,
) -> Result<Aggregates> {
    let coal = ClassPanels::build(AssetClass::Coal, &assets.coal)?;
    let gas = ClassPanels::build(AssetClass::Gas, &assets.gas)?;
    let steel = ClassPanels::build(AssetClass::Steel, &assets.steel)?;
    debug!(
        coal = coal.all.len(),
        gas = gas.all.len(),
        steel = steel.all.len(),
        "considered and committed panels separated"
    );

    let elec_consid = CountryFrame::year_total(&[&gas.consid, &coal.consid], ELEC_CONSID)?;
    let elec_columns = committed.select(|s| s.contains(ELECTRICITY_SECTOR))?;
    let elec_commit = CountryFrame::year_total(&[&elec_columns], ELEC_COMMIT)?;
    let industry_commit = CountryFrame::year_total(&[committed], INDUSTRY_COMMIT)?;
    let industry_consid = industry_considered(&elec_consid, &elec_commit, committed)?;

    let commit_total = CountryFrame::year_total(&[committed], COMMIT_TOTAL)?;
    let mut considered = vec![&gas.consid, &coal.consid, &industry_consid];
    if cfg.include_steel {
        considered.push(&steel.consid);
    }
    let consid_total = CountryFrame::year_total(&considered, CONSID_TOTAL)?;
    let consid_commit_total =
        CountryFrame::year_total(&[&commit_total, &consid_total], CONSID_COMMIT_TOTAL)?;

    let expectable = expectable_emissions(scenarios, &consid_commit_total)?;
    info!(rows = expectable.len(), "expectable emissions created");

    let master = ScenarioFrame::merge(&[scenarios, &expectable])?;
    let mut joined = vec![
        &gas.all,
        &coal.all,
        &gas.consid,
        &coal.consid,
        &industry_consid,
        &gas.commit,
        &coal.commit,
        &elec_commit,
        &elec_consid,
        &industry_commit,
        &consid_total,
        &commit_total,
        &consid_commit_total,
    ];
    if cfg.include_steel {
        joined.extend([&steel.all, &steel.consid, &steel.commit]);
    }
    let master = join_countries(&master, &joined)?;
    let (master, unmapped_regions) = attach_regions(&master, regions)?;
    if !unmapped_regions.is_empty() {
        warn!(
            countries = unmapped_regions.len(),
            names = ?unmapped_regions,
            "countries without a region are left out of rollups"
        );
    }
    info!(rows = master.len(), columns = master.data().width(), "master merged");

    Ok(Aggregates {
        coal,
        gas,
        steel,
        elec_consid,
        elec_commit,
        industry_commit,
        industry_consid,
        commit_total,
        consid_total,
        consid_commit_total,
        expectable,
        master,
        unmapped_regions,
    })
}

/// `commit.total + consid.total - consid+commit.total` for one country,
/// for checking the totals identity.
pub fn total_residual(agg: &Aggregates, country: &str) -> YearSeries {
    let get = |frame: &CountryFrame, stem| frame.series(country, stem).unwrap_or_default();
    get(&agg.commit_total, COMMIT_TOTAL) + get(&agg.consid_total, CONSID_TOTAL)
        - get(&agg.consid_commit_total, CONSID_COMMIT_TOTAL)
}
