use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{aggregate_to_master, Aggregates, AssetSet};
use crate::config::PipelineConfig;
use crate::error::{PanelError, Result};
use crate::estimate::{estimate_all, SteelFactors};
use crate::expectation::{
    closest_scenarios, expectation, ClosestScenario, CredenceTable, Expectation, ExpectationReport, Grouping,
};
use crate::frame::CountryFrame;
use crate::impute::{filter_statuses, impute_lifetimes, split_gas_start_ranges, ImputationReport};
use crate::io::Inputs;
use crate::names::{CountryNames, CountryResolver};
use crate::scenario::{clean_committed, clean_scenarios, scenario_frame, CommittedReport, ScenarioReport};
use crate::types::{AssetClass, AssetRecord, RawAsset};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassReport {
    pub rows_in: usize,
    pub dropped_by_status: usize,
    /// Gas start tokens of the form `"Y1, Y2"` split into start and retire.
    pub start_ranges_split: usize,
    pub imputation: ImputationReport,
    pub total_annual_co2: f64,
}

/// Counts and warnings of one run, serialisable for the run log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub classes: BTreeMap<AssetClass, ClassReport>,
    pub scenarios: ScenarioReport,
    pub committed: CommittedReport,
    pub expectation: ExpectationReports,
    pub unmapped_regions: Vec<String>,
}

/// Credence coverage of the expectation at each grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpectationReports {
    pub country: ExpectationReport,
    pub region: ExpectationReport,
    pub world: ExpectationReport,
}

/// Probability-weighted views at each grouping, per scenario and collapsed.
#[derive(Debug, Clone, Default)]
pub struct Expectations {
    pub country: Expectation,
    pub region: Expectation,
    pub world: Expectation,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub assets: AssetSet,
    pub committed: CountryFrame,
    pub aggregates: Aggregates,
    pub expectations: Expectations,
    pub closest: BTreeMap<String, ClosestScenario>,
    pub report: RunReport,
}

/// Fails with the first unmapped name after logging every one of them.
fn ensure_mapped<'a>(
    names: &CountryNames,
    source: &str,
    countries: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let missing = names.missing(countries);
    match missing.first() {
        None => Ok(()),
        Some(first) => {
            warn!(source, count = missing.len(), names = ?missing, "country names missing from the mapping table");
            Err(PanelError::UnmappedCountry(first.clone()))
        }
    }
}

/// Filters, estimates and imputes one inventory into resolved records.
pub fn prepare_class<R: Rng + ?Sized>(
    class: AssetClass,
    rows: &[RawAsset],
    names: &CountryNames,
    factors: &SteelFactors,
    cfg: &PipelineConfig,
    rng: &mut R,
) -> Result<(Vec<AssetRecord>, ClassReport)> {
    let (mut kept, dropped) = filter_statuses(class, rows, cfg.statuses(class));
    ensure_mapped(names, class.prefix(), kept.iter().map(|r| r.country.as_str()))?;
    let start_ranges_split = match class {
        AssetClass::Gas => split_gas_start_ranges(&mut kept)?,
        _ => 0,
    };
    let co2 = estimate_all(class, &kept, cfg, factors)?;
    let (lifetimes, imputation) = impute_lifetimes(class, &kept, cfg, rng)?;

    let mut records = Vec::with_capacity(kept.len());
    for ((row, life), annual_co2) in kept.iter().zip(&lifetimes).zip(co2) {
        records.push(AssetRecord {
            country: names.resolve(&row.country)?.to_string(),
            status: row.status.clone(),
            start_year: life.start_year,
            retirement_year: life.retirement_year,
            annual_co2,
        });
    }
    let report = ClassReport {
        rows_in: rows.len(),
        dropped_by_status: dropped,
        start_ranges_split,
        total_annual_co2: records.iter().map(|r| r.annual_co2).sum(),
        imputation,
    };
    Ok((records, report))
}

/// Runs every stage over in-memory inputs. The RNG only drives the
/// retirement jitter of overdue steel plants.
pub fn run<R: Rng + ?Sized>(inputs: &Inputs, cfg: &PipelineConfig, rng: &mut R) -> Result<PipelineOutput> {
    cfg.validate()?;
    let names = &inputs.names;
    let mut report = RunReport::default();

    let mut assets = AssetSet::default();
    for (class, rows) in [
        (AssetClass::Coal, &inputs.coal),
        (AssetClass::Gas, &inputs.gas),
        (AssetClass::Steel, &inputs.steel),
    ] {
        let (records, class_report) = prepare_class(class, rows, names, &inputs.steel_factors, cfg, rng)?;
        match class {
            AssetClass::Coal => assets.coal = records,
            AssetClass::Gas => assets.gas = records,
            AssetClass::Steel => assets.steel = records,
        }
        report.classes.insert(class, class_report);
    }

    ensure_mapped(
        names,
        "committed",
        inputs
            .committed
            .iter()
            .filter(|r| !cfg.excluded_committed_areas.contains(&r.country))
            .map(|r| r.country.as_str()),
    )?;
    let (committed, committed_report) = clean_committed(&inputs.committed, cfg, names)?;
    ensure_mapped(
        names,
        "scenarios",
        inputs
            .scenarios
            .iter()
            .filter(|r| r.entity == cfg.scenario_entity && r.source == cfg.scenario_source)
            .map(|r| r.country.as_str()),
    )?;
    let (scenario_records, scenario_report) = clean_scenarios(&inputs.scenarios, cfg, names)?;
    let scenarios = scenario_frame(&scenario_records)?;

    let aggregates = aggregate_to_master(&assets, &committed, &scenarios, &inputs.regions, cfg)?;

    let credence = CredenceTable::new(&inputs.credence)?;
    let at = |grouping| expectation(&aggregates.master, &credence, grouping, cfg.normalize_expectation);
    let country = at(Grouping::Country)?;
    let region = at(Grouping::Region)?;
    let world = at(Grouping::World)?;
    let closest = closest_scenarios(&aggregates.master, cfg.discount_rho)?;

    report.committed = committed_report;
    report.scenarios = scenario_report;
    report.expectation = ExpectationReports {
        country: country.report.clone(),
        region: region.report.clone(),
        world: world.report.clone(),
    };
    report.unmapped_regions = aggregates.unmapped_regions.clone();
    info!(
        master_rows = aggregates.master.len(),
        countries = country.collapsed.len(),
        regions = region.collapsed.len(),
        scenario_rows = country.by_scenario.len(),
        "pipeline finished"
    );

    Ok(PipelineOutput {
        assets,
        committed,
        aggregates,
        expectations: Expectations { country, region, world },
        closest,
        report,
    })
}
