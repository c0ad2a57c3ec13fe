use std::fs;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use emissions_panel::aggregate::{total_residual, CONSID_TOTAL, EXPECTABLE};
use emissions_panel::expectation::AreaKey;
use emissions_panel::frame::SCENARIO_STEM;
use emissions_panel::scenario::{RawCommittedRow, RawScenarioRow};
use emissions_panel::types::CredenceRow;
use emissions_panel::{run, CountryNames, DataDir, Inputs, PipelineConfig, RawAsset, Rcp, RowKey, Ssp};

fn asset(country: &str, status: &str, start: &str, retire: &str) -> RawAsset {
    RawAsset {
        country: country.into(),
        status: status.into(),
        start_year: Some(start.into()),
        planned_retire: Some(retire.into()),
        ..Default::default()
    }
}

fn inputs() -> Inputs {
    let coal = RawAsset {
        annual_co2: Some(5.0),
        ..asset("X", "operating", "2020", "2060")
    };
    // 1440 MW / 12 / 40 = 3 Mt/yr
    let gas = RawAsset {
        capacity_mw: Some(1440.0),
        ..asset("X", "announced", "2025", "2045")
    };
    let steel = RawAsset {
        country: "X".into(),
        status: "operating".into(),
        plant_age: Some("50".into()),
        ..Default::default()
    };
    Inputs {
        coal: vec![coal],
        gas: vec![gas],
        steel: vec![steel],
        committed: vec![RawCommittedRow {
            country: "X".into(),
            year: 2021,
            sector: "Electricity".into(),
            emissions_gt: 0.0,
        }],
        scenarios: vec![RawScenarioRow {
            country: "X".into(),
            source: "PMSSPBIE".into(),
            entity: "KYOTOGHGAR4".into(),
            scenario: "SSP119IMAGE".into(),
            values: [(2030, 20_000.0), (2050, 1000.0)].into_iter().collect(),
        }],
        credence: vec![CredenceRow {
            ssp: Ssp::parse("SSP1"),
            rcp: Rcp::Pathway(19),
            central: 0.4,
            optimistic: 0.0,
            pessimistic: 0.0,
        }],
        regions: [("X", "Region X")].into_iter().collect(),
        names: CountryNames::from_pairs([("X", "Country X")]),
        ..Default::default()
    }
}

fn seeded() -> (PipelineConfig, StdRng) {
    let cfg = PipelineConfig {
        seed: Some(11),
        ..PipelineConfig::default()
    };
    let rng = cfg.rng();
    (cfg, rng)
}

fn x_key() -> RowKey {
    RowKey {
        region: Some("Region X".into()),
        ..RowKey::country("X", Ssp::parse("SSP1"), Rcp::Pathway(19))
    }
}

#[test]
fn coal_and_gas_example() {
    let (cfg, mut rng) = seeded();
    let out = run(&inputs(), &cfg, &mut rng).unwrap();
    let agg = &out.aggregates;

    assert_eq!(agg.coal.commit.value("X", "coal.commit.total", 2030), 5.0);
    assert!((agg.gas.consid.value("X", "gas.consid.total", 2030) - 3.0).abs() < 1e-12);
    assert_eq!(agg.coal.commit.value("X", "coal.commit.total", 2050), 5.0);
    assert_eq!(agg.gas.consid.value("X", "gas.consid.total", 2050), 0.0);

    let key = x_key();
    let master = &agg.master;
    assert_eq!(master.value(&key, "coal.operating", 2030), 5.0);
    assert!((master.value(&key, "gas.announced", 2030) - 3.0).abs() < 1e-12);
    // zero committed electricity makes the industry ratio 0
    assert!((master.value(&key, CONSID_TOTAL, 2030) - 3.0).abs() < 1e-12);
    // 20000 Gg = 20 Mt
    assert!((master.value(&key, SCENARIO_STEM, 2030) - 20.0).abs() < 1e-9);
    assert!((master.value(&key, EXPECTABLE, 2030) - 17.0).abs() < 1e-9);
    assert!((master.value(&key, SCENARIO_STEM, 2050) - 1.0).abs() < 1e-12);
    assert_eq!(master.len(), 1);
}

#[test]
fn totals_identity_holds() {
    let (cfg, mut rng) = seeded();
    let out = run(&inputs(), &cfg, &mut rng).unwrap();
    let residual = total_residual(&out.aggregates, "X");
    assert!(residual.values().iter().all(|v| v.abs() < 1e-9));
}

#[test]
fn weighted_expectation_for_single_scenario() {
    let (cfg, mut rng) = seeded();
    let out = run(&inputs(), &cfg, &mut rng).unwrap();
    let area = AreaKey {
        country: Some("X".into()),
        region: Some("Region X".into()),
    };
    let master = out.aggregates.master.value(&x_key(), EXPECTABLE, 2030);
    let weighted = out.expectations.country.collapsed.value(&area, EXPECTABLE, 2030);
    assert!((weighted - 0.4 * master).abs() < 1e-9);
    assert_eq!(out.expectations.world.collapsed.len(), 1);
    assert_eq!(out.report.expectation.country.dropped, 0);
    assert_eq!(out.closest["X"].ssp, "SSP1");
}

#[test]
fn expectation_keeps_one_weighted_row_per_scenario() {
    let mut data = inputs();
    let first = data.scenarios[0].clone();
    data.scenarios.push(RawScenarioRow {
        scenario: "SSP245IMAGE".into(),
        values: [(2030, 30_000.0)].into_iter().collect(),
        ..first
    });
    data.credence = vec![
        CredenceRow {
            ssp: Ssp::parse("SSP1"),
            rcp: Rcp::Pathway(19),
            central: 0.3,
            optimistic: 0.0,
            pessimistic: 0.0,
        },
        CredenceRow {
            ssp: Ssp::parse("SSP2"),
            rcp: Rcp::Pathway(45),
            central: 0.5,
            optimistic: 0.0,
            pessimistic: 0.0,
        },
    ];
    data.regions = [("X", "R")].into_iter().collect();
    let (cfg, mut rng) = seeded();
    let out = run(&data, &cfg, &mut rng).unwrap();

    let key = |ssp: &str, rcp: u16| RowKey {
        region: Some("R".into()),
        ..RowKey::country("X", Ssp::parse(ssp), Rcp::Pathway(rcp))
    };
    let master = &out.aggregates.master;
    let country = &out.expectations.country;
    assert_eq!(country.by_scenario.len(), 2);
    assert_eq!(country.by_scenario.keys().unwrap(), [key("SSP1", 19), key("SSP2", 45)]);
    for (ssp, rcp, p) in [("SSP1", 19, 0.3), ("SSP2", 45, 0.5)] {
        let k = key(ssp, rcp);
        let expected = p * master.value(&k, EXPECTABLE, 2030);
        assert!((country.by_scenario.value(&k, EXPECTABLE, 2030) - expected).abs() < 1e-9);
        assert!((country.by_scenario.value(&k, SCENARIO_STEM, 2030) - p * master.value(&k, SCENARIO_STEM, 2030)).abs() < 1e-9);
    }

    let area = AreaKey {
        country: Some("X".into()),
        region: Some("R".into()),
    };
    assert_eq!(country.collapsed.len(), 1);
    let collapsed = country.collapsed.value(&area, SCENARIO_STEM, 2030);
    assert!((collapsed - (0.3 * 20.0 + 0.5 * 30.0)).abs() < 1e-9);

    // region and world keep both scenarios and report their own coverage
    assert_eq!(out.expectations.region.by_scenario.len(), 2);
    assert_eq!(out.expectations.world.by_scenario.len(), 2);
    assert_eq!(out.report.expectation.region.rows_in, 2);
    assert_eq!(out.report.expectation.world.dropped, 0);
}

#[test]
fn reports_cover_every_grouping() {
    let mut data = inputs();
    // SSP1-1.9 loses its credence, so every grouping drops its only row
    data.credence[0].rcp = Rcp::Pathway(26);
    let (cfg, mut rng) = seeded();
    let out = run(&data, &cfg, &mut rng).unwrap();
    let reports = &out.report.expectation;
    for report in [&reports.country, &reports.region, &reports.world] {
        assert_eq!(report.rows_in, 1);
        assert_eq!(report.dropped, 1);
    }
    assert!(out.expectations.world.by_scenario.is_empty());
    let json = serde_json::to_value(&out.report).unwrap();
    assert_eq!(json["expectation"]["world"]["dropped"], 1);
}

#[test]
fn seeded_runs_are_identical() {
    let (cfg, mut rng) = seeded();
    let first = run(&inputs(), &cfg, &mut rng).unwrap();
    let mut rng = cfg.rng();
    let second = run(&inputs(), &cfg, &mut rng).unwrap();
    assert_eq!(first.aggregates.master.rows().unwrap(), second.aggregates.master.rows().unwrap());
    assert_eq!(first.assets.steel, second.assets.steel);

    let steel = &first.assets.steel[0];
    assert_eq!(steel.start_year, 1972.0);
    assert!((2023.0..=2037.0).contains(&steel.retirement_year));
    assert_eq!(first.report.classes[&emissions_panel::AssetClass::Steel].imputation.retirements_jittered, 1);
}

#[test]
fn unmapped_country_stops_the_run() {
    let mut data = inputs();
    data.gas[0].country = "Atlantis".into();
    let (cfg, mut rng) = seeded();
    assert!(matches!(
        run(&data, &cfg, &mut rng),
        Err(emissions_panel::PanelError::UnmappedCountry(name)) if name == "Atlantis"
    ));
}

#[test]
fn loads_a_data_directory() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, body: &str| fs::write(dir.path().join(name), body).unwrap();
    write(
        "coal.csv",
        "country,status,start_year,planned_retire,capacity_mw,annual_co2\nCountry X,operating,2020,2060,600,5\nX,mothballed,2000,2030,100,9\n",
    );
    write(
        "gas.csv",
        "country,status,start_year,planned_retire,capacity_mw\nX,announced,2025,2045,1440\n",
    );
    write("committed.csv", "country,year,sector,emissions_gt\nX,2021,Electricity,0.01\nX,2021,Industry,0.002\n");
    write(
        "scenarios.csv",
        "country,source,entity,scenario,2021,2030\nX,PMSSPBIE,KYOTOGHGAR4,SSP119IMAGE,1000,2000\n",
    );
    write("credence.csv", "ssp,rcp,central,optimistic,pessimistic\nSSP1,1.9,1,1,1\n");
    write("regions.csv", "country,region\nX,Region X\n");
    write("country_names.csv", "canonical,alternate\nX,Country X\n");

    let inputs = DataDir::new(dir.path()).load().unwrap();
    assert!(inputs.steel.is_empty());
    let (cfg, mut rng) = seeded();
    let out = run(&inputs, &cfg, &mut rng).unwrap();
    assert_eq!(out.report.classes[&emissions_panel::AssetClass::Coal].dropped_by_status, 1);
    let key = x_key();
    // 3 / 10 * 2 = 0.6 considered industry on top of 3 Mt considered gas
    assert!((out.aggregates.master.value(&key, CONSID_TOTAL, 2030) - 3.6).abs() < 1e-9);
    assert!((out.aggregates.master.value(&key, SCENARIO_STEM, 2021) - 1.0).abs() < 1e-12);
}

proptest! {
    #[test]
    fn identity_for_random_inventories(
        plants in prop::collection::vec(
            (any::<bool>(), any::<bool>(), 1980u16..2090, 1u16..70, 1.0f64..2000.0),
            1..20,
        ),
    ) {
        let mut data = inputs();
        data.coal.clear();
        data.gas.clear();
        for (is_coal, operating, start, life, size) in plants {
            let status = if operating { "operating" } else { "construction" };
            let row = asset("X", status, &start.to_string(), &(start + life).to_string());
            if is_coal {
                data.coal.push(RawAsset { annual_co2: Some(size / 100.0), ..row });
            } else {
                data.gas.push(RawAsset { capacity_mw: Some(size), ..row });
            }
        }
        let (cfg, mut rng) = seeded();
        let out = run(&data, &cfg, &mut rng).unwrap();
        let residual = total_residual(&out.aggregates, "X");
        prop_assert!(residual.values().iter().all(|v| v.abs() < 1e-9));
        let consid = out.aggregates.consid_total.series("X", CONSID_TOTAL).unwrap_or_default();
        prop_assert!(consid.values().iter().all(|v| *v >= 0.0));
    }
}
