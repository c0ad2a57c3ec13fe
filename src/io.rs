use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use polars::prelude::{CsvWriter, SerWriter};
use serde::Deserialize;

use crate::error::{PanelError, Result};
use crate::estimate::{ProcessFactorTable, SteelFactors, STEEL_PROCESSES};
use crate::frame::{Frame, FrameKey};
use crate::names::CountryNames;
use crate::scenario::{RawCommittedRow, RawScenarioRow};
use crate::types::{AssetClass, CredenceRow, RawAsset, Rcp, RegionMap, Ssp};

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    ReaderBuilder::new().trim(Trim::All).from_reader(source)
}

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn optional_text(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional_number(record: &StringRecord, idx: Option<usize>, context: &str) -> Result<Option<f64>> {
    match optional_text(record, idx) {
        None => Ok(None),
        Some(v) if v == "nan" => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| PanelError::MalformedNumber {
                context: context.to_string(),
                value: v,
            }),
    }
}

/// Reads one asset inventory. Unknown columns are ignored; steel process
/// columns become production tokens.
pub fn read_assets<R: Read>(class: AssetClass, source: R) -> Result<Vec<RawAsset>> {
    let mut rdr = reader(source);
    let headers = rdr.headers()?.clone();
    let country = column(&headers, "country");
    let status = column(&headers, "status");
    let start = column(&headers, "start_year");
    let retire = column(&headers, "planned_retire");
    let retired = column(&headers, "retired");
    let age = column(&headers, "plant_age");
    let capacity = column(&headers, "capacity_mw");
    let co2 = column(&headers, "annual_co2");
    let processes: Vec<(&str, usize)> = match class {
        AssetClass::Steel => STEEL_PROCESSES
            .iter()
            .filter_map(|p| column(&headers, p).map(|i| (*p, i)))
            .collect(),
        _ => Vec::new(),
    };

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(RawAsset {
            country: optional_text(&record, country).unwrap_or_default(),
            status: optional_text(&record, status).unwrap_or_default(),
            start_year: optional_text(&record, start),
            planned_retire: optional_text(&record, retire),
            retired: optional_number(&record, retired, "retired year")?,
            plant_age: optional_text(&record, age),
            capacity_mw: optional_number(&record, capacity, "capacity")?,
            annual_co2: optional_number(&record, co2, "annual CO2")?,
            production: processes
                .iter()
                .filter_map(|&(p, i)| record.get(i).map(|v| (p.to_string(), v.to_string())))
                .collect(),
        });
    }
    Ok(rows)
}

/// Reads the scenario table; every header that parses as a year is a value
/// column. Blank cells are skipped.
pub fn read_scenarios<R: Read>(source: R) -> Result<Vec<RawScenarioRow>> {
    let mut rdr = reader(source);
    let headers = rdr.headers()?.clone();
    let country = column(&headers, "country");
    let src = column(&headers, "source");
    let entity = column(&headers, "entity");
    let scenario = column(&headers, "scenario");
    let year_cols: Vec<(u16, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.parse::<u16>().ok().map(|y| (y, i)))
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut values = std::collections::BTreeMap::new();
        for &(year, i) in &year_cols {
            if let Some(v) = optional_number(&record, Some(i), "scenario value")? {
                values.insert(year, v);
            }
        }
        rows.push(RawScenarioRow {
            country: optional_text(&record, country).unwrap_or_default(),
            source: optional_text(&record, src).unwrap_or_default(),
            entity: optional_text(&record, entity).unwrap_or_default(),
            scenario: optional_text(&record, scenario).unwrap_or_default(),
            values,
        });
    }
    Ok(rows)
}

pub fn read_committed<R: Read>(source: R) -> Result<Vec<RawCommittedRow>> {
    let mut rdr = reader(source);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct CredenceCsv {
    ssp: String,
    rcp: String,
    central: f64,
    #[serde(default)]
    optimistic: Option<f64>,
    #[serde(default)]
    pessimistic: Option<f64>,
}

pub fn read_credence<R: Read>(source: R) -> Result<Vec<CredenceRow>> {
    let mut rdr = reader(source);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: CredenceCsv = result?;
        rows.push(CredenceRow {
            ssp: Ssp::parse(&row.ssp),
            rcp: Rcp::parse(&row.rcp)?,
            central: row.central,
            optimistic: row.optimistic.unwrap_or(0.0),
            pessimistic: row.pessimistic.unwrap_or(0.0),
        });
    }
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct RegionCsv {
    country: String,
    region: String,
}

pub fn read_regions<R: Read>(source: R) -> Result<RegionMap> {
    let mut rdr = reader(source);
    let mut map = RegionMap::new();
    for result in rdr.deserialize() {
        let row: RegionCsv = result?;
        map.insert(row.country, row.region);
    }
    Ok(map)
}

#[derive(Debug, Deserialize)]
struct NameCsv {
    canonical: String,
    alternate: String,
}

pub fn read_country_names<R: Read>(source: R) -> Result<CountryNames> {
    let mut rdr = reader(source);
    let mut pairs = Vec::new();
    for result in rdr.deserialize() {
        let row: NameCsv = result?;
        pairs.push((row.canonical, row.alternate));
    }
    Ok(CountryNames::from_pairs(pairs))
}

/// Reads a wide `country, <process>...` factor table. Blank cells are
/// absent factors.
pub fn read_factor_table<R: Read>(source: R) -> Result<ProcessFactorTable> {
    let mut rdr = reader(source);
    let headers = rdr.headers()?.clone();
    let country = column(&headers, "country");
    let mut entries = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let Some(name) = optional_text(&record, country) else {
            continue;
        };
        for (i, process) in headers.iter().enumerate() {
            if Some(i) == country {
                continue;
            }
            if let Some(v) = optional_number(&record, Some(i), "steel factor")? {
                entries.push((name.clone(), process.to_string(), v));
            }
        }
    }
    Ok(ProcessFactorTable::from_entries(entries))
}

/// Writes `frame` with its key columns first, then `<stem>.<year>` for
/// every stem.
pub fn write_frame<K, W>(sink: W, frame: &Frame<K>) -> Result<()>
where
    K: FrameKey,
    W: Write,
{
    let mut df = frame.data().clone();
    CsvWriter::new(sink).finish(&mut df)?;
    Ok(())
}

pub fn write_frame_to<K: FrameKey>(path: &Path, frame: &Frame<K>) -> Result<()> {
    write_frame(File::create(path)?, frame)
}

/// Every input table of one run.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub coal: Vec<RawAsset>,
    pub gas: Vec<RawAsset>,
    pub steel: Vec<RawAsset>,
    pub committed: Vec<RawCommittedRow>,
    pub scenarios: Vec<RawScenarioRow>,
    pub credence: Vec<CredenceRow>,
    pub regions: RegionMap,
    pub names: CountryNames,
    pub steel_factors: SteelFactors,
}

/// File names of a data directory:
///
/// | file | columns |
/// |------|---------|
/// | `coal.csv`, `gas.csv`, `steel.csv` | `country, status, start_year, planned_retire, retired, plant_age, capacity_mw, annual_co2`, steel also one column per process |
/// | `committed.csv` | `country, year, sector, emissions_gt` |
/// | `scenarios.csv` | `country, source, entity, scenario`, then one column per year (Gg) |
/// | `credence.csv` | `ssp, rcp, central, optimistic, pessimistic` |
/// | `regions.csv` | `country, region` |
/// | `country_names.csv` | `canonical, alternate` |
/// | `steel_intensity.csv`, `steel_utilisation.csv` | `country`, then one column per process |
#[derive(Debug, Clone)]
pub struct DataDir(PathBuf);

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataDir(root.into())
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.0.join(file)
    }

    pub fn assets(&self, class: AssetClass) -> PathBuf {
        self.path(&format!("{}.csv", class.prefix()))
    }

    /// Loads every table. The steel inventory and its factor tables are
    /// optional and read as empty when absent.
    pub fn load(&self) -> Result<Inputs> {
        let steel = self.assets(AssetClass::Steel);
        let intensity = self.path("steel_intensity.csv");
        let utilisation = self.path("steel_utilisation.csv");
        Ok(Inputs {
            coal: read_assets(AssetClass::Coal, File::open(self.assets(AssetClass::Coal))?)?,
            gas: read_assets(AssetClass::Gas, File::open(self.assets(AssetClass::Gas))?)?,
            steel: if steel.exists() {
                read_assets(AssetClass::Steel, File::open(steel)?)?
            } else {
                Vec::new()
            },
            committed: read_committed(File::open(self.path("committed.csv"))?)?,
            scenarios: read_scenarios(File::open(self.path("scenarios.csv"))?)?,
            credence: read_credence(File::open(self.path("credence.csv"))?)?,
            regions: read_regions(File::open(self.path("regions.csv"))?)?,
            names: read_country_names(File::open(self.path("country_names.csv"))?)?,
            steel_factors: SteelFactors {
                intensity: if intensity.exists() {
                    read_factor_table(File::open(intensity)?)?
                } else {
                    ProcessFactorTable::default()
                },
                utilisation: if utilisation.exists() {
                    read_factor_table(File::open(utilisation)?)?
                } else {
                    ProcessFactorTable::default()
                },
            },
        })
    }
}
