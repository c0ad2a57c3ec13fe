use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};

/// First year of the projection axis.
pub const FIRST_YEAR: u16 = 2021;
/// Last year of the projection axis (inclusive).
pub const LAST_YEAR: u16 = 2100;
/// Number of points on the year axis.
pub const YEAR_COUNT: usize = (LAST_YEAR - FIRST_YEAR + 1) as usize;

/// Status label marking an asset as committed rather than considered.
pub const OPERATING: &str = "operating";

/// The projection years, oldest first.
pub fn years() -> impl Iterator<Item = u16> + Clone {
    FIRST_YEAR..=LAST_YEAR
}

/// Asset inventories that feed the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Coal,
    Gas,
    Steel,
}

impl AssetClass {
    /// Column prefix used for this class in panels (`coal.operating.2030`).
    pub fn prefix(self) -> &'static str {
        match self {
            AssetClass::Coal => "coal",
            AssetClass::Gas => "gas",
            AssetClass::Steel => "steel",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One inventory row after column standardisation, before imputation.
///
/// Year fields keep the raw token because the inventories mix numbers,
/// ranges and free text in them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAsset {
    pub country: String,
    pub status: String,
    pub start_year: Option<String>,
    pub planned_retire: Option<String>,
    /// Year the unit actually retired (coal inventory only).
    pub retired: Option<f64>,
    /// Plant age in years at the reference year (steel inventory only).
    pub plant_age: Option<String>,
    /// Nameplate electrical capacity (coal, gas).
    pub capacity_mw: Option<f64>,
    /// Observed annual CO2 in Mt/yr (coal).
    pub annual_co2: Option<f64>,
    /// Raw nameplate production per steel process key, kt/yr.
    pub production: BTreeMap<String, String>,
}

/// Imputed asset with a resolved lifetime and CO2 rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub country: String,
    pub status: String,
    pub start_year: f64,
    pub retirement_year: f64,
    /// Mt CO2 per year.
    pub annual_co2: f64,
}

impl AssetRecord {
    /// Alive in `year` when `start_year <= year < retirement_year`.
    pub fn is_alive(&self, year: u16) -> bool {
        let y = f64::from(year);
        self.start_year <= y && y < self.retirement_year
    }

    pub fn is_committed(&self) -> bool {
        self.status == OPERATING
    }
}

/// Dense yearly values over 2021..=2100; absent contributions are 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearSeries([f64; YEAR_COUNT]);

impl Default for YearSeries {
    fn default() -> Self {
        Self::zero()
    }
}

impl YearSeries {
    pub const fn zero() -> Self {
        YearSeries([0.0; YEAR_COUNT])
    }

    pub fn from_fn(mut f: impl FnMut(u16) -> f64) -> Self {
        let mut out = Self::zero();
        for (slot, year) in out.0.iter_mut().zip(years()) {
            *slot = f(year);
        }
        out
    }

    pub fn constant(value: f64) -> Self {
        YearSeries([value; YEAR_COUNT])
    }

    fn index(year: u16) -> Option<usize> {
        if (FIRST_YEAR..=LAST_YEAR).contains(&year) {
            Some(usize::from(year - FIRST_YEAR))
        } else {
            None
        }
    }

    /// Value at `year`, `None` outside the axis.
    pub fn get(&self, year: u16) -> Option<f64> {
        Self::index(year).map(|i| self.0[i])
    }

    /// Sets `year`; years outside the axis are ignored.
    pub fn set(&mut self, year: u16, value: f64) {
        if let Some(i) = Self::index(year) {
            self.0[i] = value;
        }
    }

    pub fn add_at(&mut self, year: u16, value: f64) {
        if let Some(i) = Self::index(year) {
            self.0[i] += value;
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, f64)> + '_ {
        years().zip(self.0.iter().copied())
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        let mut out = *self;
        out.0.iter_mut().for_each(|v| *v = f(*v));
        out
    }

    pub fn zip_with(&self, other: &YearSeries, mut f: impl FnMut(f64, f64) -> f64) -> Self {
        let mut out = *self;
        for (v, o) in out.0.iter_mut().zip(other.0.iter()) {
            *v = f(*v, *o);
        }
        out
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }
}

impl AddAssign<&YearSeries> for YearSeries {
    fn add_assign(&mut self, rhs: &YearSeries) {
        for (v, r) in self.0.iter_mut().zip(rhs.0.iter()) {
            *v += r;
        }
    }
}

impl Add for YearSeries {
    type Output = YearSeries;

    fn add(self, rhs: YearSeries) -> YearSeries {
        self.zip_with(&rhs, |a, b| a + b)
    }
}

impl Sub for YearSeries {
    type Output = YearSeries;

    fn sub(self, rhs: YearSeries) -> YearSeries {
        self.zip_with(&rhs, |a, b| a - b)
    }
}

impl Mul<f64> for YearSeries {
    type Output = YearSeries;

    fn mul(self, k: f64) -> YearSeries {
        self.map(|v| v * k)
    }
}

/// Shared Socioeconomic Pathway label, or the "no scenario" sentinel `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ssp {
    Family(String),
    Unassigned,
}

impl Ssp {
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "" | "0" => Ssp::Unassigned,
            t => Ssp::Family(t.to_string()),
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Ssp::Family(_))
    }
}

impl fmt::Display for Ssp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ssp::Family(name) => f.write_str(name),
            Ssp::Unassigned => f.write_str("0"),
        }
    }
}

/// Representative Concentration Pathway in tenths of W/m² (`19` is 1.9),
/// the baseline sentinel `BL`, or the "no scenario" sentinel `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rcp {
    Pathway(u16),
    Baseline,
    Unassigned,
}

impl Rcp {
    /// Decodes the two-character RCP token of a scenario code.
    /// Anything that is not an integer is the baseline.
    pub fn from_code(token: &str) -> Self {
        token
            .trim()
            .parse::<u16>()
            .map(Rcp::Pathway)
            .unwrap_or(Rcp::Baseline)
    }

    /// Parses the rendered form (`1.9`, `BL`, `0`).
    pub fn parse(token: &str) -> Result<Self> {
        match token.trim() {
            "BL" => Ok(Rcp::Baseline),
            "" | "0" => Ok(Rcp::Unassigned),
            t => {
                let value: f64 = t.parse().map_err(|_| PanelError::MalformedNumber {
                    context: "RCP".to_string(),
                    value: t.to_string(),
                })?;
                if !value.is_finite() || value < 0.0 || value > f64::from(u16::MAX) / 10.0 {
                    return Err(PanelError::MalformedNumber {
                        context: "RCP".to_string(),
                        value: t.to_string(),
                    });
                }
                Ok(Rcp::Pathway((value * 10.0).round() as u16))
            }
        }
    }

    /// Forcing level in W/m², for pathways only.
    pub fn value(self) -> Option<f64> {
        match self {
            Rcp::Pathway(tenths) => Some(f64::from(tenths) / 10.0),
            _ => None,
        }
    }

    pub fn is_assigned(self) -> bool {
        !matches!(self, Rcp::Unassigned)
    }
}

impl fmt::Display for Rcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rcp::Pathway(tenths) => write!(f, "{:.1}", f64::from(*tenths) / 10.0),
            Rcp::Baseline => f.write_str("BL"),
            Rcp::Unassigned => f.write_str("0"),
        }
    }
}

/// Cross-model mean scenario emissions for one country, Mt CO2eq.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRecord {
    pub country: String,
    pub ssp: Ssp,
    pub rcp: Rcp,
    pub emissions: YearSeries,
}

/// Probability weight of one SSP/RCP combination.
#[derive(Debug, Clone, PartialEq)]
pub struct CredenceRow {
    pub ssp: Ssp,
    pub rcp: Rcp,
    pub central: f64,
    pub optimistic: f64,
    pub pessimistic: f64,
}

/// Static country → region map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionMap(BTreeMap<String, String>);

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, country: impl Into<String>, region: impl Into<String>) {
        self.0.insert(country.into(), region.into());
    }

    pub fn region_of(&self, country: &str) -> Option<&str> {
        self.0.get(country).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, r)| (c.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<C: Into<String>, R: Into<String>> FromIterator<(C, R)> for RegionMap {
    fn from_iter<I: IntoIterator<Item = (C, R)>>(iter: I) -> Self {
        RegionMap(iter.into_iter().map(|(c, r)| (c.into(), r.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_axis_has_eighty_points() {
        assert_eq!(YEAR_COUNT, 80);
        assert_eq!(years().count(), 80);
        assert_eq!(years().last(), Some(2100));
    }

    #[test]
    fn series_ignores_out_of_axis_years() {
        let mut s = YearSeries::zero();
        s.add_at(2020, 5.0);
        s.add_at(2101, 5.0);
        s.add_at(2050, 2.5);
        assert_eq!(s.total(), 2.5);
        assert_eq!(s.get(2050), Some(2.5));
        assert_eq!(s.get(2020), None);
    }

    #[test]
    fn rcp_code_decoding() {
        assert_eq!(Rcp::from_code("19"), Rcp::Pathway(19));
        assert_eq!(Rcp::from_code("19").value(), Some(1.9));
        assert_eq!(Rcp::from_code("BL"), Rcp::Baseline);
        assert_eq!(Rcp::from_code(""), Rcp::Baseline);
        assert_eq!(Rcp::from_code("19").to_string(), "1.9");
        assert_eq!(Rcp::from_code("60").to_string(), "6.0");
    }

    #[test]
    fn rcp_rendered_form_parses_back() {
        assert_eq!(Rcp::parse("2.6").unwrap(), Rcp::Pathway(26));
        assert_eq!(Rcp::parse("BL").unwrap(), Rcp::Baseline);
        assert_eq!(Rcp::parse("0").unwrap(), Rcp::Unassigned);
        assert!(Rcp::parse("high").is_err());
    }

    #[test]
    fn rcp_out_of_range_is_malformed() {
        assert!(matches!(
            Rcp::parse("1e9"),
            Err(PanelError::MalformedNumber { .. })
        ));
        assert!(Rcp::parse("-2.6").is_err());
        assert!(Rcp::parse("inf").is_err());
        assert_eq!(Rcp::parse("6553.5").unwrap(), Rcp::Pathway(u16::MAX));
    }

    #[test]
    fn ssp_sentinel() {
        assert_eq!(Ssp::parse("0"), Ssp::Unassigned);
        assert_eq!(Ssp::parse("SSP2").to_string(), "SSP2");
        assert!(!Ssp::Unassigned.is_assigned());
    }

    #[test]
    fn alive_interval_is_end_exclusive() {
        let rec = AssetRecord {
            country: "X".into(),
            status: OPERATING.into(),
            start_year: 2025.0,
            retirement_year: 2045.0,
            annual_co2: 3.0,
        };
        assert!(!rec.is_alive(2024));
        assert!(rec.is_alive(2025));
        assert!(rec.is_alive(2044));
        assert!(!rec.is_alive(2045));
    }
}
