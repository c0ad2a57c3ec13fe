use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use polars::prelude::*;

use crate::error::Result;
use crate::types::{years, Rcp, Ssp, YearSeries};

/// Name of the cell column for `stem` at `year`. The empty stem renders as
/// the bare year, which is how scenario columns are named.
pub fn column_name(stem: &str, year: u16) -> String {
    if stem.is_empty() {
        year.to_string()
    } else {
        format!("{stem}.{year}")
    }
}

/// Stem carrying the raw scenario trajectory.
pub const SCENARIO_STEM: &str = "";

/// Row key stored as text columns ahead of the data columns. An absent
/// optional part is stored as the empty string.
pub trait FrameKey: Ord + Clone {
    fn key_columns() -> &'static [&'static str];
    fn key_values(&self) -> Vec<String>;
    fn from_key_values(values: &[&str]) -> Result<Self>;
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl FrameKey for String {
    fn key_columns() -> &'static [&'static str] {
        &["country"]
    }

    fn key_values(&self) -> Vec<String> {
        vec![self.clone()]
    }

    fn from_key_values(values: &[&str]) -> Result<Self> {
        Ok(values.first().copied().unwrap_or_default().to_string())
    }
}

/// Row key of scenario-level tables. Country and region are optional so the
/// same key serves country, region and world rollups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub country: Option<String>,
    pub region: Option<String>,
    pub ssp: Ssp,
    pub rcp: Rcp,
}

impl RowKey {
    pub fn country(country: impl Into<String>, ssp: Ssp, rcp: Rcp) -> Self {
        RowKey {
            country: Some(country.into()),
            region: None,
            ssp,
            rcp,
        }
    }

    /// Country row carrying no scenario (SSP `0`, RCP `0`).
    pub fn unassigned(country: impl Into<String>) -> Self {
        Self::country(country, Ssp::Unassigned, Rcp::Unassigned)
    }

    pub fn has_scenario(&self) -> bool {
        self.ssp.is_assigned() && self.rcp.is_assigned()
    }
}

impl FrameKey for RowKey {
    fn key_columns() -> &'static [&'static str] {
        &["country", "region", "SSP", "RCP"]
    }

    fn key_values(&self) -> Vec<String> {
        vec![
            self.country.clone().unwrap_or_default(),
            self.region.clone().unwrap_or_default(),
            self.ssp.to_string(),
            self.rcp.to_string(),
        ]
    }

    fn from_key_values(values: &[&str]) -> Result<Self> {
        let part = |i: usize| values.get(i).copied().unwrap_or_default();
        Ok(RowKey {
            country: optional(part(0)),
            region: optional(part(1)),
            ssp: Ssp::parse(part(2)),
            rcp: Rcp::parse(part(3))?,
        })
    }
}

/// Text columns holding `keys`, one per key part.
pub fn key_series<K: FrameKey>(keys: &[K]) -> Vec<Series> {
    let values: Vec<Vec<String>> = keys.iter().map(K::key_values).collect();
    K::key_columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let column: Vec<&str> = values
                .iter()
                .map(|v| v.get(i).map(String::as_str).unwrap_or_default())
                .collect();
            Series::new(name, column)
        })
        .collect()
}

/// Decodes the key of every row of `df`.
pub fn decode_keys<K: FrameKey>(df: &DataFrame) -> Result<Vec<K>> {
    let columns = K::key_columns()
        .iter()
        .map(|name| df.column(name).and_then(|s| s.utf8()))
        .collect::<PolarsResult<Vec<_>>>()?;
    let mut keys = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let values: Vec<&str> = columns.iter().map(|ca| ca.get(i).unwrap_or_default()).collect();
        keys.push(K::from_key_values(&values)?);
    }
    Ok(keys)
}

fn key_exprs<K: FrameKey>() -> Vec<Expr> {
    K::key_columns().iter().map(|name| col(name)).collect()
}

/// Every data column except the key columns and `extra`.
fn data_columns<K: FrameKey>(extra: &[&str]) -> Expr {
    let mut skip: Vec<&str> = K::key_columns().to_vec();
    skip.extend_from_slice(extra);
    all().exclude(skip)
}

/// Wide table over a polars [`DataFrame`]: key columns first, then
/// `<stem>.<year>` for every stem. Rows are unique per key and sorted by
/// it; cells nobody contributed to are 0, never null.
#[derive(Debug, Clone)]
pub struct Frame<K> {
    stems: Vec<String>,
    df: DataFrame,
    key: PhantomData<K>,
}

/// Rows keyed by canonical country name.
pub type CountryFrame = Frame<String>;

/// Rows keyed by (country, region, SSP, RCP).
pub type ScenarioFrame = Frame<RowKey>;

impl<K: FrameKey> Default for Frame<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FrameKey> Frame<K> {
    pub fn new() -> Self {
        Frame {
            stems: Vec::new(),
            df: DataFrame::new_no_checks(key_series::<K>(&[])),
            key: PhantomData,
        }
    }

    /// Empty frame with the given zero columns.
    pub fn with_stems<S: Into<String>>(stems: impl IntoIterator<Item = S>) -> Result<Self> {
        FrameBuilder::with_stems(stems).build()
    }

    /// Adopts `df`, keeping the key columns and the columns of `stems` in
    /// order and sorting rows by key. Extra columns are dropped.
    pub fn from_df(stems: Vec<String>, df: DataFrame) -> Result<Self> {
        let mut names: Vec<String> = K::key_columns().iter().map(|c| c.to_string()).collect();
        names.extend(
            stems
                .iter()
                .flat_map(|stem| years().map(move |y| column_name(stem, y))),
        );
        let df = df.select(&names)?;
        let keys: Vec<K> = decode_keys(&df)?;
        let mut order: Vec<IdxSize> = (0..df.height() as IdxSize).collect();
        order.sort_by(|&a, &b| keys[a as usize].cmp(&keys[b as usize]));
        let df = df.take(&IdxCa::from_vec("order", order))?;
        Ok(Frame {
            stems,
            df,
            key: PhantomData,
        })
    }

    /// Group-by sum of `df` on the key columns.
    pub fn summed(stems: Vec<String>, df: DataFrame) -> Result<Self> {
        let agg = if stems.is_empty() {
            col(K::key_columns()[0]).count().alias("rows")
        } else {
            data_columns::<K>(&[]).sum()
        };
        let df = df.lazy().group_by(key_exprs::<K>()).agg([agg]).collect()?;
        Self::from_df(stems, df)
    }

    pub fn data(&self) -> &DataFrame {
        &self.df
    }

    pub fn stems(&self) -> &[String] {
        &self.stems
    }

    pub fn stem_index(&self, stem: &str) -> Option<usize> {
        self.stems.iter().position(|s| s == stem)
    }

    pub fn keys(&self) -> Result<Vec<K>> {
        decode_keys(&self.df)
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Every row's series for `stem`, in row order.
    pub fn column_series(&self, stem: &str) -> Result<Vec<YearSeries>> {
        let mut out = vec![YearSeries::zero(); self.len()];
        for year in years() {
            let ca = self.df.column(&column_name(stem, year))?.f64()?;
            for (series, v) in out.iter_mut().zip(ca.into_iter()) {
                series.set(year, v.unwrap_or(0.0));
            }
        }
        Ok(out)
    }

    /// Typed copy of every row: key and one series per stem.
    pub fn rows(&self) -> Result<Vec<(K, Vec<YearSeries>)>> {
        let mut rows: Vec<(K, Vec<YearSeries>)> = self
            .keys()?
            .into_iter()
            .map(|k| (k, Vec::with_capacity(self.stems.len())))
            .collect();
        for stem in &self.stems {
            for (row, series) in rows.iter_mut().zip(self.column_series(stem)?) {
                row.1.push(series);
            }
        }
        Ok(rows)
    }

    fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.keys().ok()?.iter().position(|k| k.borrow() == key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).is_some()
    }

    /// Series of one cell; `None` for unknown keys or stems.
    pub fn series<Q>(&self, key: &Q, stem: &str) -> Option<YearSeries>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.stem_index(stem)?;
        let i = self.position(key)?;
        let mut series = YearSeries::zero();
        for year in years() {
            let v = self.df.column(&column_name(stem, year)).ok()?.f64().ok()?.get(i);
            series.set(year, v.unwrap_or(0.0));
        }
        Some(series)
    }

    /// Cell value; 0 for unknown keys, stems or years.
    pub fn value<Q>(&self, key: &Q, stem: &str, year: u16) -> f64
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.series(key, stem)
            .and_then(|s| s.get(year))
            .unwrap_or(0.0)
    }

    /// Frame with only the stems matching `keep`, same rows.
    pub fn select(&self, keep: impl Fn(&str) -> bool) -> Result<Self> {
        let stems = self.stems.iter().filter(|s| keep(s)).cloned().collect();
        Self::from_df(stems, self.df.clone())
    }

    /// Frame with only the rows whose key matches `keep`.
    pub fn filter(&self, keep: impl Fn(&K) -> bool) -> Result<Self> {
        let mask: Vec<bool> = self.keys()?.iter().map(keep).collect();
        let df = self.df.filter(&BooleanChunked::from_slice("mask", &mask))?;
        Ok(Frame {
            stems: self.stems.clone(),
            df,
            key: PhantomData,
        })
    }

    /// Re-keys every row with `regroup`, then sums rows landing on the same
    /// key with a polars group-by. Rows mapped to `None` are dropped.
    pub fn group_by<K2: FrameKey>(&self, mut regroup: impl FnMut(&K) -> Option<K2>) -> Result<Frame<K2>> {
        let mut kept = Vec::new();
        let mut mask = Vec::with_capacity(self.len());
        for key in self.keys()? {
            let new_key = regroup(&key);
            mask.push(new_key.is_some());
            kept.extend(new_key);
        }
        let values = self
            .df
            .filter(&BooleanChunked::from_slice("mask", &mask))?
            .drop_many(K::key_columns());
        let mut columns = key_series(&kept);
        columns.extend(values.get_columns().iter().cloned());
        Frame::summed(self.stems.clone(), DataFrame::new(columns)?)
    }

    /// Outer join on key with zero fill. Stems keep their order of first
    /// appearance; a stem already present is taken from the first frame
    /// carrying it.
    pub fn merge(frames: &[&Self]) -> Result<Self> {
        let keys = key_exprs::<K>();
        let mut stems: Vec<String> = Vec::new();
        let mut joined: Option<LazyFrame> = None;
        for frame in frames {
            let fresh: Vec<String> = frame
                .stems
                .iter()
                .filter(|s| !stems.contains(s))
                .cloned()
                .collect();
            let right = Self::from_df(fresh.clone(), frame.df.clone())?.df.lazy();
            stems.extend(fresh);
            joined = Some(match joined {
                None => right,
                Some(left) => left.join(right, keys.clone(), keys.clone(), JoinArgs::new(JoinType::Outer)),
            });
        }
        let Some(joined) = joined else {
            return Ok(Self::new());
        };
        let df = joined
            .with_columns([data_columns::<K>(&[]).fill_null(lit(0.0))])
            .collect()?;
        Self::from_df(stems, df)
    }

    /// One column `stem` per key: the sum, per year, of every column of
    /// every input frame. Keys are the union of the inputs carrying data.
    pub fn year_total(frames: &[&Self], stem: &str) -> Result<Self> {
        let mut stacked: Option<DataFrame> = None;
        for frame in frames.iter().filter(|f| !f.stems.is_empty()) {
            let mut exprs = key_exprs::<K>();
            for year in years() {
                let total = frame
                    .stems
                    .iter()
                    .map(|s| col(&column_name(s, year)))
                    .reduce(|a, b| a + b)
                    .unwrap_or_else(|| lit(0.0));
                exprs.push(total.alias(&column_name(stem, year)));
            }
            let part = frame.df.clone().lazy().select(exprs).collect()?;
            stacked = Some(match stacked {
                None => part,
                Some(acc) => acc.vstack(&part)?,
            });
        }
        match stacked {
            Some(df) => Self::summed(vec![stem.to_string()], df),
            None => Self::with_stems([stem]),
        }
    }

    /// Column names in row-major order: each stem across all years.
    pub fn column_names(&self) -> Vec<String> {
        self.stems
            .iter()
            .flat_map(|stem| years().map(move |y| column_name(stem, y)))
            .collect()
    }
}

/// Row-wise accumulator for building a [`Frame`] from typed records.
#[derive(Debug, Clone)]
pub struct FrameBuilder<K> {
    stems: Vec<String>,
    rows: BTreeMap<K, Vec<YearSeries>>,
}

impl<K: FrameKey> Default for FrameBuilder<K> {
    fn default() -> Self {
        FrameBuilder {
            stems: Vec::new(),
            rows: BTreeMap::new(),
        }
    }
}

impl<K: FrameKey> FrameBuilder<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stems<S: Into<String>>(stems: impl IntoIterator<Item = S>) -> Self {
        let mut builder = Self::new();
        for stem in stems {
            builder.add_stem(stem);
        }
        builder
    }

    /// Adds a zero column unless `stem` already exists; returns its index.
    pub fn add_stem(&mut self, stem: impl Into<String>) -> usize {
        let stem = stem.into();
        if let Some(i) = self.stems.iter().position(|s| *s == stem) {
            return i;
        }
        self.stems.push(stem);
        for row in self.rows.values_mut() {
            row.push(YearSeries::zero());
        }
        self.stems.len() - 1
    }

    /// Adds an all-zero row unless `key` already exists.
    pub fn row_mut<Q>(&mut self, key: &Q) -> &mut [YearSeries]
    where
        K: Borrow<Q>,
        Q: Ord + ToOwned<Owned = K> + ?Sized,
    {
        let width = self.stems.len();
        self.rows
            .entry(key.to_owned())
            .or_insert_with(|| vec![YearSeries::zero(); width])
            .as_mut_slice()
    }

    /// Mutable cell series, creating the column and row as needed.
    pub fn series_mut<Q>(&mut self, key: &Q, stem: &str) -> &mut YearSeries
    where
        K: Borrow<Q>,
        Q: Ord + ToOwned<Owned = K> + ?Sized,
    {
        let i = self.add_stem(stem);
        &mut self.row_mut(key)[i]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn build(self) -> Result<Frame<K>> {
        let keys: Vec<K> = self.rows.keys().cloned().collect();
        let mut columns = key_series(&keys);
        for (s, stem) in self.stems.iter().enumerate() {
            for (y, year) in years().enumerate() {
                let values: Vec<f64> = self.rows.values().map(|row| row[s].values()[y]).collect();
                columns.push(Series::new(&column_name(stem, year), values));
            }
        }
        Ok(Frame {
            stems: self.stems,
            df: DataFrame::new(columns)?,
            key: PhantomData,
        })
    }
}
