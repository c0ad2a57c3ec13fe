use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PanelError, Result};

/// Resolves the spelling a source uses for a country to its canonical name.
pub trait CountryResolver {
    fn resolve(&self, name: &str) -> Result<&str>;
}

/// Many-to-one table of alternate spellings → canonical country name.
#[derive(Debug, Clone, Default)]
pub struct CountryNames {
    alternates: BTreeMap<String, String>,
}

impl CountryNames {
    /// Builds from `(canonical, alternate)` pairs. Every canonical name also
    /// resolves to itself.
    pub fn from_pairs<I, C, A>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, A)>,
        C: Into<String>,
        A: Into<String>,
    {
        let mut alternates = BTreeMap::new();
        for (canonical, alternate) in pairs {
            let canonical = canonical.into();
            alternates
                .entry(canonical.clone())
                .or_insert_with(|| canonical.clone());
            alternates.insert(alternate.into(), canonical);
        }
        CountryNames { alternates }
    }

    /// Every distinct name in `names` the table cannot resolve, sorted.
    pub fn missing<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|n| !self.alternates.contains_key(*n))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Fails with the first unmapped name when any of `names` is unmapped.
    pub fn check_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        match self.missing(names).into_iter().next() {
            Some(name) => Err(PanelError::UnmappedCountry(name)),
            None => Ok(()),
        }
    }
}

impl CountryResolver for CountryNames {
    fn resolve(&self, name: &str) -> Result<&str> {
        self.alternates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PanelError::UnmappedCountry(name.to_string()))
    }
}
