use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::frame::{CountryFrame, FrameBuilder};
use crate::types::{years, AssetRecord};

/// Builds the status panel for one asset class: a `<prefix>.<status>`
/// column for every status present, each cell the summed annual CO2 of the
/// assets alive that year.
pub fn build_panel(prefix: &str, records: &[AssetRecord]) -> Result<CountryFrame> {
    let mut frame: FrameBuilder<String> = FrameBuilder::new();
    let mut status_col: HashMap<&str, usize> = HashMap::new();
    for rec in records {
        if !status_col.contains_key(rec.status.as_str()) {
            let i = frame.add_stem(format!("{prefix}.{}", rec.status));
            status_col.insert(rec.status.as_str(), i);
        }
    }
    for rec in records {
        let i = status_col[rec.status.as_str()];
        let cell = &mut frame.row_mut(rec.country.as_str())[i];
        for year in years().filter(|&y| rec.is_alive(y)) {
            cell.add_at(year, rec.annual_co2);
        }
    }
    debug!(prefix, countries = frame.len(), statuses = status_col.len(), "panel built");
    frame.build()
}

/// Splits records into (committed, considered) by operating status.
pub fn split_by_commitment(records: &[AssetRecord]) -> (Vec<AssetRecord>, Vec<AssetRecord>) {
    records.iter().cloned().partition(AssetRecord::is_committed)
}
