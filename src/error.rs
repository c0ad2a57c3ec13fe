use polars::prelude::PolarsError;
use thiserror::Error;

use crate::types::AssetClass;

/// Panel result type.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Errors raised while building the emissions panel.
///
/// Numeric degeneracy (zero denominators, zero reference factors) is not an
/// error; those cases have fixed substitutions in the stages themselves.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("country name not in mapping table: {0:?}")]
    UnmappedCountry(String),

    #[error("{class} start year cannot be imputed: no known start year for status {status:?}")]
    ImputationGap { class: AssetClass, status: String },

    #[error("{class} {field} is not a year: {value:?}")]
    MalformedYear {
        class: AssetClass,
        field: &'static str,
        value: String,
    },

    #[error("{context} is not a number: {value:?}")]
    MalformedNumber { context: String, value: String },

    #[error("{class} asset in {country} is missing {field}")]
    MissingField {
        class: AssetClass,
        country: String,
        field: &'static str,
    },

    #[error("{class} asset in {country} retires in {retirement} but starts in {start}")]
    InvertedLifetime {
        class: AssetClass,
        country: String,
        start: f64,
        retirement: f64,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("table error: {0}")]
    Polars(#[from] PolarsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
