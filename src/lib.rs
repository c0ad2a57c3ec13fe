#![forbid(unsafe_code)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod estimate;
pub mod expectation;
pub mod frame;
pub mod impute;
pub mod io;
pub mod names;
pub mod panel;
pub mod pipeline;
pub mod scenario;
pub mod types;

use tracing_subscriber::{fmt, EnvFilter};

pub use aggregate::{aggregate_to_master, Aggregates, AssetSet};
pub use config::PipelineConfig;
pub use error::{PanelError, Result};
pub use expectation::{closest_scenarios, expectation, plot_ready, CredenceTable, Expectation, Grouping};
pub use frame::{column_name, CountryFrame, Frame, FrameBuilder, FrameKey, RowKey, ScenarioFrame};
pub use io::{DataDir, Inputs};
pub use names::{CountryNames, CountryResolver};
pub use panel::build_panel;
pub use pipeline::{run, ExpectationReports, PipelineOutput, RunReport};
pub use types::{AssetClass, AssetRecord, RawAsset, Rcp, Ssp, YearSeries};

/// Installs the fmt subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
