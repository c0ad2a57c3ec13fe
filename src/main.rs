use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use emissions_panel::expectation::plot_ready;
use emissions_panel::io::write_frame_to;
use emissions_panel::{init_logging, run, DataDir, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "emissions-panel")]
#[command(about = "Build committed / considered / expectable CO2 panels from a data directory")]
struct Cli {
    /// Directory holding the input CSV tables
    data: PathBuf,

    /// JSON file overriding pipeline defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the output tables are written
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Seed for the retirement jitter (overrides the config)
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if cli.seed.is_some() {
        cfg.seed = cli.seed;
    }

    info!(data = %cli.data.display(), "loading inputs");
    let inputs = DataDir::new(&cli.data).load()?;
    let mut rng = cfg.rng();
    let output = run(&inputs, &cfg, &mut rng)?;

    fs::create_dir_all(&cli.out)?;
    let out = |file: &str| cli.out.join(file);
    let agg = &output.aggregates;
    write_frame_to(&out("committed_sectors.csv"), &output.committed)?;
    write_frame_to(&out("coal_panel.csv"), &agg.coal.all)?;
    write_frame_to(&out("gas_panel.csv"), &agg.gas.all)?;
    write_frame_to(&out("steel_panel.csv"), &agg.steel.all)?;
    write_frame_to(&out("expectable.csv"), &agg.expectable)?;
    write_frame_to(&out("master.csv"), &agg.master)?;
    write_frame_to(&out("master_plot.csv"), &plot_ready(&agg.master)?)?;
    let expectations = &output.expectations;
    for (grouping, view) in [
        ("country", &expectations.country),
        ("region", &expectations.region),
        ("world", &expectations.world),
    ] {
        write_frame_to(&out(&format!("expectation_{grouping}.csv")), &view.collapsed)?;
        write_frame_to(&out(&format!("expectation_{grouping}_by_scenario.csv")), &view.by_scenario)?;
    }
    fs::write(out("closest_scenarios.json"), serde_json::to_string_pretty(&output.closest)?)?;
    fs::write(out("report.json"), serde_json::to_string_pretty(&output.report)?)?;

    info!(out = %cli.out.display(), rows = agg.master.len(), "outputs written");
    Ok(())
}
