use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use atlas_risk::app::fusion_use_case::FusionUseCase;
use atlas_risk::config::Config;
use atlas_risk::error::FusionError;
use atlas_risk::infra::csv_output_adapter::CsvOutputAdapter;
use atlas_risk::observability;

#[derive(Parser)]
#[command(name = "atlas_risk")]
#[command(about = "Compound climate risk fusion for sub-national administrative regions")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./atlas_risk.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, fuse, score and aggregate the input snapshots, then publish the tables
    Run {
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Climate scenario to select, e.g. ssp245
        #[arg(long)]
        scenario: Option<String>,
        /// Projection timeframe to select, e.g. 2041_2060
        #[arg(long)]
        timeframe: Option<String>,
    },
    /// Validate the configuration and print the effective values as TOML
    CheckConfig,
}

fn stage_error(e: FusionError) -> anyhow::Error {
    let stage = e.stage();
    anyhow::Error::new(e).context(format!("{} stage failed", stage))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).map_err(stage_error)?;

    match cli.command {
        Commands::Run {
            input_dir,
            output_dir,
            scenario,
            timeframe,
        } => {
            if let Some(dir) = input_dir {
                config.paths.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.paths.output_dir = dir;
            }
            if let Some(scenario) = scenario {
                config.selection.scenario = scenario;
            }
            if let Some(timeframe) = timeframe {
                config.selection.timeframe = timeframe;
            }
            config.validate().map_err(stage_error)?;

            observability::init_logging(&config.logging);
            if config.output.write_metrics {
                if let Err(e) = observability::metrics::init() {
                    warn!("Metrics disabled: {}", e);
                }
            }

            info!(
                input_dir = %config.paths.input_dir.display(),
                output_dir = %config.paths.output_dir.display(),
                scenario = %config.selection.scenario,
                timeframe = %config.selection.timeframe,
                "Starting atlas_risk"
            );

            let output_dir = config.paths.output_dir.clone();
            let adapter = CsvOutputAdapter::from_config(&config);
            let use_case = FusionUseCase::with_config(config, Box::new(adapter));
            let output = use_case.execute().await.map_err(stage_error)?;

            println!("\n📊 Fusion results ({}):", output.metadata.run_id);
            println!("   Sub-regions: {}", output.sub_regions.len());
            println!("   Regions: {}", output.regions.len());
            println!("   Countries: {}", output.countries.len());
            println!("   High risk sub-regions: {}", output.high_risk.len());
            for (label, count) in &output.metadata.risk_distribution {
                println!("   {}: {}", label, count);
            }
            if !output.metadata.aggregation_warnings.is_empty() {
                println!(
                    "\n⚠️  {} aggregate(s) have no population-weighted risk",
                    output.metadata.aggregation_warnings.len()
                );
            }
            println!("   Output directory: {}", output_dir.display());
        }
        Commands::CheckConfig => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}
