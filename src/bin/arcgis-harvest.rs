//! Command line front end for arcgis-harvest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arcgis_harvest::{
    Config, ConnectivityProbe, EndpointRegistry, FailureLedger, FetchCoordinator, FetchOptions,
    describe_service,
};

#[derive(Parser)]
#[command(
    name = "arcgis-harvest",
    version,
    about = "Resilient batch downloads from ArcGIS feature services"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Endpoint registry YAML file
    #[arg(
        long,
        env = "ARCGIS_HARVEST_ENDPOINTS",
        default_value = "endpoints.yaml",
        global = true
    )]
    endpoints: PathBuf,

    /// Engine configuration YAML file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every feature of a registered service
    Fetch {
        /// Region the service is registered under
        region: String,
        /// Service name
        service: String,
        /// Output GeoJSON file (default: `<region>_<service>.geojson`)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Worker count
        #[arg(long)]
        concurrency: Option<usize>,
        /// Records per request
        #[arg(long)]
        page_size: Option<u64>,
    },
    /// Replay the windows recorded in a failure ledger
    Recover {
        /// Ledger file written by an earlier fetch
        ledger: PathBuf,
        /// Worker count
        #[arg(long)]
        concurrency: Option<usize>,
        /// Output GeoJSON file for the recovered features
        /// (default: `<ledger>.recovered.geojson` next to the ledger)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check that registered endpoints answer
    Probe {
        /// Only probe this region
        #[arg(long)]
        region: Option<String>,
        /// Per-endpoint timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List regions, or the services of one region
    List {
        /// Region to list services for
        region: Option<String>,
    },
    /// Print a registry entry derived from a layer's metadata
    Describe {
        /// Layer or query URL
        url: String,
        /// Description to put in the entry
        #[arg(long)]
        description: Option<String>,
    },
}

fn init_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_yaml_file(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_registry(path: &Path) -> anyhow::Result<EndpointRegistry> {
    EndpointRegistry::load(path)
        .with_context(|| format!("loading endpoint registry {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Fetch {
            region,
            service,
            output,
            concurrency,
            page_size,
        } => {
            let registry = load_registry(&cli.endpoints)?;
            let coordinator = FetchCoordinator::http(load_config(cli.config.as_deref())?)?;
            let endpoint = registry.get(&region, &service)?;

            let report = coordinator
                .fetch(
                    &endpoint,
                    FetchOptions {
                        concurrency,
                        page_size,
                    },
                )
                .await?;

            let output =
                output.unwrap_or_else(|| PathBuf::from(format!("{region}_{service}.geojson")));
            report.collection.save(&output)?;

            println!(
                "{} features from {}/{} batches written to {}",
                report.collection.len(),
                report.successful_batches,
                report.total_batches,
                output.display()
            );
            if report.is_complete() {
                Ok(ExitCode::SUCCESS)
            } else {
                if let Some(ledger) = &report.ledger_path {
                    println!(
                        "{} batches unresolved; replay with: arcgis-harvest recover {}",
                        report.unresolved.len(),
                        ledger.display()
                    );
                }
                Ok(ExitCode::from(2))
            }
        }
        Commands::Recover {
            ledger,
            concurrency,
            output,
        } => {
            let coordinator = FetchCoordinator::http(load_config(cli.config.as_deref())?)?;
            let report = FailureLedger::recover(&ledger, &coordinator, concurrency).await?;

            let output =
                output.unwrap_or_else(|| FailureLedger::recovered_output_path(&ledger));
            report.collection.save(&output)?;
            println!(
                "{} batches recovered ({} features written to {}), {} still failing",
                report.recovered.len(),
                report.collection.len(),
                output.display(),
                report.residual.len()
            );
            Ok(if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Probe {
            region,
            timeout,
            output,
        } => {
            let registry = load_registry(&cli.endpoints)?;
            let mut probe_config = load_config(cli.config.as_deref())?.probe;
            if let Some(secs) = timeout {
                probe_config.timeout = Duration::try_from_secs_f64(secs)
                    .context("--timeout must be a non-negative number of seconds")?;
            }
            let probe = ConnectivityProbe::new(probe_config)?;
            let report = probe.test_registry(&registry, region.as_deref()).await?;

            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!(
                        "{}/{} endpoints reachable ({:.1}%), report written to {}",
                        report.summary.successful,
                        report.summary.total_endpoints,
                        report.summary.success_rate,
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List { region } => {
            let registry = load_registry(&cli.endpoints)?;
            match region {
                Some(region) => {
                    let services = registry
                        .services(&region)
                        .with_context(|| format!("unknown region: {region}"))?;
                    for (name, description) in services {
                        println!("{name}\t{description}");
                    }
                }
                None => {
                    for region in registry.regions() {
                        println!("{region}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Describe { url, description } => {
            let client = reqwest::Client::new();
            let metadata = describe_service(&client, &url).await?;
            let name = metadata.suggested_name();
            let description = description.unwrap_or_else(|| format!("ArcGIS service: {name}"));

            let entry = BTreeMap::from([(name, metadata.to_endpoint_entry(description))]);
            print!("{}", serde_yaml::to_string(&vec![entry])?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
