pub mod aggregate;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod geocode;
pub mod join;
pub mod output;
pub mod pipeline;
pub mod projection;
pub mod proximity;
pub mod server;
pub mod simplify;
pub mod types;

#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join centers to regions, derive metrics and write the output tables
    Aggregate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// List centers within a radius of a coordinate
    Nearby {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// Look up one center by identifier or exact name
    Locate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, conflicts_with = "name", required_unless_present = "name")]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Also list centers within the configured search radius
        #[arg(long)]
        nearby: bool,
    },
    /// Geocode an address and list centers near the best candidate
    Geocode {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        query: String,
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// Serve the dataset over HTTP
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn print_nearby(data: &pipeline::Dataset, latitude: f64, longitude: f64, radius_km: f64) {
    let hits = data.nearby(latitude, longitude, radius_km);
    println!(
        "{} centers within {} km of ({}, {})",
        hits.len(),
        radius_km,
        latitude,
        longitude
    );
    for hit in hits {
        let region = data.region_of(hit.index).map_or("-", |r| r.name.as_str());
        println!(
            "{:>8.3} km  {:<10} {:<40} {:<8} {}",
            hit.distance_km,
            hit.center.id,
            hit.center.name,
            hit.center.kind.map_or("?", |k| k.label()),
            region
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregate { config } => {
            info!("Aggregating with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            let data = pipeline::Dataset::load(&app_config)?;

            if !data.join.mismatches.is_empty() {
                warn!(
                    "{} centers fell outside every region",
                    data.join.mismatches.len()
                );
            }
            let undefined: usize = data.regions.iter().map(|r| r.metrics.warnings.len()).sum();
            if undefined > 0 {
                warn!("{} region metrics are undefined", undefined);
            }

            let written = output::write_all(
                &data,
                &app_config.output.dir,
                app_config.processing.simplify_tolerance,
            )?;
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Nearby {
            config,
            lat,
            lon,
            radius_km,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let data = pipeline::Dataset::load(&app_config)?;
            let radius_km = radius_km.unwrap_or(app_config.processing.search_radius_km);
            print_nearby(&data, lat, lon, radius_km);
        }
        Commands::Locate {
            config,
            id,
            name,
            nearby,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let data = pipeline::Dataset::load(&app_config)?;

            let found = match (&id, &name) {
                (Some(id), _) => proximity::locate_center(&data.centers, id),
                (None, Some(name)) => proximity::find_by_name(&data.centers, name),
                (None, None) => None,
            };
            let Some(center) = found else {
                anyhow::bail!("No center matches {:?}", id.or(name));
            };

            println!("{}", serde_json::to_string_pretty(center)?);
            if nearby {
                let radius_km = app_config.processing.search_radius_km;
                print_nearby(&data, center.latitude, center.longitude, radius_km);
            }
        }
        Commands::Geocode {
            config,
            query,
            radius_km,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let geocoder = geocode::Geocoder::new(app_config.geocoder.clone())?;
            let candidates = geocoder.search(&query).await;
            if candidates.is_empty() {
                println!("No locations found for '{}'", query);
                return Ok(());
            }
            for candidate in &candidates {
                println!(
                    "{:.6}, {:.6}  {}",
                    candidate.latitude, candidate.longitude, candidate.display_label
                );
            }

            let best = &candidates[0];
            let data = pipeline::Dataset::load(&app_config)?;
            let radius_km = radius_km.unwrap_or(app_config.processing.search_radius_km);
            print_nearby(&data, best.latitude, best.longitude, radius_km);
        }
        Commands::Serve { config } => {
            info!("Serving with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            let data = pipeline::Dataset::load(&app_config)?;
            server::start_server(app_config, data).await?;
        }
    }

    Ok(())
}
