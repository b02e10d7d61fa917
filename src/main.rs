pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod metric;
pub mod places;
pub mod processing;
pub mod resolver;
pub mod table;
pub mod types;

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assign every county to its nearest team and write the result table
    Assign {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Recompute cached stages instead of loading them
        #[arg(long)]
        refresh: bool,
    },
    /// Find the team nearest to a coordinate
    Nearest {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
    /// Total population per team from a written assignment table
    Summary {
        #[arg(value_name = "FILE", default_value = "county_info.csv")]
        assignments: PathBuf,
    },
}

fn print_fan_bases(fan_bases: &[processing::FanBase]) {
    println!("{:<28} {:>12} {:>9}", "team", "population", "counties");
    for fb in fan_bases {
        println!("{:<28} {:>12} {:>9}", fb.team, fb.population, fb.counties);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Assign { config, refresh } => {
            info!(config = ?config, refresh, "running assignment pipeline");
            let app_config = config::AppConfig::load_from_file(config)?;

            let output = processing::run_pipeline(&app_config, *refresh)?;
            data::write_table(&output.assignments, &app_config.output.path)?;
            info!(rows = output.assignments.len(), path = ?app_config.output.path, "wrote assignments");

            for report in &output.reports {
                println!("{}", report);
            }
            println!();
            print_fan_bases(&output.fan_bases);
        }
        Commands::Nearest { config, lat, lon } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let point = types::GeoPoint::new(*lat, *lon)?;

            let (assignment, team) = processing::nearest_team(&app_config, point)?;
            let name = team.field("team").map(|f| f.to_string()).unwrap_or_default();
            println!("{} ({:.1} miles)", name, assignment.distance_miles);
        }
        Commands::Summary { assignments } => {
            let table = data::read_table(assignments, "assignments", &["state_id", "county_id"], &["fips"])?;
            if table.is_empty() {
                bail!("No assignments in {:?}", assignments);
            }
            let fan_bases = processing::summarize(&table, "closest_team", "pop_2020")?;
            print_fan_bases(&fan_bases);
        }
    }

    Ok(())
}
