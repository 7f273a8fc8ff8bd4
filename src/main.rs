use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use crate::config::Config;
use crate::db::Store;
use crate::engine::client::CromwellClient;
use crate::monitor::{runner, Context, MonitorKind};
use crate::registry::Registry;

mod conf;
mod config;
mod db;
mod engine;
mod monitor;
mod registry;
mod result;
mod tsv;
mod workdir;
mod workflow;
#[cfg(test)]
mod testing;

#[derive(Parser, Debug)]
#[command(name = "edgewatch")]
#[command(author = "edgewatch developers")]
#[command(version = "0.1.0")]
#[command(about = "Schedule, submit and track workflow projects on a Cromwell server")]
struct Args {
    /// Path to a TOML configuration file, built-in defaults are used without one
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Tick every selected monitor once and exit
    #[arg(long)]
    once: bool,
    /// Only run these monitors (repeatable)
    #[arg(long, value_enum)]
    only: Vec<MonitorKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("terve! starting up :)");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let registry = Registry::load(config.registry.as_deref(), &config.workflows_dir)?;
    let store = Store::open(&config.database)?;
    let engine = Arc::new(CromwellClient::new(&config.engine)?);
    let schedule = config.schedule.clone();
    let ctx = Arc::new(Context::new(config, registry, store, engine)?);

    let kinds = match args.only.is_empty() {
        true => MonitorKind::ALL.to_vec(),
        false => args.only.clone(),
    };
    let monitors = runner::build(&ctx, &kinds);

    if args.once {
        if !runner::run_once(&monitors).await {
            bail!("At least one monitor failed");
        }
    } else {
        runner::run(monitors, &schedule).await?;
    }

    info!("finished :D");
    Ok(())
}
