//! hivemined: lifecycle and dependency engine for containerized game servers.
//!
//! hivemined drives an external container engine (a Docker-compatible CLI) to run game
//! servers ("workers"), their persistent data, shared server baselines and one-shot
//! backup/restore tasks ("drones"). It tracks every container it creates by name, survives
//! restarts through a SQLite state store, and keeps create/start/stop/delete idempotent.
//!
//! # Architecture
//!
//! ## Entities
//!
//! - **Worker**: long-running server, mounting `[<name>-data, <baseline>]`
//! - **Data companion**: storage-only worker record owned by a worker
//! - **Baseline**: shared binaries and default configuration
//! - **Drone**: backup/restore task mounting `[<coordinator>, <target>]`
//! - **Coordinator**: the management container itself, adopted by label
//!
//! ## State
//!
//! Every entity is one JSON record in `<state-dir>/hive.db`. All writes go through
//! `DbBroker`, which serializes them and appends to `broker.events.jsonl`. On startup the
//! records are reconciled with what the engine reports: ids that no longer exist are reset.
//!
//! ## Concurrency
//!
//! Operations lock the names they touch (the entity and its dependency closure) in sorted
//! order. Engine calls are blocking.
//!
//! # Examples
//!
//! ```bash
//! # Create a worker on the `vanilla` baseline and start it
//! hivemined worker create alpha --baseline vanilla --port 25570 --start
//!
//! # Talk to the server console
//! hivemined worker command alpha say hello
//!
//! # Back it up
//! hivemined drone backup alpha
//!
//! # Remove it together with its data
//! hivemined worker delete alpha
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: engine seam, persistence, entity model, lifecycle and dependency engine
//! - [`plugins`]: entity kinds and their command surfaces

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command};
use crate::core::config::Config;
use crate::core::engine::{ContainerEngine, ContainerStatus, DockerCli, InMemoryEngine};
use crate::core::entity::EntityKind;
use crate::core::error::HiveError;
use crate::core::hive::Hive;
use crate::core::logging;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{MemoryStore, PersistenceAdapter, SqliteStore};
use clap::Parser;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() -> Result<(), HiveError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("v{}", VERSION);
            return Ok(());
        }
        Command::Schema => {
            println!(
                "{}",
                serde_json::to_string_pretty(&schema()).unwrap_or_else(|_| "{}".to_string())
            );
            return Ok(());
        }
        _ => {}
    }

    let (mut config, state_dir) =
        Config::discover(cli.config.as_deref(), cli.state_dir.as_deref())?;
    if let Some(host) = cli.engine_host {
        config.engine.host = Some(host);
    }
    logging::init_tracing(&config.logging);

    let hive = open_hive(config, &state_dir, cli.dry_run)?;
    dispatch(&hive, cli.command, cli.format)
}

/// Builds the engine and store described by `config` and opens the hive on them.
pub fn open_hive(config: Config, state_dir: &Path, dry_run: bool) -> Result<Hive, HiveError> {
    if dry_run {
        debug!("dry run: in-memory engine and store");
        let engine: Arc<dyn ContainerEngine> = Arc::new(dry_run_engine(&config));
        return Hive::open(engine, Arc::new(MemoryStore::new()), config);
    }

    let engine: Arc<dyn ContainerEngine> = match &config.engine.binary {
        Some(binary) => Arc::new(DockerCli::new(binary.clone(), config.engine.host.clone())),
        None => Arc::new(DockerCli::detect(config.engine.host.clone())?),
    };
    let store: Arc<dyn PersistenceAdapter> =
        Arc::new(SqliteStore::open(&config.store_dir(state_dir))?);
    Hive::open(engine, store, config)
}

/// In-memory engine with the role images present, any other image pullable, and a
/// running coordinator container to adopt.
fn dry_run_engine(config: &Config) -> InMemoryEngine {
    let images = &config.images;
    let engine = [&images.worker, &images.drone, &images.coordinator]
        .into_iter()
        .fold(InMemoryEngine::new().with_open_registry(), |engine, image| {
            engine.with_local_image(&image.to_image_ref().reference())
        });
    engine.add_external_container(
        &EntityKind::Coordinator.label(&config.labels.prefix),
        &config.coordinator.name,
        ContainerStatus::Running,
    );
    engine
}

fn dispatch(hive: &Hive, command: Command, format: OutputFormat) -> Result<(), HiveError> {
    match command {
        Command::Worker(cli) => plugins::worker::run_worker_cli(hive, cli, format),
        Command::Baseline(cli) => plugins::baseline::run_baseline_cli(hive, cli, format),
        Command::Drone(cli) => plugins::drone::run_drone_cli(hive, cli, format),
        Command::Coordinator(cli) => plugins::coordinator::run_coordinator_cli(hive, cli, format),
        Command::Image(cli) => plugins::image::run_image_cli(hive, cli, format),
        Command::Reconcile => {
            let report = hive.reconcile()?;
            output::emit(
                format,
                "reconcile",
                &format!(
                    "{} reset, {} refreshed",
                    report.reset.len(),
                    report.refreshed.len()
                ),
                json!({ "reset": report.reset, "refreshed": report.refreshed }),
            );
            Ok(())
        }
        Command::Schema | Command::Version => Ok(()),
    }
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "hivemined",
        "version": VERSION,
        "subsystems": [
            plugins::worker::schema(),
            plugins::baseline::schema(),
            plugins::drone::schema(),
            plugins::coordinator::schema(),
            plugins::image::schema()
        ]
    })
}
